//! Smoke Screen Unit tests for the returns components
//!
//! Small checks of individual pieces in isolation from the service workflow:
//! submission validation, coupon validity rules, ids and the order catalog.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use returns_ledger::{
    collaborators::{OrderCatalog, OrderSource},
    coupon::{Coupon, CouponView},
    error::{CouponError, ReturnError},
    returns::ReturnSubmission,
    store::Store,
    types::{CouponStatus, LineItem, Resolution, ReturnKind, TimeStamp},
    utils::new_uuid_to_bech32,
};

fn item(unit_price: u64, quantity: u32) -> LineItem {
    LineItem {
        product_id: "SHIRT-01".into(),
        name: "Linen shirt".into(),
        size: Some("M".into()),
        quantity,
        unit_price,
    }
}

fn full_submission() -> ReturnSubmission {
    ReturnSubmission::new()
        .set_order_number(" ORD-123456 ")
        .set_customer_email("ana@example.com")
        .set_customer_name("Ana")
        .set_kind(ReturnKind::Exchange)
        .set_resolution(Resolution::StoreCredit)
        .set_reason("too small")
        .add_item(item(149_000, 1))
}

// SUBMISSION TESTS
#[cfg(test)]
mod submission_tests {
    use super::*;

    /// A complete submission validates and carries its item total
    #[test]
    fn complete_submission_validates() {
        let new = full_submission().validate_and_finalise().unwrap();
        assert_eq!(new.order_number, "ORD-123456");
        assert_eq!(new.total, 149_000);
        assert!(new.is_fast_path());
        assert!(new.idempotency_key.is_none());
    }

    #[test]
    fn missing_order_number_is_rejected() {
        let result = ReturnSubmission::new()
            .set_customer_email("ana@example.com")
            .set_kind(ReturnKind::Return)
            .set_resolution(Resolution::Refund)
            .add_item(item(1_000, 1))
            .validate_and_finalise();
        assert!(matches!(result, Err(ReturnError::Validation(_))));
    }

    #[test]
    fn blank_email_is_rejected() {
        let result = full_submission()
            .set_customer_email("   ")
            .validate_and_finalise();
        assert!(matches!(result, Err(ReturnError::Validation(msg)) if msg.contains("email")));
    }

    #[test]
    fn missing_kind_or_resolution_is_rejected() {
        let no_kind = ReturnSubmission::new()
            .set_order_number("ORD-1")
            .set_customer_email("ana@example.com")
            .set_resolution(Resolution::Refund)
            .add_item(item(1_000, 1))
            .validate_and_finalise();
        assert!(matches!(no_kind, Err(ReturnError::Validation(_))));

        let no_resolution = ReturnSubmission::new()
            .set_order_number("ORD-1")
            .set_customer_email("ana@example.com")
            .set_kind(ReturnKind::Return)
            .add_item(item(1_000, 1))
            .validate_and_finalise();
        assert!(matches!(no_resolution, Err(ReturnError::Validation(_))));
    }

    #[test]
    fn empty_or_zero_quantity_items_are_rejected() {
        let empty = full_submission().set_items(vec![]).validate_and_finalise();
        assert!(matches!(empty, Err(ReturnError::Validation(_))));

        let zero = full_submission()
            .set_items(vec![item(1_000, 0)])
            .validate_and_finalise();
        assert!(matches!(zero, Err(ReturnError::Validation(_))));
    }

    #[test]
    fn blank_idempotency_key_is_ignored() {
        let new = full_submission()
            .set_idempotency_key("  ")
            .validate_and_finalise()
            .unwrap();
        assert!(new.idempotency_key.is_none());
    }
}

// COUPON TESTS
#[cfg(test)]
mod coupon_tests {
    use super::*;

    fn coupon() -> Coupon {
        let issued = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();
        Coupon {
            id: "c1".into(),
            code: "EXC-123456".into(),
            return_request_id: "r1".into(),
            amount: 149_000,
            customer_email: "ana@example.com".into(),
            status: CouponStatus::Active,
            usage_count: 0,
            max_usage: 1,
            expiry_date: (issued + Duration::days(181)).into(),
            created_at: issued.into(),
            used_at: None,
            order_used_in: None,
            cancelled_at: None,
        }
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn active_coupon_passes() {
        let c = coupon();
        assert!(c.check(now(), None).is_ok());
        assert!(c.check(now(), Some(" ANA@example.com")).is_ok());
        assert_eq!(c.remaining_uses(), 1);
    }

    /// Expiry wins over every other reason
    #[test]
    fn expiry_is_checked_first() {
        let mut c = coupon();
        c.status = CouponStatus::Used;
        c.usage_count = 1;
        let late = c.expiry_date.to_datetime_utc() + Duration::seconds(1);
        assert!(matches!(c.check(late, None), Err(CouponError::Expired { .. })));
    }

    #[test]
    fn expiry_instant_itself_is_valid() {
        let c = coupon();
        assert!(c.check(c.expiry_date.to_datetime_utc(), None).is_ok());
    }

    #[test]
    fn cancelled_coupon_is_not_active() {
        let mut c = coupon();
        c.status = CouponStatus::Cancelled;
        assert!(matches!(c.check(now(), None), Err(CouponError::NotActive { .. })));
    }

    #[test]
    fn used_up_coupon_is_exhausted() {
        let mut c = coupon();
        c.usage_count = 1;
        assert!(matches!(c.check(now(), None), Err(CouponError::Exhausted { .. })));
        assert_eq!(c.remaining_uses(), 0);
    }

    #[test]
    fn other_customer_is_refused() {
        let c = coupon();
        let err = c.check(now(), Some("bob@example.com")).unwrap_err();
        assert!(matches!(err, CouponError::EmailMismatch { .. }));
        assert!(err.is_rejection());
    }

    #[test]
    fn view_hides_the_owner() {
        let view = CouponView::from(&coupon());
        assert_eq!(view.code, "EXC-123456");
        assert_eq!(view.amount, 149_000);
        assert_eq!(view.remaining_uses, 1);
    }

    #[test]
    fn coupon_encoding() {
        let original = coupon();
        let encoding = minicbor::to_vec(&original).unwrap();
        let decoded: Coupon = minicbor::decode(&encoding).unwrap();
        assert_eq!(original, decoded);
    }
}

// UTILS AND CATALOG TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Test that new_uuid_to_bech32 generates valid bech32-encoded strings
    /// with the correct human-readable prefix
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let encoded = new_uuid_to_bech32("trk").unwrap();
        assert!(encoded.starts_with("trk1"));
        assert!(encoded.len() > 10);
    }

    #[test]
    fn handles_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn generates_unique_ids() {
        let id1 = new_uuid_to_bech32("trk").unwrap();
        let id2 = new_uuid_to_bech32("trk").unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn timestamp_new_creates_current_time() {
        let ts = TimeStamp::new();
        let diff = (Utc::now() - ts.to_datetime_utc()).num_seconds().abs();
        assert!(diff < 1);
    }

    #[test]
    fn catalog_matches_number_and_email_without_case() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Store::new(Arc::new(sled::open(dir.path().join("catalog.db"))?))?;
        let catalog = OrderCatalog::new(&store);

        let order = returns_ledger::types::Order {
            order_number: "ORD-42".into(),
            customer_email: "Ana@Example.com".into(),
            customer_name: "Ana".into(),
            status: returns_ledger::types::OrderStatus::Delivered,
            items: vec![item(1_000, 1)],
            total: 1_000,
            order_date: TimeStamp::new(),
            delivered_date: Some(TimeStamp::new()),
        };
        catalog.upsert(&order)?;

        assert_eq!(catalog.find_order("ord-42", "ana@example.com")?, Some(order));
        assert_eq!(catalog.find_order("ORD-42", "bob@example.com")?, None);
        assert_eq!(catalog.find_order("ORD-43", "ana@example.com")?, None);
        Ok(())
    }
}
