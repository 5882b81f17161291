//! Utility functions for identifiers, match keys and money

use bech32::Bech32m;
use uuid7::uuid7;

use crate::error::ReturnError;
use crate::types::LineItem;

// construct a unique record id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Six decimal digits drawn from the random tail of a fresh uuid7.
pub fn random_six_digits() -> u32 {
    let bytes = uuid7();
    let bytes = bytes.as_bytes();
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&bytes[8..16]);
    (u64::from_be_bytes(tail) % 1_000_000) as u32
}

/// Case-insensitive key used for order numbers and customer emails.
pub fn match_key(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn same_customer(a: &str, b: &str) -> bool {
    match_key(a) == match_key(b)
}

/// Sum of `unit_price * quantity`, rejecting overflow.
pub fn line_total(items: &[LineItem]) -> Result<u64, ReturnError> {
    items.iter().try_fold(0u64, |acc, item| {
        item.unit_price
            .checked_mul(u64::from(item.quantity))
            .and_then(|line| acc.checked_add(line))
            .ok_or_else(|| ReturnError::Validation("item total overflows".into()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(unit_price: u64, quantity: u32) -> LineItem {
        LineItem {
            product_id: "sku".into(),
            name: "shirt".into(),
            size: None,
            quantity,
            unit_price,
        }
    }

    #[test]
    fn six_digits_stay_in_range() {
        for _ in 0..1_000 {
            assert!(random_six_digits() < 1_000_000);
        }
    }

    #[test]
    fn totals_multiply_quantity() {
        let items = vec![item(149_000, 1), item(20_000, 3)];
        assert_eq!(line_total(&items).unwrap(), 209_000);
    }

    #[test]
    fn totals_reject_overflow() {
        let items = vec![item(u64::MAX, 2)];
        assert!(matches!(line_total(&items), Err(ReturnError::Validation(_))));
    }

    #[test]
    fn match_key_ignores_case_and_padding() {
        assert_eq!(match_key("  ORD-123456 "), "ord-123456");
        assert!(same_customer("Ana@Shop.com", "ana@shop.com "));
    }
}
