//! Store-credit coupon ledger
//!
//! Coupons are issued once per approved store-credit return, redeemed at most
//! `max_usage` times and never deleted. Issuance is keyed on the return request id so a
//! retried approval gets the same coupon back; redemption is a single sled transaction
//! over the coupon record, so concurrent attempts on one code serialize and only the
//! first one finds uses left.
use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use uuid7::uuid7;

use crate::clock::Clock;
use crate::collaborators::{self, Notification, NotificationKind, NotificationSink};
use crate::config::Config;
use crate::error::{CouponError, StoreError};
use crate::store::{self, Record, Store};
use crate::types::{CouponStatus, TimeStamp};
use crate::utils;

/// Single-use store credit for this storefront.
pub const MAX_USAGE: u32 = 1;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Coupon {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub code: String, // PREFIX-NNNNNN, unique across the ledger
    #[n(2)]
    pub return_request_id: String,
    #[n(3)]
    pub amount: u64,
    #[n(4)]
    pub customer_email: String,
    #[n(5)]
    pub status: CouponStatus,
    #[n(6)]
    pub usage_count: u32,
    #[n(7)]
    pub max_usage: u32,
    #[n(8)]
    pub expiry_date: TimeStamp,
    #[n(9)]
    pub created_at: TimeStamp,
    #[n(10)]
    pub used_at: Option<TimeStamp>,
    #[n(11)]
    pub order_used_in: Option<String>,
    #[n(12)]
    pub cancelled_at: Option<TimeStamp>,
}

impl Record for Coupon {
    const KIND: &'static str = "coupon";
}

impl Coupon {
    pub fn remaining_uses(&self) -> u32 {
        self.max_usage.saturating_sub(self.usage_count)
    }

    /// Validity checks shared by lookup and redemption, in the order customers see them.
    pub fn check(&self, now: DateTime<Utc>, email: Option<&str>) -> Result<(), CouponError> {
        if now > self.expiry_date.to_datetime_utc() {
            return Err(CouponError::Expired {
                code: self.code.clone(),
                expired_at: self.expiry_date,
            });
        }
        if self.status != CouponStatus::Active {
            return Err(CouponError::NotActive {
                code: self.code.clone(),
                status: self.status,
            });
        }
        if self.usage_count >= self.max_usage {
            return Err(CouponError::Exhausted {
                code: self.code.clone(),
            });
        }
        if let Some(email) = email
            && !utils::same_customer(email, &self.customer_email)
        {
            return Err(CouponError::EmailMismatch {
                code: self.code.clone(),
            });
        }
        Ok(())
    }
}

/// What a customer or checkout sees when validating a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponView {
    pub code: String,
    pub amount: u64,
    pub remaining_uses: u32,
    pub expiry_date: TimeStamp,
}

impl From<&Coupon> for CouponView {
    fn from(coupon: &Coupon) -> Self {
        Self {
            code: coupon.code.clone(),
            amount: coupon.amount,
            remaining_uses: coupon.remaining_uses(),
            expiry_date: coupon.expiry_date,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CouponPolicy {
    pub prefix: String,
    pub validity_months: u32,
    pub code_attempts: u32,
}

impl From<&Config> for CouponPolicy {
    fn from(config: &Config) -> Self {
        Self {
            prefix: config.coupon_prefix.trim().to_uppercase(),
            validity_months: config.coupon_validity_months,
            code_attempts: config.coupon_code_attempts.max(1),
        }
    }
}

/// The three coupon trees, as seen from inside a transaction.
pub(crate) struct CouponTx<'a> {
    pub coupons: &'a TransactionalTree,
    pub codes: &'a TransactionalTree,
    pub by_return: &'a TransactionalTree,
}

pub(crate) struct Issued {
    pub coupon: Coupon,
    pub created: bool,
}

/// Issue (or find) the coupon for `return_request_id` inside an open transaction.
pub(crate) fn issue_within<E>(
    tx: &CouponTx<'_>,
    policy: &CouponPolicy,
    return_request_id: &str,
    amount: u64,
    customer_email: &str,
    now: DateTime<Utc>,
) -> ConflictableTransactionResult<Issued, E>
where
    E: From<CouponError> + From<StoreError>,
{
    if let Some(existing_id) = store::tx_get_id::<E>(tx.by_return, return_request_id.as_bytes())? {
        return match store::tx_get::<Coupon, E>(tx.coupons, existing_id.as_bytes())? {
            Some(coupon) => Ok(Issued {
                coupon,
                created: false,
            }),
            None => store::abort(StoreError::Decode(
                Coupon::KIND,
                format!("index points at missing coupon {existing_id}"),
            )),
        };
    }

    let expiry = now
        .checked_add_months(Months::new(policy.validity_months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    let prefix = policy.prefix.trim().to_uppercase();
    for _ in 0..policy.code_attempts {
        let code = format!("{prefix}-{:06}", utils::random_six_digits());
        if tx.codes.get(code.as_bytes())?.is_some() {
            continue;
        }

        let coupon = Coupon {
            id: uuid7().to_string(),
            code,
            return_request_id: return_request_id.to_string(),
            amount,
            customer_email: customer_email.to_string(),
            status: CouponStatus::Active,
            usage_count: 0,
            max_usage: MAX_USAGE,
            expiry_date: expiry.into(),
            created_at: now.into(),
            used_at: None,
            order_used_in: None,
            cancelled_at: None,
        };

        store::tx_put::<Coupon, E>(tx.coupons, coupon.id.as_bytes(), &coupon)?;
        tx.codes.insert(coupon.code.as_bytes(), coupon.id.as_bytes())?;
        tx.by_return
            .insert(return_request_id.as_bytes(), coupon.id.as_bytes())?;

        return Ok(Issued {
            coupon,
            created: true,
        });
    }

    store::abort(CouponError::CodeSpaceExhausted {
        attempts: policy.code_attempts,
    })
}

/// Cancel an issued coupon from inside a transaction if it is still active.
/// Returns the coupon only when this call cancelled it; spent or already
/// cancelled coupons are left alone.
pub(crate) fn void_within<E>(
    coupons: &TransactionalTree,
    coupon_id: &str,
    now: DateTime<Utc>,
) -> ConflictableTransactionResult<Option<Coupon>, E>
where
    E: From<StoreError>,
{
    let Some(mut coupon) = store::tx_get::<Coupon, E>(coupons, coupon_id.as_bytes())? else {
        return Ok(None);
    };
    if coupon.status != CouponStatus::Active {
        return Ok(None);
    }
    coupon.status = CouponStatus::Cancelled;
    coupon.cancelled_at = Some(now.into());
    store::tx_put::<Coupon, E>(coupons, coupon.id.as_bytes(), &coupon)?;
    Ok(Some(coupon))
}

pub(crate) fn issued_notification(coupon: &Coupon) -> Notification {
    Notification {
        email: coupon.customer_email.clone(),
        kind: NotificationKind::CouponIssued {
            code: coupon.code.clone(),
            amount: coupon.amount,
            expiry_date: coupon.expiry_date,
        },
    }
}

pub struct CouponLedger {
    store: Store,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    policy: CouponPolicy,
}

impl CouponLedger {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        policy: CouponPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &CouponPolicy {
        &self.policy
    }

    /// Issue the store credit for a return request. Calling again with the same
    /// `return_request_id` returns the coupon issued the first time.
    pub fn issue(
        &self,
        return_request_id: &str,
        amount: u64,
        customer_email: &str,
    ) -> Result<Coupon, CouponError> {
        let now = self.clock.now();
        let s = &self.store;

        let issued = store::settle((&s.coupons, &s.coupon_codes, &s.coupon_by_return).transaction(
            |(coupons, codes, by_return)| -> ConflictableTransactionResult<Issued, CouponError> {
                let tx = CouponTx {
                    coupons,
                    codes,
                    by_return,
                };
                issue_within::<CouponError>(
                    &tx,
                    &self.policy,
                    return_request_id,
                    amount,
                    customer_email,
                    now,
                )
            },
        ))?;

        if issued.created {
            tracing::info!(
                code = %issued.coupon.code,
                return_id = return_request_id,
                amount,
                "coupon issued"
            );
            collaborators::dispatch(
                self.notifier.as_ref(),
                issued_notification(&issued.coupon),
            );
        } else {
            tracing::debug!(code = %issued.coupon.code, return_id = return_request_id, "coupon already issued");
        }

        Ok(issued.coupon)
    }

    /// Validate a code without touching it.
    pub fn lookup(&self, code: &str, email: Option<&str>) -> Result<CouponView, CouponError> {
        let coupon = self.get_by_code(code)?;
        coupon.check(self.clock.now(), email)?;
        Ok(CouponView::from(&coupon))
    }

    /// Consume one use of `code` for `order_number`.
    pub fn redeem(&self, code: &str, order_number: &str) -> Result<Coupon, CouponError> {
        self.redeem_for(code, order_number, None)
    }

    /// As [`CouponLedger::redeem`], additionally binding the redemption to the issuing customer.
    pub fn redeem_for(
        &self,
        code: &str,
        order_number: &str,
        email: Option<&str>,
    ) -> Result<Coupon, CouponError> {
        let coupon_id = self.coupon_id(code)?;
        let now = self.clock.now();

        let result = store::settle(self.store.coupons.transaction(|coupons| -> ConflictableTransactionResult<Coupon, CouponError> {
            let Some(mut coupon) = store::tx_get::<Coupon, CouponError>(coupons, coupon_id.as_bytes())?
            else {
                return store::abort(CouponError::NotFound(code.to_string()));
            };
            if let Err(e) = coupon.check(now, email) {
                return store::abort(e);
            }

            coupon.usage_count += 1;
            if coupon.usage_count >= coupon.max_usage {
                coupon.status = CouponStatus::Used;
            }
            coupon.used_at = Some(now.into());
            coupon.order_used_in = Some(order_number.to_string());

            store::tx_put::<Coupon, CouponError>(coupons, coupon.id.as_bytes(), &coupon)?;
            Ok(coupon)
        }));

        match &result {
            Ok(coupon) => tracing::info!(
                code,
                order_number,
                usage_count = coupon.usage_count,
                "coupon redeemed"
            ),
            Err(e) => tracing::info!(code, order_number, reason = %e, "coupon redemption refused"),
        }
        result
    }

    /// Withdraw a coupon that has not been spent. Cancelling twice is a no-op.
    pub fn cancel(&self, code: &str) -> Result<Coupon, CouponError> {
        let coupon_id = self.coupon_id(code)?;
        let now = self.clock.now();

        let (coupon, cancelled) = store::settle(self.store.coupons.transaction(
            |coupons| -> ConflictableTransactionResult<(Coupon, bool), CouponError> {
                let Some(mut coupon) =
                    store::tx_get::<Coupon, CouponError>(coupons, coupon_id.as_bytes())?
                else {
                    return store::abort(CouponError::NotFound(code.to_string()));
                };
                match coupon.status {
                    CouponStatus::Used => store::abort(CouponError::InvalidTransition {
                        code: coupon.code.clone(),
                        status: coupon.status,
                    }),
                    CouponStatus::Cancelled => Ok((coupon, false)),
                    CouponStatus::Active => {
                        coupon.status = CouponStatus::Cancelled;
                        coupon.cancelled_at = Some(now.into());
                        store::tx_put::<Coupon, CouponError>(
                            coupons,
                            coupon.id.as_bytes(),
                            &coupon,
                        )?;
                        Ok((coupon, true))
                    }
                }
            },
        ))?;

        if cancelled {
            tracing::info!(code, "coupon cancelled");
        } else {
            tracing::debug!(code, "coupon already cancelled");
        }
        Ok(coupon)
    }

    /// The stored record, whatever its state.
    pub fn get_by_code(&self, code: &str) -> Result<Coupon, CouponError> {
        let coupon_id = self.coupon_id(code)?;
        store::get::<Coupon>(&self.store.coupons, coupon_id.as_bytes())?
            .ok_or_else(|| CouponError::NotFound(code.to_string()))
    }

    pub fn for_return(&self, return_request_id: &str) -> Result<Option<Coupon>, CouponError> {
        let Some(coupon_id) =
            store::get_id(&self.store.coupon_by_return, return_request_id.as_bytes())?
        else {
            return Ok(None);
        };
        Ok(store::get::<Coupon>(&self.store.coupons, coupon_id.as_bytes())?)
    }

    fn coupon_id(&self, code: &str) -> Result<String, CouponError> {
        let code = code.trim().to_uppercase();
        store::get_id(&self.store.coupon_codes, code.as_bytes())?
            .ok_or(CouponError::NotFound(code))
    }
}
