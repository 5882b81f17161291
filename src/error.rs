use crate::types::{CouponStatus, ReturnStatus, TimeStamp};

/// Infrastructure failures. Fatal to the current request, never a business answer.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode {0} record: {1}")]
    Encode(&'static str, String),
    #[error("failed to decode {0} record: {1}")]
    Decode(&'static str, String),
}

#[derive(thiserror::Error, Debug)]
pub enum EligibilityError {
    #[error("no order matches the supplied number and email")]
    NotFound,
    #[error("order is not eligible for return: {0}")]
    NotEligible(String),
    #[error(
        "the {window_days}-day return window has closed ({days_since_delivery} days since delivery)"
    )]
    WindowExpired {
        window_days: i64,
        days_since_delivery: i64,
    },
    #[error("a return request ({request_id}) is already open for this order")]
    DuplicateRequest { request_id: String },
    #[error("order source unavailable: {0}")]
    Source(anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(thiserror::Error, Debug)]
pub enum CouponError {
    #[error("coupon {0} does not exist")]
    NotFound(String),
    #[error("coupon {code} expired on {expired_at}")]
    Expired { code: String, expired_at: TimeStamp },
    #[error("coupon {code} is {status}")]
    NotActive { code: String, status: CouponStatus },
    #[error("coupon {code} has no uses left")]
    Exhausted { code: String },
    #[error("coupon {code} was issued to a different customer")]
    EmailMismatch { code: String },
    #[error("coupon {code} cannot be cancelled while {status}")]
    InvalidTransition { code: String, status: CouponStatus },
    #[error("no free coupon code found after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CouponError {
    /// Rejections shown to the customer as "coupon not valid".
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CouponError::NotFound(_)
                | CouponError::Expired { .. }
                | CouponError::NotActive { .. }
                | CouponError::Exhausted { .. }
                | CouponError::EmailMismatch { .. }
        )
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ReturnError {
    #[error("invalid return request: {0}")]
    Validation(String),
    #[error("return request {0} does not exist")]
    NotFound(String),
    #[error("a return request ({request_id}) is already open for order {order_number}")]
    DuplicateRequest {
        order_number: String,
        request_id: String,
    },
    #[error("cannot move a return request from {from} to {to}")]
    InvalidTransition { from: ReturnStatus, to: ReturnStatus },
    #[error("shipping label could not be created: {0}")]
    Shipping(anyhow::Error),
    #[error(transparent)]
    Coupon(#[from] CouponError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors of the combined submit path: eligibility first, then creation.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Eligibility(#[from] EligibilityError),
    #[error(transparent)]
    Return(#[from] ReturnError),
}
