//! Whether a delivered order may still open a return or exchange. Read only.
use std::sync::Arc;

use crate::clock::Clock;
use crate::collaborators::OrderSource;
use crate::error::EligibilityError;
use crate::returns::ReturnRequest;
use crate::store::{self, Store};
use crate::types::{Order, OrderStatus};
use crate::utils;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityResult {
    pub order: Order,
    pub days_since_delivery: i64,
    pub remaining_days: i64,
}

pub struct EligibilityValidator {
    orders: Arc<dyn OrderSource>,
    store: Store,
    clock: Arc<dyn Clock>,
    window_days: i64,
}

impl EligibilityValidator {
    pub fn new(
        orders: Arc<dyn OrderSource>,
        store: Store,
        clock: Arc<dyn Clock>,
        window_days: i64,
    ) -> Self {
        Self {
            orders,
            store,
            clock,
            window_days,
        }
    }

    pub fn window_days(&self) -> i64 {
        self.window_days
    }

    pub fn validate(
        &self,
        order_number: &str,
        email: &str,
    ) -> Result<EligibilityResult, EligibilityError> {
        let result = self.check(order_number, email);
        if let Err(reason) = &result {
            tracing::info!(order_number, %reason, "return eligibility refused");
        }
        result
    }

    fn check(&self, order_number: &str, email: &str) -> Result<EligibilityResult, EligibilityError> {
        let order = self
            .orders
            .find_order(order_number, email)
            .map_err(EligibilityError::Source)?
            .ok_or(EligibilityError::NotFound)?;

        if order.status != OrderStatus::Delivered {
            return Err(EligibilityError::NotEligible(format!(
                "not yet delivered (order is {})",
                order.status
            )));
        }
        let Some(delivered) = order.delivered_date else {
            return Err(EligibilityError::NotEligible(
                "not yet delivered (no delivery date recorded)".into(),
            ));
        };

        let elapsed = self.clock.now() - delivered.to_datetime_utc();
        let days_since_delivery = elapsed.num_days().max(0);
        if days_since_delivery > self.window_days {
            return Err(EligibilityError::WindowExpired {
                window_days: self.window_days,
                days_since_delivery,
            });
        }

        if let Some(request_id) = self.open_request(&order.order_number)? {
            return Err(EligibilityError::DuplicateRequest { request_id });
        }

        Ok(EligibilityResult {
            remaining_days: self.window_days - days_since_delivery,
            days_since_delivery,
            order,
        })
    }

    fn open_request(&self, order_number: &str) -> Result<Option<String>, EligibilityError> {
        let key = utils::match_key(order_number);
        let Some(id) = store::get_id(&self.store.open_returns, key.as_bytes())? else {
            return Ok(None);
        };
        let request = store::get::<ReturnRequest>(&self.store.returns, id.as_bytes())?;
        Ok(request.filter(ReturnRequest::is_open).map(|r| r.id))
    }
}
