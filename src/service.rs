//! Service layer API for the returns and store-credit workflow
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    LabelIssuer, LogSink, NotificationSink, OrderCatalog, OrderSource, ShippingProvider,
};
use crate::config::Config;
use crate::coupon::{Coupon, CouponLedger, CouponPolicy, CouponView};
use crate::eligibility::{EligibilityResult, EligibilityValidator};
use crate::error::{CouponError, EligibilityError, ReturnError, ServiceError, StoreError};
use crate::returns::{ReturnManager, ReturnRequest, ReturnSubmission};
use crate::store::Store;
use crate::transition::StatusChange;
use crate::types::{LineItem, Order, ReturnStatus};

/// External systems the service talks to. Anything left unset gets the local default:
/// the sled order catalog, log-only notifications, locally minted labels and the system clock.
#[derive(Default)]
pub struct Collaborators {
    orders: Option<Arc<dyn OrderSource>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    shipping: Option<Arc<dyn ShippingProvider>>,
    clock: Option<Arc<dyn Clock>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_orders(mut self, orders: Arc<dyn OrderSource>) -> Self {
        self.orders = Some(orders);
        self
    }
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }
    pub fn with_shipping(mut self, shipping: Arc<dyn ShippingProvider>) -> Self {
        self.shipping = Some(shipping);
        self
    }
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

pub struct ReturnsService {
    catalog: OrderCatalog,
    store: Store,
    validator: EligibilityValidator,
    ledger: Arc<CouponLedger>,
    returns: ReturnManager,
}

impl ReturnsService {
    /// Open the database at `config.db_path` with default collaborators.
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        let db = sled::open(&config.db_path)?;
        Self::new(Arc::new(db), config, Collaborators::new())
    }

    pub fn new(
        instance: Arc<sled::Db>,
        config: &Config,
        collaborators: Collaborators,
    ) -> Result<Self, StoreError> {
        let store = Store::new(instance)?;
        let catalog = OrderCatalog::new(&store);

        let orders: Arc<dyn OrderSource> = match collaborators.orders {
            Some(orders) => orders,
            None => Arc::new(catalog.clone()),
        };
        let notifier: Arc<dyn NotificationSink> = match collaborators.notifier {
            Some(notifier) => notifier,
            None => Arc::new(LogSink),
        };
        let shipping: Arc<dyn ShippingProvider> = match collaborators.shipping {
            Some(shipping) => shipping,
            None => Arc::new(LabelIssuer::new(config.label_base_url.clone())),
        };
        let clock: Arc<dyn Clock> = match collaborators.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let validator = EligibilityValidator::new(
            orders,
            store.clone(),
            clock.clone(),
            config.return_window_days,
        );
        let ledger = Arc::new(CouponLedger::new(
            store.clone(),
            clock.clone(),
            notifier.clone(),
            CouponPolicy::from(config),
        ));
        let returns = ReturnManager::new(store.clone(), ledger.clone(), shipping, notifier, clock);

        Ok(Self {
            catalog,
            store,
            validator,
            ledger,
            returns,
        })
    }

    /// The local order snapshot store the storefront syncs into.
    pub fn catalog(&self) -> &OrderCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &CouponLedger {
        &self.ledger
    }

    pub fn returns(&self) -> &ReturnManager {
        &self.returns
    }

    pub fn check_eligibility(
        &self,
        order_number: &str,
        email: &str,
    ) -> Result<EligibilityResult, EligibilityError> {
        self.validator.validate(order_number, email)
    }

    /// Customer submission: eligibility, then creation. A retry carrying the idempotency
    /// key of a submission that already went through returns that request.
    pub fn submit_return(
        &self,
        submission: ReturnSubmission,
    ) -> Result<ReturnRequest, ServiceError> {
        let checked = submission.clone().validate_and_finalise()?;

        if let Some(key) = &checked.idempotency_key
            && let Some(existing) = self
                .returns
                .find_by_idempotency_key(&checked.customer_email, key)?
        {
            return Ok(existing);
        }

        let eligible = self
            .validator
            .validate(&checked.order_number, &checked.customer_email)?;
        ensure_items_belong(&eligible.order, &checked.items)?;

        Ok(self.returns.create(submission)?)
    }

    pub fn return_status(&self, id: &str) -> Result<ReturnRequest, ReturnError> {
        self.returns.get(id)
    }

    pub fn return_history(&self, id: &str) -> Result<Vec<StatusChange>, ReturnError> {
        self.returns.history(id)
    }

    pub fn returns_for_customer(&self, email: &str) -> Result<Vec<ReturnRequest>, ReturnError> {
        self.returns.list_for_customer(email)
    }

    /// Staff-only status change.
    pub fn update_return_status(
        &self,
        id: &str,
        status: ReturnStatus,
        notes: Option<&str>,
    ) -> Result<ReturnRequest, ReturnError> {
        self.returns.update_status(id, status, notes)
    }

    pub fn coupon_status(&self, code: &str, email: Option<&str>) -> Result<CouponView, CouponError> {
        self.ledger.lookup(code, email)
    }

    pub fn coupon(&self, code: &str) -> Result<Coupon, CouponError> {
        self.ledger.get_by_code(code)
    }

    /// Checkout-time redemption against the order being paid.
    pub fn redeem_coupon(
        &self,
        code: &str,
        order_number: &str,
        email: Option<&str>,
    ) -> Result<Coupon, CouponError> {
        self.ledger.redeem_for(code, order_number, email)
    }

    pub fn cancel_coupon(&self, code: &str) -> Result<Coupon, CouponError> {
        self.ledger.cancel(code)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.store.flush()
    }
}

// returned lines must come from the order, at the ordered price and in no more than
// the ordered quantity per product and size
fn ensure_items_belong(order: &Order, items: &[LineItem]) -> Result<(), ReturnError> {
    let mut requested: HashMap<(&str, Option<&str>), u32> = HashMap::new();
    for item in items {
        let lines: Vec<&LineItem> = order
            .items
            .iter()
            .filter(|o| o.product_id == item.product_id && o.size == item.size)
            .collect();
        if lines.is_empty() {
            return Err(ReturnError::Validation(format!(
                "item {} is not part of order {}",
                item.product_id, order.order_number
            )));
        }
        if !lines.iter().any(|o| o.unit_price == item.unit_price) {
            return Err(ReturnError::Validation(format!(
                "item {} was not sold at {}",
                item.product_id, item.unit_price
            )));
        }

        let total = requested
            .entry((item.product_id.as_str(), item.size.as_deref()))
            .or_default();
        *total = total.saturating_add(item.quantity);
        let ordered: u32 = lines.iter().map(|o| o.quantity).sum();
        if *total > ordered {
            return Err(ReturnError::Validation(format!(
                "item {} was ordered {} time(s), {} requested",
                item.product_id, ordered, *total
            )));
        }
    }
    Ok(())
}
