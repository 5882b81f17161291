//! Boundaries to the systems around the returns core: the order catalog,
//! customer notifications and the shipping carrier.
use std::sync::mpsc::Sender;

use sled::Tree;

use crate::error::StoreError;
use crate::store::{self, Record, Store};
use crate::types::{Order, TimeStamp};
use crate::utils;

impl Record for Order {
    const KIND: &'static str = "order";
}

/// Read-only view of the storefront's order history.
pub trait OrderSource: Send + Sync {
    fn find_order(&self, order_number: &str, email: &str) -> anyhow::Result<Option<Order>>;
}

/// Order snapshots kept in the `orders` tree, keyed by lower-cased order number.
/// The storefront pushes orders in with [`OrderCatalog::upsert`]; the returns core only reads.
#[derive(Clone)]
pub struct OrderCatalog {
    orders: Tree,
}

impl OrderCatalog {
    pub fn new(store: &Store) -> Self {
        Self {
            orders: store.orders.clone(),
        }
    }

    pub fn upsert(&self, order: &Order) -> Result<(), StoreError> {
        let key = utils::match_key(&order.order_number);
        self.orders.insert(key.as_bytes(), store::encode(order)?)?;
        Ok(())
    }
}

impl OrderSource for OrderCatalog {
    fn find_order(&self, order_number: &str, email: &str) -> anyhow::Result<Option<Order>> {
        let key = utils::match_key(order_number);
        let order: Option<Order> = store::get(&self.orders, key.as_bytes())?;
        Ok(order.filter(|o| utils::same_customer(&o.customer_email, email)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    CouponIssued {
        code: String,
        amount: u64,
        expiry_date: TimeStamp,
    },
    ReturnApproved {
        return_id: String,
        tracking_number: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub email: String,
    pub kind: NotificationKind,
}

/// Customer communication. Delivery is best effort: an error here is logged and dropped.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &Notification) -> anyhow::Result<()>;
}

/// Hands events to a mailer thread over a channel without waiting on delivery.
pub struct ChannelSink {
    sender: Sender<Notification>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Notification>) -> Self {
        Self { sender }
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, event: &Notification) -> anyhow::Result<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("notification mailer has shut down"))
    }
}

/// Writes each event to the log. Useful where no mailer is wired up.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, event: &Notification) -> anyhow::Result<()> {
        tracing::info!(email = %event.email, event = ?event.kind, "customer notification");
        Ok(())
    }
}

/// Send `event`, logging instead of failing when the sink refuses it.
pub(crate) fn dispatch(sink: &dyn NotificationSink, event: Notification) {
    if let Err(err) = sink.notify(&event) {
        tracing::warn!(email = %event.email, error = %err, "notification dropped");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingLabel {
    pub label_url: String,
    pub tracking_number: String,
}

pub trait ShippingProvider: Send + Sync {
    fn create_label(&self, return_id: &str) -> anyhow::Result<ShippingLabel>;
}

/// Mints opaque tracking ids locally and points the label at the configured host.
#[derive(Debug, Clone)]
pub struct LabelIssuer {
    base_url: String,
}

impl LabelIssuer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl ShippingProvider for LabelIssuer {
    fn create_label(&self, return_id: &str) -> anyhow::Result<ShippingLabel> {
        let tracking_number = utils::new_uuid_to_bech32("trk")?;
        let label_url = format!(
            "{}/returns/{}/{}.pdf",
            self.base_url.trim_end_matches('/'),
            return_id,
            tracking_number
        );
        Ok(ShippingLabel {
            label_url,
            tracking_number,
        })
    }
}
