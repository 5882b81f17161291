//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use returns_ledger::{
    clock::FixedClock,
    collaborators::{LabelIssuer, Notification, NotificationSink, ShippingLabel, ShippingProvider},
    config::Config,
    returns::ReturnSubmission,
    service::{Collaborators, ReturnsService},
    types::{LineItem, Order, OrderStatus, Resolution, ReturnKind},
};
use tempfile::TempDir;

pub const EMAIL: &str = "ana.lima@example.com";

/// Remembers every notification it is handed.
#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<Notification>>);

impl RecordingSink {
    pub fn events(&self) -> Vec<Notification> {
        self.0.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, event: &Notification) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A mailer that is always down.
pub struct FailingSink;

impl NotificationSink for FailingSink {
    fn notify(&self, _: &Notification) -> anyhow::Result<()> {
        anyhow::bail!("smtp relay unreachable")
    }
}

/// Counts the labels requested from the carrier.
pub struct CountingShipper {
    inner: LabelIssuer,
    calls: AtomicUsize,
}

impl CountingShipper {
    pub fn new() -> Self {
        Self {
            inner: LabelIssuer::new("https://labels.test"),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ShippingProvider for CountingShipper {
    fn create_label(&self, return_id: &str) -> anyhow::Result<ShippingLabel> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create_label(return_id)
    }
}

pub struct Harness {
    // keeps the database directory alive for the duration of the test
    pub dir: TempDir,
    pub service: ReturnsService,
    pub clock: Arc<FixedClock>,
    pub sink: Arc<RecordingSink>,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn harness() -> anyhow::Result<Harness> {
    let sink = Arc::new(RecordingSink::default());
    harness_with(sink.clone(), sink)
}

pub fn harness_with(
    sink: Arc<RecordingSink>,
    notifier: Arc<dyn NotificationSink>,
) -> anyhow::Result<Harness> {
    build(sink, notifier, None)
}

pub fn harness_with_shipping(shipping: Arc<dyn ShippingProvider>) -> anyhow::Result<Harness> {
    let sink = Arc::new(RecordingSink::default());
    build(sink.clone(), sink, Some(shipping))
}

fn build(
    sink: Arc<RecordingSink>,
    notifier: Arc<dyn NotificationSink>,
    shipping: Option<Arc<dyn ShippingProvider>>,
) -> anyhow::Result<Harness> {
    // Sled locks its directory, so every test gets its own database under a temp dir.
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("returns.db");
    let db = Arc::new(sled::open(&db_path)?);

    let mut config = Config::with_db_path(db_path.to_string_lossy());
    config.coupon_prefix = "EXC".into();
    config.return_window_days = 30;
    config.coupon_validity_months = 6;
    config.coupon_code_attempts = 16;

    let clock = Arc::new(FixedClock::new(start()));
    let mut collaborators = Collaborators::new()
        .with_notifier(notifier)
        .with_clock(clock.clone());
    if let Some(shipping) = shipping {
        collaborators = collaborators.with_shipping(shipping);
    }
    let service = ReturnsService::new(db, &config, collaborators)?;

    Ok(Harness {
        dir,
        service,
        clock,
        sink,
    })
}

pub fn shirt(unit_price: u64, quantity: u32) -> LineItem {
    LineItem {
        product_id: "SHIRT-01".into(),
        name: "Linen shirt".into(),
        size: Some("M".into()),
        quantity,
        unit_price,
    }
}

pub fn trousers(unit_price: u64, quantity: u32) -> LineItem {
    LineItem {
        product_id: "TROUSER-07".into(),
        name: "Chino trousers".into(),
        size: Some("32".into()),
        quantity,
        unit_price,
    }
}

pub fn delivered_order(order_number: &str, delivered_days_ago: i64) -> Order {
    let delivered = start() - Duration::days(delivered_days_ago);
    Order {
        order_number: order_number.into(),
        customer_email: EMAIL.into(),
        customer_name: "Ana Lima".into(),
        status: OrderStatus::Delivered,
        items: vec![shirt(149_000, 1), trousers(89_000, 2)],
        total: 327_000,
        order_date: (delivered - Duration::days(3)).into(),
        delivered_date: Some(delivered.into()),
    }
}

pub fn submission(
    order_number: &str,
    kind: ReturnKind,
    resolution: Resolution,
    items: Vec<LineItem>,
) -> ReturnSubmission {
    ReturnSubmission::new()
        .set_order_number(order_number)
        .set_customer_email(EMAIL)
        .set_customer_name("Ana Lima")
        .set_kind(kind)
        .set_resolution(resolution)
        .set_reason("wrong size")
        .set_items(items)
}
