//! Walks one exchange through the engine against a scratch database:
//! eligibility, fast-path store credit, checkout redemption.
//!
//! ```text
//! cargo run --example returns_flow
//! ```
use std::sync::{Arc, mpsc};

use chrono::{Duration, Utc};
use returns_ledger::{
    collaborators::ChannelSink,
    config::Config,
    logger,
    returns::ReturnSubmission,
    service::{Collaborators, ReturnsService},
    types::{LineItem, Order, OrderStatus, Resolution, ReturnKind},
};

fn main() -> anyhow::Result<()> {
    let config = Config::with_db_path("returns-demo.db");
    logger::init_logger(&config.log_level);

    // start from a clean slate on every run
    if std::path::Path::new(&config.db_path).exists() {
        std::fs::remove_dir_all(&config.db_path)?;
    }
    let db = sled::open(&config.db_path)?;
    tracing::info!(path = %config.db_path, "demo database ready");

    let (mail_tx, mail_rx) = mpsc::channel();
    let service = ReturnsService::new(
        Arc::new(db),
        &config,
        Collaborators::new().with_notifier(Arc::new(ChannelSink::new(mail_tx))),
    )?;

    let shirt = LineItem {
        product_id: "SHIRT-01".into(),
        name: "Linen shirt".into(),
        size: Some("M".into()),
        quantity: 1,
        unit_price: 149_000,
    };
    let delivered = Utc::now() - Duration::days(5);
    service.catalog().upsert(&Order {
        order_number: "ORD-123456".into(),
        customer_email: "ana.lima@example.com".into(),
        customer_name: "Ana Lima".into(),
        status: OrderStatus::Delivered,
        items: vec![shirt.clone()],
        total: 149_000,
        order_date: (delivered - Duration::days(2)).into(),
        delivered_date: Some(delivered.into()),
    })?;

    let eligible = service.check_eligibility("ORD-123456", "ana.lima@example.com")?;
    println!(
        "eligible: {} days since delivery, {} days left",
        eligible.days_since_delivery, eligible.remaining_days
    );

    let request = service.submit_return(
        ReturnSubmission::new()
            .set_order_number("ORD-123456")
            .set_customer_email("ana.lima@example.com")
            .set_customer_name("Ana Lima")
            .set_kind(ReturnKind::Exchange)
            .set_resolution(Resolution::StoreCredit)
            .set_reason("wrong size")
            .add_item(shirt)
            .set_idempotency_key("demo-1"),
    )?;
    println!("return {} is {}", request.id, request.status);

    for mail in mail_rx.try_iter() {
        println!("mail to {}: {:?}", mail.email, mail.kind);
    }

    if let Some(code) = &request.coupon_code {
        let view = service.coupon_status(code, Some("ana.lima@example.com"))?;
        println!("{} worth {} ({} use left)", view.code, view.amount, view.remaining_uses);

        let spent = service.redeem_coupon(code, "ORD-999", None)?;
        println!("{} is now {}", spent.code, spent.status);

        if let Err(err) = service.redeem_coupon(code, "ORD-1000", None) {
            println!("second redemption refused: {err}");
        }
    }

    service.flush()?;
    Ok(())
}
