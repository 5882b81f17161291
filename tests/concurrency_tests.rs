//! Races against a shared database: redemption must succeed exactly once, issuance and
//! approval must stay single no matter how many callers retry at the same time.
mod common;

use std::sync::Arc;
use std::thread;

use common::*;
use returns_ledger::{
    clock::FixedClock,
    collaborators::LogSink,
    coupon::{CouponLedger, CouponPolicy},
    error::CouponError,
    store::Store,
    types::{CouponStatus, Resolution, ReturnKind, ReturnStatus},
};

const CALLERS: usize = 16;

fn ledger() -> anyhow::Result<(tempfile::TempDir, CouponLedger)> {
    let dir = tempfile::tempdir()?;
    let store = Store::open(dir.path().join("ledger.db"))?;
    let ledger = CouponLedger::new(
        store,
        Arc::new(FixedClock::new(start())),
        Arc::new(LogSink),
        CouponPolicy {
            prefix: "EXC".into(),
            validity_months: 6,
            code_attempts: 16,
        },
    );
    Ok((dir, ledger))
}

#[test]
fn concurrent_redemptions_succeed_once() -> anyhow::Result<()> {
    let (_dir, ledger) = ledger()?;
    let coupon = ledger.issue("ret-1", 149_000, EMAIL)?;

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|i| {
                let ledger = &ledger;
                let code = coupon.code.clone();
                s.spawn(move || ledger.redeem(&code, &format!("ORD-{i}")))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            failure,
            CouponError::NotActive { .. } | CouponError::Exhausted { .. }
        ));
    }

    let stored = ledger.get_by_code(&coupon.code)?;
    assert_eq!(stored.usage_count, 1);
    assert!(stored.usage_count <= stored.max_usage);
    assert_eq!(stored.status, CouponStatus::Used);

    let winner = results.into_iter().find_map(Result::ok).unwrap();
    assert_eq!(stored.order_used_in, winner.order_used_in);
    Ok(())
}

#[test]
fn concurrent_issuance_yields_one_coupon() -> anyhow::Result<()> {
    let (_dir, ledger) = ledger()?;

    let codes: Vec<String> = thread::scope(|s| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let ledger = &ledger;
                s.spawn(move || ledger.issue("ret-1", 149_000, EMAIL).map(|c| c.code))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect()
    });

    assert!(codes.windows(2).all(|w| w[0] == w[1]));
    let coupon = ledger.for_return("ret-1")?.unwrap();
    assert_eq!(coupon.code, codes[0]);
    Ok(())
}

#[test]
fn issuing_for_different_returns_never_reuses_a_code() -> anyhow::Result<()> {
    let (_dir, ledger) = ledger()?;

    let mut codes = Vec::new();
    for i in 0..200 {
        codes.push(ledger.issue(&format!("ret-{i}"), 1_000, EMAIL)?.code);
    }
    codes.sort();
    codes.dedup();
    assert_eq!(codes.len(), 200);
    Ok(())
}

#[test]
fn racing_approvals_apply_effects_once() -> anyhow::Result<()> {
    let h = harness()?;
    h.service.catalog().upsert(&delivered_order("ORD-123456", 5))?;
    let request = h.service.submit_return(submission(
        "ORD-123456",
        ReturnKind::Return,
        Resolution::StoreCredit,
        vec![shirt(149_000, 1)],
    ))?;

    let outcomes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let service = &h.service;
                let id = request.id.clone();
                s.spawn(move || service.update_return_status(&id, ReturnStatus::Approved, None))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let codes: Vec<_> = outcomes
        .into_iter()
        .map(|r| r.map(|req| req.coupon_code))
        .collect::<Result<_, _>>()?;
    assert!(codes.iter().all(|c| c.is_some() && *c == codes[0]));

    let history = h.service.return_history(&request.id)?;
    let approvals = history
        .iter()
        .filter(|c| c.to == ReturnStatus::Approved)
        .count();
    assert_eq!(approvals, 1);
    Ok(())
}
