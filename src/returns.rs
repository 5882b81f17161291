//! Return and exchange requests
//!
//! A request is created `pending` and moves through the table in [`crate::transition`].
//! Every status change is one sled transaction that re-reads the record, checks it is
//! still in the state the caller saw, runs the transition's effects and appends to the
//! audit trail. Store-credit issuance runs inside that same transaction, so an approved
//! store-credit request and its coupon are committed together or not at all.
use std::sync::Arc;

use sled::Transactional;
use sled::transaction::ConflictableTransactionResult;
use uuid7::uuid7;

use crate::clock::Clock;
use crate::collaborators::{
    self, Notification, NotificationKind, NotificationSink, ShippingLabel, ShippingProvider,
};
use crate::coupon::{self, Coupon, CouponLedger, CouponTx, Issued};
use crate::error::ReturnError;
use crate::store::{self, Record, Store};
use crate::transition::{self, Effect, StatusChange};
use crate::types::{LineItem, Resolution, ReturnKind, ReturnStatus, TimeStamp};
use crate::utils;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ReturnRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub order_number: String,
    #[n(2)]
    pub customer_email: String,
    #[n(3)]
    pub customer_name: String,
    #[n(4)]
    pub kind: ReturnKind,
    #[n(5)]
    pub resolution: Resolution,
    #[n(6)]
    pub reason: String,
    #[n(7)]
    pub items: Vec<LineItem>, // prices as they were when the request was filed
    #[n(8)]
    pub status: ReturnStatus,
    #[n(9)]
    pub coupon_code: Option<String>,
    #[n(10)]
    pub coupon_amount: Option<u64>,
    #[n(11)]
    pub shipping_label_url: Option<String>,
    #[n(12)]
    pub tracking_number: Option<String>,
    #[n(13)]
    pub refund_amount: Option<u64>,
    #[n(14)]
    pub refund_processed_at: Option<TimeStamp>,
    #[n(15)]
    pub notes: Option<String>,
    #[n(16)]
    pub created_at: TimeStamp,
    #[n(17)]
    pub updated_at: TimeStamp,
}

impl Record for ReturnRequest {
    const KIND: &'static str = "return request";
}

impl Record for Vec<StatusChange> {
    const KIND: &'static str = "return history";
}

impl ReturnRequest {
    pub fn total(&self) -> Result<u64, ReturnError> {
        utils::line_total(&self.items)
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Exchanges settled in store credit skip manual review.
    pub fn is_fast_path(&self) -> bool {
        self.kind == ReturnKind::Exchange && self.resolution == Resolution::StoreCredit
    }
}

/// Draft of a customer's return submission. Assembled field by field, then checked
/// with [`ReturnSubmission::validate_and_finalise`].
#[derive(Debug, Default, Clone)]
pub struct ReturnSubmission {
    order_number: Option<String>,
    customer_email: Option<String>,
    customer_name: Option<String>,
    kind: Option<ReturnKind>,
    resolution: Option<Resolution>,
    reason: Option<String>,
    items: Vec<LineItem>,
    idempotency_key: Option<String>,
}

/// A submission that passed validation.
#[derive(Debug, Clone)]
pub struct NewReturn {
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: String,
    pub kind: ReturnKind,
    pub resolution: Resolution,
    pub reason: String,
    pub items: Vec<LineItem>,
    pub total: u64,
    pub idempotency_key: Option<String>,
}

impl NewReturn {
    pub fn is_fast_path(&self) -> bool {
        self.kind == ReturnKind::Exchange && self.resolution == Resolution::StoreCredit
    }
}

impl ReturnSubmission {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_order_number(mut self, order_number: &str) -> Self {
        self.order_number = Some(order_number.trim().to_string());
        self
    }
    pub fn set_customer_email(mut self, email: &str) -> Self {
        self.customer_email = Some(email.trim().to_string());
        self
    }
    pub fn set_customer_name(mut self, name: &str) -> Self {
        self.customer_name = Some(name.trim().to_string());
        self
    }
    pub fn set_kind(mut self, kind: ReturnKind) -> Self {
        self.kind = Some(kind);
        self
    }
    pub fn set_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }
    pub fn set_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.trim().to_string());
        self
    }
    pub fn add_item(mut self, item: LineItem) -> Self {
        self.items.push(item);
        self
    }
    pub fn set_items(mut self, items: Vec<LineItem>) -> Self {
        self.items = items;
        self
    }
    /// Key the caller reuses when retrying the same submission.
    pub fn set_idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(key.to_string());
        self
    }

    pub fn order_number(&self) -> Option<&str> {
        self.order_number.as_deref()
    }
    pub fn customer_email(&self) -> Option<&str> {
        self.customer_email.as_deref()
    }
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn validate_and_finalise(self) -> Result<NewReturn, ReturnError> {
        let order_number = required(self.order_number, "order number")?;
        let customer_email = required(self.customer_email, "customer email")?;
        let kind = self
            .kind
            .ok_or_else(|| ReturnError::Validation("return kind is required".into()))?;
        let resolution = self
            .resolution
            .ok_or_else(|| ReturnError::Validation("resolution is required".into()))?;
        if self.items.is_empty() {
            return Err(ReturnError::Validation(
                "at least one item must be returned".into(),
            ));
        }
        if let Some(item) = self.items.iter().find(|i| i.quantity == 0) {
            return Err(ReturnError::Validation(format!(
                "item {} has a zero quantity",
                item.product_id
            )));
        }
        let total = utils::line_total(&self.items)?;

        Ok(NewReturn {
            order_number,
            customer_email,
            customer_name: self.customer_name.unwrap_or_default(),
            kind,
            resolution,
            reason: self.reason.unwrap_or_default(),
            items: self.items,
            total,
            idempotency_key: self.idempotency_key.filter(|k| !k.trim().is_empty()),
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ReturnError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ReturnError::Validation(format!("{field} is required"))),
    }
}

// idempotency keys are scoped to the customer so two shoppers cannot collide
fn idempotency_slot(email: &str, key: &str) -> String {
    sha256::digest(format!("{}:{}", utils::match_key(email), key))
}

/// Outcome of a committed create or status transaction.
struct Applied {
    request: ReturnRequest,
    issued: Option<Issued>,
    voided: Option<Coupon>,
    changed: bool,
}

pub struct ReturnManager {
    store: Store,
    ledger: Arc<CouponLedger>,
    shipping: Arc<dyn ShippingProvider>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl ReturnManager {
    pub fn new(
        store: Store,
        ledger: Arc<CouponLedger>,
        shipping: Arc<dyn ShippingProvider>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            shipping,
            notifier,
            clock,
        }
    }

    /// File a new request. Callers run eligibility first.
    ///
    /// Exchanges for store credit are approved in the same transaction: the label is
    /// assigned, the coupon issued and the record committed as `approved`. Everything
    /// else waits in `pending` for review.
    pub fn create(&self, submission: ReturnSubmission) -> Result<ReturnRequest, ReturnError> {
        let new = submission.validate_and_finalise()?;
        let slot = new
            .idempotency_key
            .as_deref()
            .map(|key| idempotency_slot(&new.customer_email, key));

        if let Some(slot) = &slot
            && let Some(existing) = self.replay(slot)?
        {
            tracing::debug!(return_id = %existing.id, "return submission replayed");
            return Ok(existing);
        }

        // refuse before the carrier is asked for a label; the transaction re-checks
        if let Some(open) = self.open_for_order(&new.order_number)? {
            return Err(ReturnError::DuplicateRequest {
                order_number: new.order_number.clone(),
                request_id: open.id,
            });
        }

        let id = uuid7().to_string();
        let label = if new.is_fast_path() {
            Some(self.label_for(&id)?)
        } else {
            None
        };
        let now = self.clock.now();
        let order_key = utils::match_key(&new.order_number);
        let policy = self.ledger.policy();
        let s = &self.store;

        let applied = store::settle(
            (
                &s.returns,
                &s.return_history,
                &s.open_returns,
                &s.idempotency,
                &s.coupons,
                &s.coupon_codes,
                &s.coupon_by_return,
            )
                .transaction(
                    |(returns, history, open, idempotency, coupons, codes, by_return)|
                     -> ConflictableTransactionResult<Applied, ReturnError> {
                        if let Some(slot) = &slot
                            && let Some(existing_id) =
                                store::tx_get_id::<ReturnError>(idempotency, slot.as_bytes())?
                        {
                            let Some(request) = store::tx_get::<ReturnRequest, ReturnError>(
                                returns,
                                existing_id.as_bytes(),
                            )?
                            else {
                                return store::abort(ReturnError::NotFound(existing_id));
                            };
                            return Ok(Applied {
                                request,
                                issued: None,
                                voided: None,
                                changed: false,
                            });
                        }

                        if let Some(open_id) =
                            store::tx_get_id::<ReturnError>(open, order_key.as_bytes())?
                        {
                            return store::abort(ReturnError::DuplicateRequest {
                                order_number: new.order_number.clone(),
                                request_id: open_id,
                            });
                        }

                        let mut request = ReturnRequest {
                            id: id.clone(),
                            order_number: new.order_number.clone(),
                            customer_email: new.customer_email.clone(),
                            customer_name: new.customer_name.clone(),
                            kind: new.kind,
                            resolution: new.resolution,
                            reason: new.reason.clone(),
                            items: new.items.clone(),
                            status: ReturnStatus::Pending,
                            coupon_code: None,
                            coupon_amount: None,
                            shipping_label_url: None,
                            tracking_number: None,
                            refund_amount: None,
                            refund_processed_at: None,
                            notes: None,
                            created_at: now.into(),
                            updated_at: now.into(),
                        };
                        let mut trail = vec![StatusChange {
                            from: None,
                            to: ReturnStatus::Pending,
                            notes: None,
                            at: now.into(),
                        }];

                        let mut issued = None;
                        if let Some(label) = &label {
                            let tx = CouponTx {
                                coupons,
                                codes,
                                by_return,
                            };
                            let credit = coupon::issue_within::<ReturnError>(
                                &tx,
                                policy,
                                &request.id,
                                new.total,
                                &request.customer_email,
                                now,
                            )?;
                            assign_label(&mut request, label);
                            request.coupon_code = Some(credit.coupon.code.clone());
                            request.coupon_amount = Some(credit.coupon.amount);
                            request.status = ReturnStatus::Approved;
                            trail.push(StatusChange {
                                from: Some(ReturnStatus::Pending),
                                to: ReturnStatus::Approved,
                                notes: None,
                                at: now.into(),
                            });
                            issued = Some(credit);
                        }

                        store::tx_put::<_, ReturnError>(returns, request.id.as_bytes(), &request)?;
                        store::tx_put::<_, ReturnError>(history, request.id.as_bytes(), &trail)?;
                        open.insert(order_key.as_bytes(), request.id.as_bytes())?;
                        if let Some(slot) = &slot {
                            idempotency.insert(slot.as_bytes(), request.id.as_bytes())?;
                        }

                        Ok(Applied {
                            request,
                            issued,
                            voided: None,
                            changed: true,
                        })
                    },
                ),
        )?;

        if applied.changed {
            tracing::info!(
                return_id = %applied.request.id,
                order_number = %applied.request.order_number,
                status = %applied.request.status,
                "return request created"
            );
        }
        self.announce(&applied);
        Ok(applied.request)
    }

    /// Move a request to `new_status`, running the transition's effects exactly once.
    ///
    /// Repeating the call that produced the current state (same target, same notes)
    /// returns the stored record and runs nothing again.
    pub fn update_status(
        &self,
        id: &str,
        new_status: ReturnStatus,
        notes: Option<&str>,
    ) -> Result<ReturnRequest, ReturnError> {
        let current = self.get(id)?;
        let notes = notes.map(str::to_string);

        if current.status == new_status {
            if self.is_replay(id, new_status, &notes)? {
                return Ok(current);
            }
            return Err(ReturnError::InvalidTransition {
                from: current.status,
                to: new_status,
            });
        }

        let Some(effects) = transition::effects(current.status, new_status, current.resolution)
        else {
            return Err(ReturnError::InvalidTransition {
                from: current.status,
                to: new_status,
            });
        };

        let label = if effects.contains(&Effect::AssignShippingLabel)
            && current.shipping_label_url.is_none()
        {
            Some(self.label_for(id)?)
        } else {
            None
        };

        let expected = current.status;
        let now = self.clock.now();
        let order_key = utils::match_key(&current.order_number);
        let policy = self.ledger.policy();
        let s = &self.store;

        let applied = store::settle(
            (
                &s.returns,
                &s.return_history,
                &s.open_returns,
                &s.coupons,
                &s.coupon_codes,
                &s.coupon_by_return,
            )
                .transaction(
                    |(returns, history, open, coupons, codes, by_return)|
                     -> ConflictableTransactionResult<Applied, ReturnError> {
                    let Some(mut request) =
                        store::tx_get::<ReturnRequest, ReturnError>(returns, id.as_bytes())?
                    else {
                        return store::abort(ReturnError::NotFound(id.to_string()));
                    };
                    let mut trail = store::tx_get::<Vec<StatusChange>, ReturnError>(
                        history,
                        id.as_bytes(),
                    )?
                    .unwrap_or_default();

                    if request.status != expected {
                        // somebody else moved it first
                        if request.status == new_status && last_change_matches(&trail, new_status, &notes) {
                            return Ok(Applied {
                                request,
                                issued: None,
                                voided: None,
                                changed: false,
                            });
                        }
                        return store::abort(ReturnError::InvalidTransition {
                            from: request.status,
                            to: new_status,
                        });
                    }

                    let mut issued = None;
                    let mut voided = None;
                    for effect in &effects {
                        match effect {
                            Effect::AssignShippingLabel => {
                                if let Some(label) = &label {
                                    assign_label(&mut request, label);
                                }
                            }
                            Effect::IssueStoreCredit => {
                                if request.coupon_code.is_none() {
                                    let amount = match request.total() {
                                        Ok(amount) => amount,
                                        Err(e) => return store::abort(e),
                                    };
                                    let tx = CouponTx {
                                        coupons,
                                        codes,
                                        by_return,
                                    };
                                    let credit = coupon::issue_within::<ReturnError>(
                                        &tx,
                                        policy,
                                        &request.id,
                                        amount,
                                        &request.customer_email,
                                        now,
                                    )?;
                                    request.coupon_code = Some(credit.coupon.code.clone());
                                    request.coupon_amount = Some(credit.coupon.amount);
                                    issued = Some(credit);
                                }
                            }
                            Effect::ComputeRefund => {
                                if request.refund_amount.is_none() {
                                    let amount = match request.total() {
                                        Ok(amount) => amount,
                                        Err(e) => return store::abort(e),
                                    };
                                    request.refund_amount = Some(amount);
                                    request.refund_processed_at = Some(now.into());
                                }
                            }
                            Effect::VoidStoreCredit => {
                                if let Some(coupon_id) =
                                    store::tx_get_id::<ReturnError>(by_return, request.id.as_bytes())?
                                {
                                    voided = coupon::void_within::<ReturnError>(coupons, &coupon_id, now)?;
                                }
                            }
                            Effect::ReleaseOrder => {
                                let held = store::tx_get_id::<ReturnError>(open, order_key.as_bytes())?;
                                if held.as_deref() == Some(request.id.as_str()) {
                                    open.remove(order_key.as_bytes())?;
                                }
                            }
                        }
                    }

                    request.status = new_status;
                    if notes.is_some() {
                        request.notes = notes.clone();
                    }
                    request.updated_at = now.into();
                    trail.push(StatusChange {
                        from: Some(expected),
                        to: new_status,
                        notes: notes.clone(),
                        at: now.into(),
                    });

                    store::tx_put::<_, ReturnError>(returns, request.id.as_bytes(), &request)?;
                    store::tx_put::<_, ReturnError>(history, request.id.as_bytes(), &trail)?;

                    Ok(Applied {
                        request,
                        issued,
                        voided,
                        changed: true,
                    })
                }),
        )?;

        if applied.changed {
            tracing::info!(
                return_id = id,
                from = %expected,
                to = %new_status,
                "return request status changed"
            );
        }
        self.announce(&applied);
        Ok(applied.request)
    }

    pub fn get(&self, id: &str) -> Result<ReturnRequest, ReturnError> {
        store::get::<ReturnRequest>(&self.store.returns, id.as_bytes())?
            .ok_or_else(|| ReturnError::NotFound(id.to_string()))
    }

    /// Audit trail of a request, oldest first.
    pub fn history(&self, id: &str) -> Result<Vec<StatusChange>, ReturnError> {
        store::get::<Vec<StatusChange>>(&self.store.return_history, id.as_bytes())?
            .ok_or_else(|| ReturnError::NotFound(id.to_string()))
    }

    /// The pending or approved request holding `order_number`, if any.
    pub fn open_for_order(&self, order_number: &str) -> Result<Option<ReturnRequest>, ReturnError> {
        let key = utils::match_key(order_number);
        let Some(id) = store::get_id(&self.store.open_returns, key.as_bytes())? else {
            return Ok(None);
        };
        Ok(store::get::<ReturnRequest>(&self.store.returns, id.as_bytes())?
            .filter(ReturnRequest::is_open))
    }

    pub fn list_for_order(&self, order_number: &str) -> Result<Vec<ReturnRequest>, ReturnError> {
        let key = utils::match_key(order_number);
        let mut found = store::scan::<ReturnRequest>(&self.store.returns, |r| {
            utils::match_key(&r.order_number) == key
        })?;
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    pub fn list_for_customer(&self, email: &str) -> Result<Vec<ReturnRequest>, ReturnError> {
        let mut found = store::scan::<ReturnRequest>(&self.store.returns, |r| {
            utils::same_customer(&r.customer_email, email)
        })?;
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    /// The request an earlier submission with this idempotency key created, if any.
    pub fn find_by_idempotency_key(
        &self,
        email: &str,
        key: &str,
    ) -> Result<Option<ReturnRequest>, ReturnError> {
        self.replay(&idempotency_slot(email, key))
    }

    fn replay(&self, slot: &str) -> Result<Option<ReturnRequest>, ReturnError> {
        match store::get_id(&self.store.idempotency, slot.as_bytes())? {
            Some(id) => self.get(&id).map(Some),
            None => Ok(None),
        }
    }

    fn is_replay(
        &self,
        id: &str,
        status: ReturnStatus,
        notes: &Option<String>,
    ) -> Result<bool, ReturnError> {
        let trail = self.history(id)?;
        Ok(last_change_matches(&trail, status, notes))
    }

    fn label_for(&self, id: &str) -> Result<ShippingLabel, ReturnError> {
        self.shipping.create_label(id).map_err(ReturnError::Shipping)
    }

    // customer mail goes out only after the transaction committed
    fn announce(&self, applied: &Applied) {
        if !applied.changed {
            return;
        }
        let request = &applied.request;

        if let Some(issued) = applied.issued.as_ref().filter(|i| i.created) {
            tracing::info!(
                code = %issued.coupon.code,
                return_id = %request.id,
                amount = issued.coupon.amount,
                "coupon issued"
            );
            collaborators::dispatch(
                self.notifier.as_ref(),
                coupon::issued_notification(&issued.coupon),
            );
        }
        if let Some(voided) = &applied.voided {
            tracing::info!(code = %voided.code, return_id = %request.id, "store credit voided with its return");
        }
        if request.status == ReturnStatus::Approved {
            collaborators::dispatch(
                self.notifier.as_ref(),
                Notification {
                    email: request.customer_email.clone(),
                    kind: NotificationKind::ReturnApproved {
                        return_id: request.id.clone(),
                        tracking_number: request.tracking_number.clone(),
                    },
                },
            );
        }
    }
}

fn assign_label(request: &mut ReturnRequest, label: &ShippingLabel) {
    request.shipping_label_url = Some(label.label_url.clone());
    request.tracking_number = Some(label.tracking_number.clone());
}

// only an applied transition can be replayed; the creation entry cannot
fn last_change_matches(trail: &[StatusChange], status: ReturnStatus, notes: &Option<String>) -> bool {
    trail
        .last()
        .is_some_and(|last| last.from.is_some() && last.to == status && &last.notes == notes)
}
