//! Return request state machine
//!
//! ```text
//! pending ──► approved ──► completed
//!    │            │
//!    │            └──► cancelled
//!    ├──► rejected
//!    └──► cancelled
//! ```
//!
//! Allowed moves and the side effects they carry live in one table.
use crate::types::{Resolution, ReturnStatus, TimeStamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Ask the carrier for a return label and tracking number.
    AssignShippingLabel,
    /// Issue the store-credit coupon (store credit resolutions only).
    IssueStoreCredit,
    /// Stamp the refund amount and time (refund resolutions only).
    ComputeRefund,
    /// Cancel an issued coupon that has not been spent.
    VoidStoreCredit,
    /// Drop the order's open-request marker so a new request may be filed.
    ReleaseOrder,
}

impl Effect {
    pub fn applies_to(self, resolution: Resolution) -> bool {
        match self {
            Effect::IssueStoreCredit | Effect::VoidStoreCredit => {
                resolution == Resolution::StoreCredit
            }
            Effect::ComputeRefund => resolution == Resolution::Refund,
            Effect::AssignShippingLabel | Effect::ReleaseOrder => true,
        }
    }
}

#[derive(Debug)]
pub struct Rule {
    pub from: ReturnStatus,
    pub to: ReturnStatus,
    pub effects: &'static [Effect],
}

pub const TRANSITIONS: &[Rule] = &[
    Rule {
        from: ReturnStatus::Pending,
        to: ReturnStatus::Approved,
        effects: &[Effect::AssignShippingLabel, Effect::IssueStoreCredit],
    },
    Rule {
        from: ReturnStatus::Pending,
        to: ReturnStatus::Rejected,
        effects: &[Effect::ReleaseOrder],
    },
    Rule {
        from: ReturnStatus::Pending,
        to: ReturnStatus::Cancelled,
        effects: &[Effect::ReleaseOrder],
    },
    Rule {
        from: ReturnStatus::Approved,
        to: ReturnStatus::Completed,
        effects: &[Effect::ComputeRefund, Effect::ReleaseOrder],
    },
    Rule {
        from: ReturnStatus::Approved,
        to: ReturnStatus::Cancelled,
        effects: &[Effect::VoidStoreCredit, Effect::ReleaseOrder],
    },
];

pub fn rule(from: ReturnStatus, to: ReturnStatus) -> Option<&'static Rule> {
    TRANSITIONS.iter().find(|r| r.from == from && r.to == to)
}

pub fn can_transition(from: ReturnStatus, to: ReturnStatus) -> bool {
    rule(from, to).is_some()
}

/// Effects to run for `from -> to` on a request with `resolution`; `None` when the move is not allowed.
pub fn effects(from: ReturnStatus, to: ReturnStatus, resolution: Resolution) -> Option<Vec<Effect>> {
    rule(from, to).map(|r| {
        r.effects
            .iter()
            .copied()
            .filter(|e| e.applies_to(resolution))
            .collect()
    })
}

/// One entry of a request's audit trail. `from` is `None` for the creation entry.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    #[n(0)]
    pub from: Option<ReturnStatus>,
    #[n(1)]
    pub to: ReturnStatus,
    #[n(2)]
    pub notes: Option<String>,
    #[n(3)]
    pub at: TimeStamp,
}
