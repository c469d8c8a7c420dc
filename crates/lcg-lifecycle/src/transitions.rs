//! Transition whitelists
//!
//! # Design
//!
//! Every guarded status column has a fixed table of legal next states. A
//! requested status is accepted only when it is a member of the table row for
//! the current status; anything else is a [`TransitionError`] that carries the
//! full allowed set so callers can surface an actionable message.
//!
//! ```text
//! Order:
//!   pending ──► paid ──► processing ──► filed ──► documents_ready ──► completed (term.)
//!      │          │          │  │  └────────────────────┼──────────────► completed
//!      │          │          │  └──► documents_ready    │
//!      └──────────┴──────────┴────────────┴─────────────┴──► cancelled ──► pending
//!   pending ──► processing
//!
//! Payment:
//!   pending ──► paid (term.)      pending ──► overdue ──► paid
//!   pending|overdue ──► cancelled ──► pending
//! ```
//!
//! Acceptance is decided here without IO. The runtime persists the accepted
//! status and then executes the [`SideEffect`]s returned by the `*_effects`
//! helpers; a rejected request never reaches that step.

use lcg_schemas::{AccountStatus, ApplicationStatus, GuardedEntity, OrderStatus, PaymentStatus};

// ---------------------------------------------------------------------------
// Lifecycle trait
// ---------------------------------------------------------------------------

/// A status vocabulary with a transition whitelist.
pub trait Lifecycle: Copy + PartialEq + Sized + 'static {
    const ENTITY: GuardedEntity;

    /// Whitelist row for `self`. Empty means terminal.
    fn allowed_next(&self) -> &'static [Self];

    fn label(&self) -> &'static str;

    fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }
}

impl Lifecycle for OrderStatus {
    const ENTITY: GuardedEntity = GuardedEntity::Order;

    fn allowed_next(&self) -> &'static [Self] {
        use OrderStatus::*;
        match self {
            Pending => &[Paid, Processing, Cancelled],
            Paid => &[Processing, Cancelled],
            Processing => &[Filed, DocumentsReady, Completed, Cancelled],
            Filed => &[DocumentsReady, Completed, Cancelled],
            DocumentsReady => &[Completed, Cancelled],
            Completed => &[],
            Cancelled => &[Pending],
        }
    }

    fn label(&self) -> &'static str {
        self.as_str()
    }
}

impl Lifecycle for PaymentStatus {
    const ENTITY: GuardedEntity = GuardedEntity::Payment;

    fn allowed_next(&self) -> &'static [Self] {
        use PaymentStatus::*;
        match self {
            Pending => &[Paid, Overdue, Cancelled],
            Overdue => &[Paid, Cancelled],
            Paid => &[],
            Cancelled => &[Pending],
        }
    }

    fn label(&self) -> &'static str {
        self.as_str()
    }
}

impl Lifecycle for ApplicationStatus {
    const ENTITY: GuardedEntity = GuardedEntity::Application;

    fn allowed_next(&self) -> &'static [Self] {
        use ApplicationStatus::*;
        match self {
            Draft => &[Submitted],
            // Back to draft when the customer must correct data.
            Submitted => &[Filed, Rejected, Draft],
            Rejected => &[Draft],
            Filed => &[],
        }
    }

    fn label(&self) -> &'static str {
        self.as_str()
    }
}

impl Lifecycle for AccountStatus {
    const ENTITY: GuardedEntity = GuardedEntity::Account;

    fn allowed_next(&self) -> &'static [Self] {
        use AccountStatus::*;
        match self {
            Pending => &[Active, Deactivated],
            Active => &[Vip, Pending, Deactivated],
            Vip => &[Active, Pending, Deactivated],
            Deactivated => &[Active],
        }
    }

    fn label(&self) -> &'static str {
        self.as_str()
    }
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Returned when a requested status is not in the whitelist row of the
/// current status. Nothing has been written when this is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub entity: GuardedEntity,
    pub from: &'static str,
    pub requested: &'static str,
    /// Legal next states for `from`, in whitelist order. Empty when terminal.
    pub allowed: Vec<&'static str>,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.allowed.is_empty() {
            write!(
                f,
                "invalid {} transition {} -> {}: {} is terminal",
                self.entity.as_str(),
                self.from,
                self.requested,
                self.from
            )
        } else {
            write!(
                f,
                "invalid {} transition {} -> {}; allowed: {}",
                self.entity.as_str(),
                self.from,
                self.requested,
                self.allowed.join(", ")
            )
        }
    }
}

impl std::error::Error for TransitionError {}

/// Validate `current -> requested` against the whitelist.
///
/// Returns the new status on success. Same-state requests are not in any
/// whitelist row and are rejected like every other illegal pair.
pub fn transition<S: Lifecycle>(current: S, requested: S) -> Result<S, TransitionError> {
    let allowed = current.allowed_next();
    if allowed.contains(&requested) {
        return Ok(requested);
    }
    Err(TransitionError {
        entity: S::ENTITY,
        from: current.label(),
        requested: requested.label(),
        allowed: allowed.iter().map(|s| s.label()).collect(),
    })
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

/// Work the runtime performs after an accepted transition has been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Owner account active → vip.
    UpgradeOwnerToVip,
    /// Emit the satisfaction-survey event and email.
    RequestSurvey,
    ComputeComplianceDeadlines,
    ClearComplianceDeadlines,
    /// Set `paid_at` on the order.
    StampPaidAt,
    /// Reset `abandoned_at` when an application leaves draft.
    ClearAbandonment,
}

pub fn order_effects(to: OrderStatus) -> &'static [SideEffect] {
    match to {
        OrderStatus::Completed => &[SideEffect::UpgradeOwnerToVip, SideEffect::RequestSurvey],
        OrderStatus::Filed => &[SideEffect::ComputeComplianceDeadlines],
        OrderStatus::Cancelled => &[SideEffect::ClearComplianceDeadlines],
        _ => &[],
    }
}

pub fn payment_effects(to: PaymentStatus) -> &'static [SideEffect] {
    match to {
        PaymentStatus::Paid => &[SideEffect::StampPaidAt],
        _ => &[],
    }
}

pub fn application_effects(from: ApplicationStatus, to: ApplicationStatus) -> &'static [SideEffect] {
    if from == ApplicationStatus::Draft && to != ApplicationStatus::Draft {
        &[SideEffect::ClearAbandonment]
    } else {
        &[]
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_processing_is_allowed() {
        assert_eq!(
            transition(OrderStatus::Pending, OrderStatus::Processing),
            Ok(OrderStatus::Processing)
        );
    }

    #[test]
    fn pending_to_filed_lists_allowed_states() {
        let err = transition(OrderStatus::Pending, OrderStatus::Filed).unwrap_err();
        assert_eq!(err.entity, GuardedEntity::Order);
        assert_eq!(err.allowed, vec!["paid", "processing", "cancelled"]);
        assert!(err.to_string().contains("allowed: paid, processing, cancelled"));
    }

    #[test]
    fn completed_order_is_terminal() {
        assert!(OrderStatus::Completed.is_terminal());
        for to in OrderStatus::ALL {
            let err = transition(OrderStatus::Completed, to).unwrap_err();
            assert!(err.allowed.is_empty());
        }
    }

    #[test]
    fn every_pair_outside_the_table_is_rejected() {
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                let ok = transition(from, to).is_ok();
                assert_eq!(ok, from.allowed_next().contains(&to), "{from} -> {to}");
            }
        }
        for from in PaymentStatus::ALL {
            for to in PaymentStatus::ALL {
                let ok = transition(from, to).is_ok();
                assert_eq!(ok, from.allowed_next().contains(&to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn same_state_is_never_a_transition() {
        for s in OrderStatus::ALL {
            assert!(transition(s, s).is_err());
        }
        for s in AccountStatus::ALL {
            assert!(transition(s, s).is_err());
        }
    }

    #[test]
    fn paid_payment_is_terminal_and_cancelled_reopens() {
        assert!(PaymentStatus::Paid.is_terminal());
        assert_eq!(
            transition(PaymentStatus::Cancelled, PaymentStatus::Pending),
            Ok(PaymentStatus::Pending)
        );
        assert!(transition(PaymentStatus::Overdue, PaymentStatus::Pending).is_err());
    }

    #[test]
    fn side_effects_follow_target_state() {
        assert_eq!(
            order_effects(OrderStatus::Completed),
            &[SideEffect::UpgradeOwnerToVip, SideEffect::RequestSurvey]
        );
        assert_eq!(
            order_effects(OrderStatus::Filed),
            &[SideEffect::ComputeComplianceDeadlines]
        );
        assert_eq!(
            order_effects(OrderStatus::Cancelled),
            &[SideEffect::ClearComplianceDeadlines]
        );
        assert!(order_effects(OrderStatus::Paid).is_empty());
        assert_eq!(payment_effects(PaymentStatus::Paid), &[SideEffect::StampPaidAt]);
    }

    #[test]
    fn leaving_draft_clears_abandonment() {
        assert_eq!(
            application_effects(ApplicationStatus::Draft, ApplicationStatus::Submitted),
            &[SideEffect::ClearAbandonment]
        );
        assert!(application_effects(ApplicationStatus::Rejected, ApplicationStatus::Draft).is_empty());
    }
}
