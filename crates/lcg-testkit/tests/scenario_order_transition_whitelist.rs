//! Order and payment transitions go through the whitelist; rejected requests
//! leave state untouched and run no side effect.

use chrono::Duration;
use lcg_runtime::GuardError;
use lcg_schemas::{AccountStatus, ApplicationKind, GuardEvent, OrderStatus, PaymentStatus};
use lcg_testkit::{ComplianceCall, Harness};

#[tokio::test]
async fn pending_to_processing_is_accepted() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (order, _) = h.order_with_draft(owner.id, OrderStatus::Pending, ApplicationKind::Llc, h.now());

    let updated = h
        .rt
        .transitions
        .transition_order(order.id, OrderStatus::Processing, None)
        .await
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Processing);
    assert_eq!(h.store.order(order.id).unwrap().status, OrderStatus::Processing);
    assert!(h.events.events().iter().any(|e| matches!(
        e,
        GuardEvent::StatusChanged { from, to, .. } if from == "pending" && to == "processing"
    )));
}

#[tokio::test]
async fn pending_to_filed_is_rejected_with_allowed_set() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (order, _) = h.order_with_draft(owner.id, OrderStatus::Pending, ApplicationKind::Llc, h.now());

    let err = h
        .rt
        .transitions
        .transition_order(order.id, OrderStatus::Filed, None)
        .await
        .unwrap_err();
    match err {
        GuardError::InvalidTransition(te) => {
            assert_eq!(te.allowed, vec!["paid", "processing", "cancelled"]);
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    assert_eq!(h.store.order(order.id).unwrap(), order);
    assert!(h.events.events().is_empty());
    assert!(h.compliance.calls().is_empty());
}

#[tokio::test]
async fn every_non_whitelisted_pair_leaves_order_unchanged() {
    use lcg_lifecycle::Lifecycle;

    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);

    for from in OrderStatus::ALL {
        for to in OrderStatus::ALL {
            if from.allowed_next().contains(&to) {
                continue;
            }
            let (mut order, _) =
                h.order_with_draft(owner.id, OrderStatus::Pending, ApplicationKind::Llc, h.now());
            order.status = from;
            h.store.put_order(order.clone());

            let res = h.rt.transitions.transition_order(order.id, to, None).await;
            assert!(
                matches!(res, Err(GuardError::InvalidTransition(_))),
                "{from} -> {to} must be rejected"
            );
            assert_eq!(h.store.order(order.id).unwrap(), order, "{from} -> {to} mutated state");
        }
    }
    assert!(h.events.events().is_empty());
    assert!(h.audit.rows().is_empty());
    assert_eq!(h.store.account(owner.id).unwrap().status, AccountStatus::Active);
}

#[tokio::test]
async fn completion_upgrades_owner_and_requests_survey() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (order, _) =
        h.order_with_draft(owner.id, OrderStatus::DocumentsReady, ApplicationKind::Llc, h.now());

    h.rt
        .transitions
        .transition_order(order.id, OrderStatus::Completed, None)
        .await
        .unwrap();

    assert_eq!(h.store.account(owner.id).unwrap().status, AccountStatus::Vip);
    assert!(h.events.names().contains(&"survey_requested"));
    assert_eq!(h.store.outbox_in_category("survey").len(), 1);
}

#[tokio::test]
async fn completion_does_not_promote_an_account_under_review() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Pending, &[]);
    let (order, _) =
        h.order_with_draft(owner.id, OrderStatus::Processing, ApplicationKind::Llc, h.now());

    h.rt
        .transitions
        .transition_order(order.id, OrderStatus::Completed, None)
        .await
        .unwrap();
    assert_eq!(h.store.account(owner.id).unwrap().status, AccountStatus::Pending);
}

#[tokio::test]
async fn filing_computes_and_cancelling_clears_deadlines() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (order, _) =
        h.order_with_draft(owner.id, OrderStatus::Processing, ApplicationKind::Llc, h.now());

    h.rt
        .transitions
        .transition_order(order.id, OrderStatus::Filed, None)
        .await
        .unwrap();
    h.rt
        .transitions
        .transition_order(order.id, OrderStatus::Cancelled, None)
        .await
        .unwrap();

    assert_eq!(
        h.compliance.calls(),
        vec![ComplianceCall::Compute(order.id), ComplianceCall::Clear(order.id)]
    );
}

#[tokio::test]
async fn compliance_failure_does_not_undo_the_transition() {
    let h = Harness::new();
    h.compliance.fail(true);
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (order, _) =
        h.order_with_draft(owner.id, OrderStatus::Processing, ApplicationKind::Llc, h.now());

    let updated = h
        .rt
        .transitions
        .transition_order(order.id, OrderStatus::Filed, None)
        .await
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Filed);
    assert_eq!(h.store.order(order.id).unwrap().status, OrderStatus::Filed);
}

#[tokio::test]
async fn payment_paid_stamps_paid_at_and_is_terminal() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (order, _) = h.order_with_draft(owner.id, OrderStatus::Pending, ApplicationKind::Llc, h.now());

    h.clock.advance(Duration::minutes(5));
    let paid = h
        .rt
        .transitions
        .transition_payment(order.id, PaymentStatus::Paid, None)
        .await
        .unwrap();
    assert_eq!(paid.paid_at, Some(h.now()));
    assert_eq!(h.store.order(order.id).unwrap().paid_at, Some(h.now()));

    let err = h
        .rt
        .transitions
        .transition_payment(order.id, PaymentStatus::Cancelled, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("terminal"), "got: {err}");
}

#[tokio::test]
async fn overdue_then_paid_is_allowed() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (order, _) = h.order_with_draft(owner.id, OrderStatus::Pending, ApplicationKind::Llc, h.now());

    h.rt
        .transitions
        .transition_payment(order.id, PaymentStatus::Overdue, None)
        .await
        .unwrap();
    let o = h
        .rt
        .transitions
        .transition_payment(order.id, PaymentStatus::Paid, None)
        .await
        .unwrap();
    assert_eq!(o.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let h = Harness::new();
    let err = h
        .rt
        .transitions
        .transition_order(uuid::Uuid::new_v4(), OrderStatus::Paid, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn submitting_an_abandoned_draft_clears_abandonment() {
    use lcg_schemas::ApplicationStatus;

    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (_, mut draft) = h.order_with_draft(
        owner.id,
        OrderStatus::Pending,
        ApplicationKind::Maintenance,
        h.now() - Duration::hours(30),
    );
    draft.abandoned_at = Some(h.now() - Duration::hours(2));
    h.store.put_application(draft.clone());

    let submitted = h
        .rt
        .transitions
        .transition_application(
            ApplicationKind::Maintenance,
            draft.id,
            ApplicationStatus::Submitted,
            Some(owner.id),
        )
        .await
        .unwrap();
    assert_eq!(submitted.abandoned_at, None);
    let stored = h.store.application(draft.id).unwrap();
    assert_eq!(stored.status, ApplicationStatus::Submitted);
    assert_eq!(stored.abandoned_at, None);
    assert_eq!(stored.last_updated, h.now());

    let err = h
        .rt
        .transitions
        .transition_application(
            ApplicationKind::Maintenance,
            draft.id,
            ApplicationStatus::Submitted,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
}

#[tokio::test]
async fn reactivating_an_account_clears_the_otp_requirement() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    h.rt
        .fraud
        .flag_account_for_review(owner.id, "manual check")
        .await
        .unwrap();
    assert!(h.store.account(owner.id).unwrap().security_otp_required);

    let admin = uuid::Uuid::new_v4();
    let active = h
        .rt
        .transitions
        .transition_account(owner.id, AccountStatus::Active, Some(admin))
        .await
        .unwrap();
    assert_eq!(active.status, AccountStatus::Active);
    assert!(!h.store.account(owner.id).unwrap().security_otp_required);

    let row = h
        .audit
        .rows()
        .into_iter()
        .rev()
        .find(|r| r.action == "status_changed")
        .unwrap();
    assert_eq!(row.actor_id, Some(admin));
}
