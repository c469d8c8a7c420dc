//! Draft reclaim sweeps: stamp once, bounded reminders, delete with the order.

use chrono::Duration;
use lcg_runtime::{CascadeStep, SweepLease, SweepOutcome, SweepReport, SWEEP_LEASE_NAME};
use lcg_schemas::{AccountStatus, Application, ApplicationKind, OrderStatus};
use lcg_testkit::Harness;

const HOLDER: &str = "worker-a";

async fn sweep(h: &Harness) -> SweepReport {
    match h.rt.reclaimer.sweep_once(HOLDER).await.unwrap() {
        SweepOutcome::Completed(r) => r,
        SweepOutcome::Skipped => panic!("sweep unexpectedly skipped"),
    }
}

fn app(h: &Harness, id: uuid::Uuid) -> Application {
    h.store.application(id).expect("application present")
}

#[tokio::test]
async fn thirty_hour_idle_draft_is_marked_and_first_reminder_queued() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (_, draft) = h.order_with_draft(
        owner.id,
        OrderStatus::Pending,
        ApplicationKind::Llc,
        h.now() - Duration::hours(30),
    );

    let report = sweep(&h).await;
    assert_eq!(report.marked, 1);
    assert_eq!(report.reminded, 1);
    assert_eq!(report.deleted, 0);

    let a = app(&h, draft.id);
    assert_eq!(a.abandoned_at, Some(h.now()));
    assert_eq!(a.reminders_sent, 1);
    assert_eq!(a.status, lcg_schemas::ApplicationStatus::Draft);

    let reminders = h.store.outbox_in_category("abandonment_reminder");
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].email.to, "ana@example.com");
    assert!(reminders[0].email.body.contains("48 horas"), "{}", reminders[0].email.body);
}

#[tokio::test]
async fn fresh_drafts_are_left_alone() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (_, draft) = h.order_with_draft(
        owner.id,
        OrderStatus::Pending,
        ApplicationKind::Maintenance,
        h.now() - Duration::hours(23),
    );

    let report = sweep(&h).await;
    assert_eq!(report, SweepReport { started_at: Some(h.now()), ..SweepReport::default() });
    assert_eq!(app(&h, draft.id).abandoned_at, None);
}

#[tokio::test]
async fn a_draft_is_stamped_abandoned_exactly_once() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (_, draft) = h.order_with_draft(
        owner.id,
        OrderStatus::Pending,
        ApplicationKind::Llc,
        h.now() - Duration::hours(30),
    );

    let stamped = h.now();
    assert_eq!(sweep(&h).await.marked, 1);
    for _ in 0..4 {
        h.clock.advance(Duration::hours(1));
        assert_eq!(sweep(&h).await.marked, 0);
    }
    assert_eq!(app(&h, draft.id).abandoned_at, Some(stamped));
}

#[tokio::test]
async fn reminders_are_spaced_and_capped_at_three() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (_, draft) = h.order_with_draft(
        owner.id,
        OrderStatus::Pending,
        ApplicationKind::Llc,
        h.now() - Duration::hours(25),
    );

    sweep(&h).await;
    assert_eq!(app(&h, draft.id).reminders_sent, 1);

    // Inside the spacing window nothing goes out.
    h.clock.advance(Duration::hours(12));
    assert_eq!(sweep(&h).await.reminded, 0);

    h.clock.advance(Duration::hours(1));
    assert_eq!(sweep(&h).await.reminded, 1);
    h.clock.advance(Duration::hours(13));
    assert_eq!(sweep(&h).await.reminded, 1);
    assert_eq!(app(&h, draft.id).reminders_sent, 3);

    h.clock.advance(Duration::hours(13));
    let report = sweep(&h).await;
    assert_eq!(report.reminded, 0);
    assert_eq!(app(&h, draft.id).reminders_sent, 3);
    assert_eq!(h.store.outbox_in_category("abandonment_reminder").len(), 3);
}

#[tokio::test]
async fn no_reminder_once_the_deletion_horizon_is_reached() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (_, mut draft) = h.order_with_draft(
        owner.id,
        OrderStatus::Pending,
        ApplicationKind::Llc,
        h.now() - Duration::hours(80),
    );
    draft.abandoned_at = Some(h.now() - Duration::hours(48));
    h.store.put_application(draft.clone());

    let report = sweep(&h).await;
    assert_eq!(report.reminded, 0);
    assert_eq!(report.reminders_skipped, 1);
    // Exactly at the horizon: not yet past it, so still present.
    assert_eq!(report.deleted, 0);
    assert!(h.store.outbox_in_category("abandonment_reminder").is_empty());
    assert_eq!(app(&h, draft.id).reminders_sent, 0);
}

#[tokio::test]
async fn draft_abandoned_past_horizon_is_deleted_with_its_order() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (order, draft) = h.order_with_draft(
        owner.id,
        OrderStatus::Pending,
        ApplicationKind::Maintenance,
        h.now() - Duration::hours(30),
    );
    sweep(&h).await;

    h.clock.advance(Duration::hours(49));
    let report = sweep(&h).await;
    assert_eq!(report.deleted, 1);
    assert_eq!(report.delete_failures, 0);

    assert!(h.store.application(draft.id).is_none());
    assert!(h.store.order(order.id).is_none());
    assert_eq!(h.store.dependents_of(order.id), (0, 0, 0, 0));
    assert!(h.store.orphaned_applications().is_empty());
    // The owner's own notification is not tied to the order.
    assert_eq!(h.store.notifications_for(owner.id), 1);

    assert!(h.audit.actions().contains(&"application_reclaimed".to_string()));
    assert!(h.events.names().contains(&"application_reclaimed"));
}

#[tokio::test]
async fn submitted_applications_are_never_reclaimed() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (order, mut submitted) = h.order_with_draft(
        owner.id,
        OrderStatus::Paid,
        ApplicationKind::Llc,
        h.now() - Duration::hours(200),
    );
    submitted.status = lcg_schemas::ApplicationStatus::Submitted;
    h.store.put_application(submitted.clone());

    h.clock.advance(Duration::hours(100));
    let report = sweep(&h).await;
    assert_eq!((report.marked, report.reminded, report.deleted), (0, 0, 0));
    assert!(h.store.order(order.id).is_some());
}

#[tokio::test]
async fn failed_cascade_rolls_back_and_is_retried_next_sweep() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (order, draft) = h.order_with_draft(
        owner.id,
        OrderStatus::Pending,
        ApplicationKind::Llc,
        h.now() - Duration::hours(30),
    );
    sweep(&h).await;
    h.clock.advance(Duration::hours(50));

    h.store.fail_cascade_at(Some(CascadeStep::Application));
    let report = sweep(&h).await;
    assert_eq!(report.deleted, 0);
    assert_eq!(report.delete_failures, 1);
    assert!(h.store.application(draft.id).is_some());
    assert!(h.store.order(order.id).is_some());
    assert_eq!(h.store.dependents_of(order.id), (2, 1, 1, 1));

    h.store.fail_cascade_at(None);
    h.clock.advance(Duration::minutes(5));
    let report = sweep(&h).await;
    assert_eq!(report.deleted, 1);
    assert!(h.store.order(order.id).is_none());
}

#[tokio::test]
async fn overdue_backlog_does_not_starve_reminders_for_due_drafts() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let abandon = |idle: i64, abandoned: i64| {
        let (_, draft) = h.order_with_draft(
            owner.id,
            OrderStatus::Pending,
            ApplicationKind::Llc,
            h.now() - Duration::hours(idle),
        );
        let mut a = app(&h, draft.id);
        a.abandoned_at = Some(h.now() - Duration::hours(abandoned));
        h.store.put_application(a.clone());
        a
    };
    for _ in 0..45 {
        abandon(84, 60);
    }
    let due = abandon(34, 10);

    // Every cleanup fails, so the overdue rows stay put across sweeps.
    h.store.fail_cascade_at(Some(CascadeStep::Application));
    let report = sweep(&h).await;
    assert_eq!(report.reminded, 1);
    assert_eq!(report.reminders_skipped, 0);
    assert_eq!(app(&h, due.id).reminders_sent, 1);
    assert_eq!(h.store.outbox_in_category("abandonment_reminder").len(), 1);
}

#[tokio::test]
async fn failed_enqueue_leaves_the_reminder_for_the_next_sweep() {
    let h = Harness::new();
    let owner = h.account("ana@example.com", AccountStatus::Active, &[]);
    let (_, draft) = h.order_with_draft(
        owner.id,
        OrderStatus::Pending,
        ApplicationKind::Llc,
        h.now() - Duration::hours(30),
    );

    h.store.fail_enqueue(true);
    let report = sweep(&h).await;
    assert_eq!(report.marked, 1);
    assert_eq!(report.reminded, 0);
    assert_eq!(report.reminders_skipped, 1);
    assert_eq!(app(&h, draft.id).reminders_sent, 0);

    h.store.fail_enqueue(false);
    h.clock.advance(Duration::minutes(5));
    assert_eq!(sweep(&h).await.reminded, 1);
    assert_eq!(app(&h, draft.id).reminders_sent, 1);
}

#[tokio::test]
async fn sweep_is_skipped_while_another_instance_holds_the_lease() {
    let h = Harness::new();
    let ttl = h.rt.reclaimer.settings().lease_ttl;
    assert!(h
        .store
        .try_acquire(SWEEP_LEASE_NAME, "worker-b", h.now(), ttl)
        .await
        .unwrap());

    assert_eq!(
        h.rt.reclaimer.sweep_once(HOLDER).await.unwrap(),
        SweepOutcome::Skipped
    );

    h.clock.advance(ttl + Duration::seconds(1));
    assert!(matches!(
        h.rt.reclaimer.sweep_once(HOLDER).await.unwrap(),
        SweepOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn lease_is_released_after_a_sweep() {
    let h = Harness::new();
    sweep(&h).await;
    let ttl = h.rt.reclaimer.settings().lease_ttl;
    assert!(h
        .store
        .try_acquire(SWEEP_LEASE_NAME, "worker-b", h.now(), ttl)
        .await
        .unwrap());
}
