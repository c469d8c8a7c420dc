//! AbandonmentReclaimer: periodic sweep over draft applications.
//!
//! Phases run in order and each is idempotent on its own:
//! 1. stamp `abandoned_at` on drafts idle past the threshold
//! 2. queue bounded, spaced reminders to the order owner
//! 3. cascade-delete drafts abandoned past the deletion horizon
//!
//! A whole run holds a named lease so only one instance sweeps at a time.

use chrono::{DateTime, Utc};
use lcg_config::ReclaimSettings;
use lcg_lifecycle::ReminderDecision;
use lcg_schemas::{Application, ApplicationKind, GuardEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::GuardResult;
use crate::notices;
use crate::ports::{CascadeOutcome, Ports};

pub const SWEEP_LEASE_NAME: &str = "abandonment_reclaimer";

const KINDS: [ApplicationKind; 2] = [ApplicationKind::Llc, ApplicationKind::Maintenance];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub started_at: Option<DateTime<Utc>>,
    pub marked: u32,
    pub reminded: u32,
    /// Reminder candidates skipped (not due, past horizon, enqueue failed).
    pub reminders_skipped: u32,
    pub deleted: u32,
    /// Rows whose cascade failed and stay for the next sweep.
    pub delete_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another holder owns the lease.
    Skipped,
}

#[derive(Clone)]
pub struct AbandonmentReclaimer {
    ports: Ports,
    settings: ReclaimSettings,
}

impl AbandonmentReclaimer {
    pub fn new(ports: Ports, settings: ReclaimSettings) -> Self {
        Self { ports, settings }
    }

    pub fn settings(&self) -> &ReclaimSettings {
        &self.settings
    }

    /// One full sweep under the single-flight lease.
    pub async fn sweep_once(&self, holder: &str) -> GuardResult<SweepOutcome> {
        let now = self.ports.now();
        if !self
            .ports
            .lease
            .try_acquire(SWEEP_LEASE_NAME, holder, now, self.settings.lease_ttl)
            .await?
        {
            debug!(holder, "reclaim sweep skipped; lease held elsewhere");
            return Ok(SweepOutcome::Skipped);
        }

        let result = self.run_phases(now).await;

        if let Err(err) = self.ports.lease.release(SWEEP_LEASE_NAME, holder).await {
            warn!(holder, error = ?err, "reclaim lease release failed; it will expire");
        }

        let report = result?;
        info!(
            marked = report.marked,
            reminded = report.reminded,
            deleted = report.deleted,
            delete_failures = report.delete_failures,
            "reclaim sweep completed"
        );
        Ok(SweepOutcome::Completed(report))
    }

    async fn run_phases(&self, now: DateTime<Utc>) -> GuardResult<SweepReport> {
        let mut report = SweepReport {
            started_at: Some(now),
            ..SweepReport::default()
        };
        report.marked = self.mark_as_abandoned(now).await?;
        let (sent, skipped) = self.send_reminders(now).await?;
        report.reminded = sent;
        report.reminders_skipped = skipped;
        let (deleted, failed) = self.cleanup_abandoned_applications(now).await?;
        report.deleted = deleted;
        report.delete_failures = failed;
        Ok(report)
    }

    /// Phase 1. Status stays `draft`.
    pub async fn mark_as_abandoned(&self, now: DateTime<Utc>) -> GuardResult<u32> {
        let policy = &self.settings.policy;
        let mut marked = 0;
        for kind in KINDS {
            let rows = self
                .ports
                .applications
                .list_stale_drafts(kind, now - policy.abandon_after, self.settings.batch_limit)
                .await?;
            for app in rows.iter().filter(|a| policy.should_mark_abandoned(a, now)) {
                if self
                    .ports
                    .applications
                    .mark_abandoned(kind, app.id, now)
                    .await?
                {
                    debug!(application_id = %app.id, kind = kind.as_str(), "draft marked abandoned");
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    /// Phase 2. Returns (sent, skipped).
    pub async fn send_reminders(&self, now: DateTime<Utc>) -> GuardResult<(u32, u32)> {
        let policy = &self.settings.policy;
        let (mut sent, mut skipped) = (0, 0);
        for kind in KINDS {
            let rows = self
                .ports
                .applications
                .list_reminder_candidates(
                    kind,
                    now - policy.delete_after,
                    now - policy.reminder_spacing,
                    policy.max_reminders,
                    self.settings.batch_limit,
                )
                .await?;
            for app in rows {
                match policy.reminder_decision(&app, now) {
                    ReminderDecision::Send {
                        reminder_number,
                        hours_remaining,
                    } => {
                        if self
                            .remind(&app, reminder_number, hours_remaining, now)
                            .await?
                        {
                            sent += 1;
                        } else {
                            skipped += 1;
                        }
                    }
                    _ => skipped += 1,
                }
            }
        }
        Ok((sent, skipped))
    }

    /// Queue reminder `reminder_number` then record it. A failed enqueue leaves
    /// the row untouched so the next sweep retries it.
    async fn remind(
        &self,
        app: &Application,
        reminder_number: u32,
        hours_remaining: i64,
        now: DateTime<Utc>,
    ) -> GuardResult<bool> {
        let Some(order) = self.ports.orders.fetch_order(app.order_id).await? else {
            warn!(application_id = %app.id, order_id = %app.order_id, "reminder skipped; parent order missing");
            return Ok(false);
        };
        let Some(owner) = self.ports.accounts.fetch_account(order.owner_id).await? else {
            warn!(application_id = %app.id, owner_id = %order.owner_id, "reminder skipped; owner missing");
            return Ok(false);
        };

        let email = notices::abandonment_reminder(
            &owner.email,
            owner.locale,
            app.kind,
            app.id,
            reminder_number,
            hours_remaining,
        );
        if !self.ports.notify(email).await {
            return Ok(false);
        }

        let recorded = self
            .ports
            .applications
            .record_reminder(app.kind, app.id, app.reminders_sent, now)
            .await?;
        if recorded {
            info!(
                application_id = %app.id,
                reminder_number,
                hours_remaining,
                "abandonment reminder queued"
            );
        } else {
            warn!(application_id = %app.id, "reminder counter moved concurrently");
        }
        Ok(recorded)
    }

    /// Phase 3. Returns (deleted, failed). A failed cascade is logged and the
    /// row stays for the next sweep.
    pub async fn cleanup_abandoned_applications(
        &self,
        now: DateTime<Utc>,
    ) -> GuardResult<(u32, u32)> {
        let policy = &self.settings.policy;
        let (mut deleted, mut failed) = (0, 0);
        for kind in KINDS {
            let rows = self
                .ports
                .applications
                .list_expired_abandoned(kind, now - policy.delete_after, self.settings.batch_limit)
                .await?;
            for app in rows.iter().filter(|a| policy.should_delete(a, now)) {
                match self
                    .ports
                    .cascade
                    .delete_draft_application_cascade(kind, app.id)
                    .await
                {
                    Ok(CascadeOutcome::Deleted(report)) => {
                        deleted += 1;
                        info!(
                            application_id = %app.id,
                            order_id = %app.order_id,
                            "abandoned draft reclaimed"
                        );
                        self.ports
                            .audit(
                                "application_reclaimed",
                                None,
                                &app.id.to_string(),
                                json!({
                                    "order_id": app.order_id,
                                    "kind": kind.as_str(),
                                    "rows": report.deleted.iter().map(|(_, n)| *n).sum::<u64>(),
                                }),
                            )
                            .await;
                        self.ports.events.publish(GuardEvent::ApplicationReclaimed {
                            application_id: app.id,
                            order_id: app.order_id,
                            at: now,
                        });
                    }
                    Ok(CascadeOutcome::NotFound) | Ok(CascadeOutcome::NotDraft(_)) => {
                        debug!(application_id = %app.id, "reclaim target changed before delete");
                    }
                    Err(err) => {
                        failed += 1;
                        error!(application_id = %app.id, error = ?err, "reclaim cascade failed; rolled back");
                    }
                }
            }
        }
        Ok((deleted, failed))
    }
}
