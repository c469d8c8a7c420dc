//! Abandoned-draft timing rules.
//!
//! Pure predicates over an [`Application`] and a caller-supplied `now`. The
//! sweep in `lcg-runtime` selects candidate rows through storage and applies
//! these rules row by row, so every phase stays idempotent when re-run.

use chrono::{DateTime, Duration, Utc};
use lcg_schemas::{Application, ApplicationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimPolicy {
    /// Draft inactivity before `abandoned_at` is stamped.
    pub abandon_after: Duration,
    /// Minimum gap between two reminders.
    pub reminder_spacing: Duration,
    /// Age of `abandoned_at` after which the draft and its order are deleted.
    pub delete_after: Duration,
    pub max_reminders: u32,
}

impl ReclaimPolicy {
    pub fn sane_defaults() -> Self {
        Self {
            abandon_after: Duration::hours(24),
            reminder_spacing: Duration::hours(12),
            delete_after: Duration::hours(48),
            max_reminders: 3,
        }
    }

    /// `true` for a draft idle longer than `abandon_after` that has not been
    /// stamped yet. Already-stamped rows are never re-stamped.
    pub fn should_mark_abandoned(&self, app: &Application, now: DateTime<Utc>) -> bool {
        app.status == ApplicationStatus::Draft
            && app.abandoned_at.is_none()
            && now - app.last_updated > self.abandon_after
    }

    pub fn reminder_decision(&self, app: &Application, now: DateTime<Utc>) -> ReminderDecision {
        let Some(abandoned_at) = app.abandoned_at else {
            return ReminderDecision::NotAbandoned;
        };
        if app.status != ApplicationStatus::Draft {
            return ReminderDecision::NotAbandoned;
        }
        if app.reminders_sent >= self.max_reminders {
            return ReminderDecision::Exhausted;
        }
        if let Some(last) = app.last_reminder_at {
            if now - last <= self.reminder_spacing {
                return ReminderDecision::NotDue;
            }
        }

        let hours_remaining = self.delete_after.num_hours() - (now - abandoned_at).num_hours();
        if hours_remaining <= 0 {
            return ReminderDecision::Expired;
        }

        ReminderDecision::Send {
            reminder_number: app.reminders_sent + 1,
            hours_remaining,
        }
    }

    pub fn should_delete(&self, app: &Application, now: DateTime<Utc>) -> bool {
        match app.abandoned_at {
            Some(at) => app.status == ApplicationStatus::Draft && now - at > self.delete_after,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderDecision {
    Send {
        /// 1-based number of the reminder about to go out.
        reminder_number: u32,
        hours_remaining: i64,
    },
    /// Spacing since the last reminder has not elapsed.
    NotDue,
    /// `max_reminders` already sent.
    Exhausted,
    /// Past the deletion horizon; cleanup handles it.
    Expired,
    NotAbandoned,
}
