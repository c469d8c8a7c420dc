//! Persisted shapes of the guarded entities.
//!
//! These mirror the logical rows; storage adapters map them to tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::status::{
    AccountStatus, ApplicationKind, ApplicationStatus, Locale, OrderStatus, OtpPurpose,
    PaymentStatus, SensitiveField,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// Integer cents; no floats on the money path.
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub kind: ApplicationKind,
    pub order_id: Uuid,
    pub status: ApplicationStatus,
    pub abandoned_at: Option<DateTime<Utc>>,
    pub reminders_sent: u32,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl Application {
    /// A fresh draft created together with its order.
    pub fn new_draft(kind: ApplicationKind, order_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            order_id,
            status: ApplicationStatus::Draft,
            abandoned_at: None,
            reminders_sent: 0,
            last_reminder_at: None,
            last_updated: now,
        }
    }
}

/// Sensitive field changes awaiting OTP confirmation.
///
/// Keyed by the closed [`SensitiveField`] enum so a staged change can never
/// carry an arbitrary profile key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedChange {
    pub account_id: Uuid,
    pub fields: BTreeMap<SensitiveField, String>,
    pub attempts: u32,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StagedChange {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.keys().map(|f| f.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub locale: Locale,
    pub status: AccountStatus,
    /// Every profile attribute by key (`first_name`, `city`, ...). Sensitive
    /// keys use [`SensitiveField::as_str`].
    pub profile: BTreeMap<String, String>,
    pub pending_change: Option<StagedChange>,
    /// Append-only operator notes; one timestamped line per entry.
    pub internal_notes: String,
    pub security_otp_required: bool,
    /// Optimistic concurrency counter, bumped on every write.
    pub version: i64,
}

impl Account {
    pub fn new(email: impl Into<String>, status: AccountStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            locale: Locale::default(),
            status,
            profile: BTreeMap::new(),
            pending_change: None,
            internal_notes: String::new(),
            security_otp_required: false,
            version: 0,
        }
    }

    /// Current value of a profile key; missing keys read as empty.
    pub fn profile_value(&self, key: &str) -> &str {
        self.profile.get(key).map(String::as_str).unwrap_or("")
    }

    /// Append one `[ts] line` entry to `internal_notes`. Never rewrites history.
    pub fn append_note(&mut self, at: DateTime<Utc>, line: &str) {
        if !self.internal_notes.is_empty() && !self.internal_notes.ends_with('\n') {
            self.internal_notes.push('\n');
        }
        self.internal_notes
            .push_str(&format!("[{}] {}\n", at.to_rfc3339(), line.trim()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpToken {
    pub id: Uuid,
    pub subject_email: String,
    pub code: String,
    pub purpose: OtpPurpose,
    pub expires_at: DateTime<Utc>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// An email intent. Persisted first, sent later by the outbox dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Free-form tag for operators (`otp`, `reminder`, `survey`, ...).
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Sent,
    /// Gave up after the configured number of attempts.
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "sent" => Ok(OutboxStatus::Sent),
            "dead" => Ok(OutboxStatus::Dead),
            other => Err(anyhow::anyhow!("invalid outbox status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub email: OutboundEmail,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn notes_are_appended_one_line_per_entry() {
        let mut a = Account::new("ana@example.com", AccountStatus::Active);
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        a.append_note(t, "first");
        a.append_note(t, "second ");
        let lines: Vec<&str> = a.internal_notes.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] first"));
        assert!(lines[1].ends_with("] second"));
    }

    #[test]
    fn missing_profile_key_reads_empty() {
        let a = Account::new("ana@example.com", AccountStatus::Active);
        assert_eq!(a.profile_value("first_name"), "");
    }
}
