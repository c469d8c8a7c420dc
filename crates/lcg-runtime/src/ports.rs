//! Collaborator seams. Storage ports return `anyhow::Result`; services map
//! failures into [`crate::GuardError`].
//!
//! Compare-and-set style updates (`expected` argument, `bool` return) let the
//! services detect concurrent writers without holding locks across awaits.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lcg_risk::{RateDecision, WindowQuota};
use lcg_schemas::{
    Account, Application, ApplicationKind, ApplicationStatus, GuardEvent, Order, OrderStatus,
    OtpPurpose, OtpToken, OutboundEmail, OutboxMessage, PaymentStatus,
};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert an order and its 1:1 application in one unit of work.
    async fn insert_order_with_application(&self, order: &Order, app: &Application) -> Result<()>;

    async fn fetch_order(&self, order_id: Uuid) -> Result<Option<Order>>;

    /// `status := next` only while it still equals `expected`.
    async fn update_order_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool>;

    /// `payment_status := next` only while it still equals `expected`.
    /// `paid_at` is written when `Some`, left untouched when `None`.
    async fn update_payment_status(
        &self,
        order_id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Creation timestamps of the owner's orders created after `since`.
    async fn order_times_for_owner(
        &self,
        owner_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>>;
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn fetch_application(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
    ) -> Result<Option<Application>>;

    /// CAS on status. Bumps `last_updated`; clears `abandoned_at` when asked.
    async fn update_application_status(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
        expected: ApplicationStatus,
        next: ApplicationStatus,
        now: DateTime<Utc>,
        clear_abandonment: bool,
    ) -> Result<bool>;

    /// Drafts with `abandoned_at` unset and `last_updated` before `idle_before`,
    /// oldest first.
    async fn list_stale_drafts(
        &self,
        kind: ApplicationKind,
        idle_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Application>>;

    /// Stamp `abandoned_at` if it is still unset. `false` when already stamped.
    async fn mark_abandoned(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drafts abandoned after `abandoned_after` with fewer than
    /// `max_reminders` reminders whose last reminder (if any) predates
    /// `last_reminder_before`. Rows past the delete horizon are excluded.
    async fn list_reminder_candidates(
        &self,
        kind: ApplicationKind,
        abandoned_after: DateTime<Utc>,
        last_reminder_before: DateTime<Utc>,
        max_reminders: u32,
        limit: u32,
    ) -> Result<Vec<Application>>;

    /// `reminders_sent := expected_sent + 1`, `last_reminder_at := at`, only
    /// while `reminders_sent` still equals `expected_sent`.
    async fn record_reminder(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
        expected_sent: u32,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drafts abandoned before `abandoned_before`, oldest first.
    async fn list_expired_abandoned(
        &self,
        kind: ApplicationKind,
        abandoned_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Application>>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn fetch_account(&self, account_id: Uuid) -> Result<Option<Account>>;

    /// Persist every mutable account column if the stored `version` equals
    /// `account.version`. The stored version is then incremented. `false` on
    /// a version mismatch.
    async fn save_account(&self, account: &Account) -> Result<bool>;
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    async fn insert_token(&self, token: &OtpToken) -> Result<()>;

    /// Newest unverified, unexpired token matching all three keys.
    async fn find_newest_match(
        &self,
        subject_email: &str,
        code: &str,
        purpose: OtpPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<OtpToken>>;

    /// `verified := true` if still false. `false` when another caller won.
    async fn mark_verified(&self, token_id: Uuid) -> Result<bool>;

    /// Delete every still-unverified token for the subject and purpose.
    async fn revoke_outstanding(&self, subject_email: &str, purpose: OtpPurpose) -> Result<u64>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, email: &OutboundEmail, now: DateTime<Utc>) -> Result<Uuid>;

    /// Claim up to `limit` pending messages due at `now`. Claimed rows have
    /// `next_attempt_at` pushed to `now + lease` so a concurrent dispatcher
    /// skips them.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease: chrono::Duration,
    ) -> Result<Vec<OutboxMessage>>;

    async fn mark_sent(&self, msg_id: Uuid, attempts: u32, at: DateTime<Utc>) -> Result<()>;

    /// `retry_at = None` dead-letters the message.
    async fn mark_failed(
        &self,
        msg_id: Uuid,
        attempts: u32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Dependent row groups removed by a cascade, in the order they are deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CascadeStep {
    TimelineEvents,
    DocumentRequests,
    ApplicationDocuments,
    Notifications,
    Application,
    Order,
}

impl CascadeStep {
    pub const ORDER: [CascadeStep; 6] = [
        CascadeStep::TimelineEvents,
        CascadeStep::DocumentRequests,
        CascadeStep::ApplicationDocuments,
        CascadeStep::Notifications,
        CascadeStep::Application,
        CascadeStep::Order,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeStep::TimelineEvents => "timeline_events",
            CascadeStep::DocumentRequests => "document_requests",
            CascadeStep::ApplicationDocuments => "application_documents",
            CascadeStep::Notifications => "notifications",
            CascadeStep::Application => "application",
            CascadeStep::Order => "order",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CascadeReport {
    /// Rows deleted per step, in [`CascadeStep::ORDER`].
    pub deleted: Vec<(CascadeStep, u64)>,
}

impl CascadeReport {
    pub fn rows(&self, step: CascadeStep) -> u64 {
        self.deleted
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeOutcome {
    Deleted(CascadeReport),
    NotFound,
    /// The draft-only variant found the application outside `draft`.
    NotDraft(ApplicationStatus),
}

/// All-or-nothing deletion. Each call is one transaction: on error nothing
/// has been removed.
#[async_trait]
pub trait CascadeStore: Send + Sync {
    async fn delete_order_cascade(&self, order_id: Uuid) -> Result<CascadeOutcome>;

    /// Same cascade rooted at an application, refused unless it is a draft.
    async fn delete_draft_application_cascade(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
    ) -> Result<CascadeOutcome>;
}

/// Cross-instance single-flight lease for background sweeps.
#[async_trait]
pub trait SweepLease: Send + Sync {
    /// Take or renew `name` for `holder` until `now + ttl`. `false` when
    /// another holder owns an unexpired lease.
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool>;

    async fn release(&self, name: &str, holder: &str) -> Result<()>;
}

/// Shared windowed attempt counter.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record an attempt for `key` when it fits `quota`; otherwise record
    /// nothing and report when a slot frees.
    async fn check_and_record(
        &self,
        key: &str,
        quota: WindowQuota,
        now: DateTime<Utc>,
    ) -> Result<RateDecision>;

    /// Drop entries older than their window. Returns how many were dropped.
    async fn prune(&self, now: DateTime<Utc>) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// Side channels
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<()>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(
        &self,
        action: &str,
        actor_id: Option<Uuid>,
        target_id: &str,
        details: Value,
    ) -> Result<()>;
}

/// Compliance deadline calculator owned by another subsystem.
#[async_trait]
pub trait ComplianceScheduler: Send + Sync {
    async fn compute_deadlines(&self, order_id: Uuid) -> Result<()>;
    async fn clear_deadlines(&self, order_id: Uuid) -> Result<()>;
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: GuardEvent);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of 6-digit numeric codes.
pub trait CodeSource: Send + Sync {
    fn six_digits(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandomCodes;

impl CodeSource for OsRandomCodes {
    fn six_digits(&self) -> String {
        use rand::Rng;
        let n: u32 = rand::rngs::OsRng.gen_range(0..1_000_000);
        format!("{n:06}")
    }
}

/// Events go nowhere. For processes without subscribers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardEvents;

impl EventSink for DiscardEvents {
    fn publish(&self, _event: GuardEvent) {}
}

/// Deadline bookkeeping disabled; calls succeed without effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompliance;

#[async_trait]
impl ComplianceScheduler for NoCompliance {
    async fn compute_deadlines(&self, _order_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn clear_deadlines(&self, _order_id: Uuid) -> Result<()> {
        Ok(())
    }
}

/// Delivery stand-in until an SMTP relay is wired: every message is reported
/// delivered and logged without its body, which may carry an OTP code.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        tracing::info!(
            to = %email.to,
            category = %email.category,
            subject = %email.subject,
            "email delivered (log transport)"
        );
        Ok(())
    }
}

/// Every collaborator a guard service may touch.
#[derive(Clone)]
pub struct Ports {
    pub orders: Arc<dyn OrderStore>,
    pub applications: Arc<dyn ApplicationStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub otp: Arc<dyn OtpStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub cascade: Arc<dyn CascadeStore>,
    pub lease: Arc<dyn SweepLease>,
    pub limiter: Arc<dyn RateLimiter>,
    pub mailer: Arc<dyn Mailer>,
    pub audit: Arc<dyn AuditSink>,
    pub compliance: Arc<dyn ComplianceScheduler>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub codes: Arc<dyn CodeSource>,
}

impl Ports {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Audit is append-only bookkeeping after the fact; a failed write is
    /// logged and does not undo the state change it describes.
    pub(crate) async fn audit(
        &self,
        action: &str,
        actor_id: Option<Uuid>,
        target_id: &str,
        details: Value,
    ) {
        if let Err(err) = self.audit.record(action, actor_id, target_id, details).await {
            tracing::error!(action, target_id, error = ?err, "audit record failed");
        }
    }

    /// Queue an email. Delivery is best effort: failures are logged, never
    /// propagated into the state change that triggered them.
    pub(crate) async fn notify(&self, email: OutboundEmail) -> bool {
        match self.outbox.enqueue(&email, self.now()).await {
            Ok(id) => {
                tracing::debug!(outbox_id = %id, category = %email.category, "email queued");
                true
            }
            Err(err) => {
                tracing::warn!(category = %email.category, error = ?err, "email enqueue failed");
                false
            }
        }
    }
}
