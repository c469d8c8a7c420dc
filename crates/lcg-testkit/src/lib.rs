//! lcg-testkit
//!
//! In-memory doubles for every port plus a [`Harness`] that wires them into a
//! [`GuardRuntime`] on a manual clock. Scenario tests live under `tests/`.

mod doubles;
mod store;

pub use doubles::{
    AuditRow, ComplianceCall, ManualClock, RecordingAudit, RecordingCompliance, RecordingEvents,
    RecordingMailer, ScriptedCodes,
};
pub use store::{
    ApplicationDocument, DocumentRequest, MemoryStore, Notification, TimelineEvent,
};

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use lcg_config::GuardConfig;
use lcg_runtime::{GuardRuntime, InMemoryRateLimiter, Ports};
use lcg_schemas::{
    Account, AccountStatus, Application, ApplicationKind, Order, OrderStatus, PaymentStatus,
};
use uuid::Uuid;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub codes: Arc<ScriptedCodes>,
    pub mailer: Arc<RecordingMailer>,
    pub audit: Arc<RecordingAudit>,
    pub events: Arc<RecordingEvents>,
    pub compliance: Arc<RecordingCompliance>,
    pub limiter: Arc<InMemoryRateLimiter>,
    pub rt: GuardRuntime,
}

/// Fixed scenario start: 2026-03-02 09:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(GuardConfig::default())
    }

    pub fn with_config(cfg: GuardConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let codes = Arc::new(ScriptedCodes::new());
        let mailer = Arc::new(RecordingMailer::new());
        let audit = Arc::new(RecordingAudit::new());
        let events = Arc::new(RecordingEvents::new());
        let compliance = Arc::new(RecordingCompliance::new());
        let limiter = Arc::new(InMemoryRateLimiter::new());

        let ports = Ports {
            orders: store.clone(),
            applications: store.clone(),
            accounts: store.clone(),
            otp: store.clone(),
            outbox: store.clone(),
            cascade: store.clone(),
            lease: store.clone(),
            limiter: limiter.clone(),
            mailer: mailer.clone(),
            audit: audit.clone(),
            compliance: compliance.clone(),
            events: events.clone(),
            clock: clock.clone(),
            codes: codes.clone(),
        };
        let rt = GuardRuntime::new(ports, &cfg);

        Self {
            store,
            clock,
            codes,
            mailer,
            audit,
            events,
            compliance,
            limiter,
            rt,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        lcg_runtime::Clock::now(self.clock.as_ref())
    }

    /// Insert an account with `status` and the given profile values.
    pub fn account(&self, email: &str, status: AccountStatus, profile: &[(&str, &str)]) -> Account {
        let mut a = Account::new(email, status);
        for (k, v) in profile {
            a.profile.insert(k.to_string(), v.to_string());
        }
        self.store.put_account(a.clone());
        a
    }

    /// Insert an order in `status` with a draft application last touched at
    /// `last_updated`, plus one row of every dependent kind.
    pub fn order_with_draft(
        &self,
        owner_id: Uuid,
        status: OrderStatus,
        kind: ApplicationKind,
        last_updated: DateTime<Utc>,
    ) -> (Order, Application) {
        let order = Order {
            id: Uuid::new_v4(),
            owner_id,
            status,
            payment_status: PaymentStatus::Pending,
            amount_cents: 49_900,
            created_at: last_updated,
            paid_at: None,
        };
        let app = Application::new_draft(kind, order.id, last_updated);
        self.store.put_order(order.clone());
        self.store.put_application(app.clone());
        self.store.seed_order_dependents(order.id, owner_id);
        (order, app)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
