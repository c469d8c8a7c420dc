//! In-memory implementation of every storage port.
//!
//! One mutex guards the whole state, so each port call is atomic. Cascades
//! work on a copy and swap it in only when every step succeeded, which gives
//! tests the same all-or-nothing behaviour as the Postgres store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lcg_runtime::{
    AccountStore, ApplicationStore, CascadeOutcome, CascadeReport, CascadeStep, CascadeStore,
    OrderStore, OtpStore, OutboxStore, SweepLease,
};
use lcg_schemas::{
    Account, Application, ApplicationKind, ApplicationStatus, Order, OrderStatus, OtpPurpose,
    OtpToken, OutboundEmail, OutboxMessage, OutboxStatus, PaymentStatus,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEvent {
    pub id: Uuid,
    pub order_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDocument {
    pub id: Uuid,
    pub order_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRequest {
    pub id: Uuid,
    pub document_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    pub account_id: Uuid,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    applications: HashMap<Uuid, Application>,
    accounts: HashMap<Uuid, Account>,
    tokens: Vec<OtpToken>,
    outbox: Vec<OutboxMessage>,
    timeline: Vec<TimelineEvent>,
    documents: Vec<ApplicationDocument>,
    document_requests: Vec<DocumentRequest>,
    notifications: Vec<Notification>,
    leases: HashMap<String, (String, DateTime<Utc>)>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_cascade_at: Mutex<Option<CascadeStep>>,
    fail_enqueue: AtomicBool,
    racing_profile_write: Mutex<Option<(String, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| anyhow!("memory store poisoned"))
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    /// The next cascades fail when they reach `step`.
    pub fn fail_cascade_at(&self, step: Option<CascadeStep>) {
        if let Ok(mut f) = self.fail_cascade_at.lock() {
            *f = step;
        }
    }

    pub fn fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Another writer sets `key = value` on the account just before the next
    /// `save_account` lands, so that save loses its version check.
    pub fn race_next_account_save(&self, key: &str, value: &str) {
        if let Ok(mut r) = self.racing_profile_write.lock() {
            *r = Some((key.to_string(), value.to_string()));
        }
    }

    // -----------------------------------------------------------------------
    // Seeding and inspection
    // -----------------------------------------------------------------------

    pub fn put_account(&self, account: Account) {
        if let Ok(mut s) = self.lock() {
            s.accounts.insert(account.id, account);
        }
    }

    pub fn put_order(&self, order: Order) {
        if let Ok(mut s) = self.lock() {
            s.orders.insert(order.id, order);
        }
    }

    pub fn put_application(&self, app: Application) {
        if let Ok(mut s) = self.lock() {
            s.applications.insert(app.id, app);
        }
    }

    /// Attach one row of every dependent kind to `order_id`, plus a
    /// notification for the same owner that belongs to no order.
    pub fn seed_order_dependents(&self, order_id: Uuid, owner_id: Uuid) {
        let Ok(mut s) = self.lock() else { return };
        let doc = ApplicationDocument {
            id: Uuid::new_v4(),
            order_id,
        };
        s.timeline.push(TimelineEvent {
            id: Uuid::new_v4(),
            order_id,
        });
        s.timeline.push(TimelineEvent {
            id: Uuid::new_v4(),
            order_id,
        });
        s.document_requests.push(DocumentRequest {
            id: Uuid::new_v4(),
            document_id: doc.id,
        });
        s.documents.push(doc);
        s.notifications.push(Notification {
            id: Uuid::new_v4(),
            account_id: owner_id,
            order_id: Some(order_id),
        });
        s.notifications.push(Notification {
            id: Uuid::new_v4(),
            account_id: owner_id,
            order_id: None,
        });
    }

    pub fn order(&self, id: Uuid) -> Option<Order> {
        self.lock().ok()?.orders.get(&id).cloned()
    }

    pub fn application(&self, id: Uuid) -> Option<Application> {
        self.lock().ok()?.applications.get(&id).cloned()
    }

    pub fn account(&self, id: Uuid) -> Option<Account> {
        self.lock().ok()?.accounts.get(&id).cloned()
    }

    pub fn applications(&self) -> Vec<Application> {
        self.lock()
            .map(|s| s.applications.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tokens(&self) -> Vec<OtpToken> {
        self.lock().map(|s| s.tokens.clone()).unwrap_or_default()
    }

    pub fn outbox(&self) -> Vec<OutboxMessage> {
        self.lock().map(|s| s.outbox.clone()).unwrap_or_default()
    }

    pub fn outbox_in_category(&self, category: &str) -> Vec<OutboxMessage> {
        self.outbox()
            .into_iter()
            .filter(|m| m.email.category == category)
            .collect()
    }

    /// Dependent rows still referencing `order_id`:
    /// (timeline, documents, document requests, notifications).
    pub fn dependents_of(&self, order_id: Uuid) -> (usize, usize, usize, usize) {
        let Ok(s) = self.lock() else {
            return (0, 0, 0, 0);
        };
        let doc_ids: Vec<Uuid> = s
            .documents
            .iter()
            .filter(|d| d.order_id == order_id)
            .map(|d| d.id)
            .collect();
        (
            s.timeline.iter().filter(|e| e.order_id == order_id).count(),
            doc_ids.len(),
            s.document_requests
                .iter()
                .filter(|r| doc_ids.contains(&r.document_id))
                .count(),
            s.notifications
                .iter()
                .filter(|n| n.order_id == Some(order_id))
                .count(),
        )
    }

    pub fn notifications_for(&self, account_id: Uuid) -> usize {
        self.lock()
            .map(|s| {
                s.notifications
                    .iter()
                    .filter(|n| n.account_id == account_id)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Applications whose parent order no longer exists.
    pub fn orphaned_applications(&self) -> Vec<Uuid> {
        self.lock()
            .map(|s| {
                s.applications
                    .values()
                    .filter(|a| !s.orders.contains_key(&a.order_id))
                    .map(|a| a.id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

fn cascade_order(
    s: &mut State,
    order_id: Uuid,
    fail_at: Option<CascadeStep>,
) -> Result<CascadeReport> {
    let owner_id = s.orders.get(&order_id).map(|o| o.owner_id);
    let doc_ids: Vec<Uuid> = s
        .documents
        .iter()
        .filter(|d| d.order_id == order_id)
        .map(|d| d.id)
        .collect();

    let mut report = CascadeReport::default();
    for step in CascadeStep::ORDER {
        if fail_at == Some(step) {
            bail!("injected failure at cascade step {}", step.as_str());
        }
        let removed = match step {
            CascadeStep::TimelineEvents => drain(&mut s.timeline, |e| e.order_id == order_id),
            CascadeStep::DocumentRequests => {
                drain(&mut s.document_requests, |r| doc_ids.contains(&r.document_id))
            }
            CascadeStep::ApplicationDocuments => {
                drain(&mut s.documents, |d| d.order_id == order_id)
            }
            CascadeStep::Notifications => drain(&mut s.notifications, |n| {
                Some(n.account_id) == owner_id && n.order_id == Some(order_id)
            }),
            CascadeStep::Application => {
                let before = s.applications.len();
                s.applications.retain(|_, a| a.order_id != order_id);
                (before - s.applications.len()) as u64
            }
            CascadeStep::Order => u64::from(s.orders.remove(&order_id).is_some()),
        };
        report.deleted.push((step, removed));
    }
    Ok(report)
}

fn drain<T>(rows: &mut Vec<T>, pred: impl Fn(&T) -> bool) -> u64 {
    let before = rows.len();
    rows.retain(|r| !pred(r));
    (before - rows.len()) as u64
}

#[async_trait]
impl CascadeStore for MemoryStore {
    async fn delete_order_cascade(&self, order_id: Uuid) -> Result<CascadeOutcome> {
        let fail_at = *self
            .fail_cascade_at
            .lock()
            .map_err(|_| anyhow!("fault flag poisoned"))?;
        let mut s = self.lock()?;
        if !s.orders.contains_key(&order_id) {
            return Ok(CascadeOutcome::NotFound);
        }
        let mut tx = s.clone();
        let report = cascade_order(&mut tx, order_id, fail_at)?;
        *s = tx;
        Ok(CascadeOutcome::Deleted(report))
    }

    async fn delete_draft_application_cascade(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
    ) -> Result<CascadeOutcome> {
        let fail_at = *self
            .fail_cascade_at
            .lock()
            .map_err(|_| anyhow!("fault flag poisoned"))?;
        let mut s = self.lock()?;
        let Some(app) = s.applications.get(&app_id).filter(|a| a.kind == kind).cloned() else {
            return Ok(CascadeOutcome::NotFound);
        };
        if app.status != ApplicationStatus::Draft {
            return Ok(CascadeOutcome::NotDraft(app.status));
        }
        let mut tx = s.clone();
        let report = cascade_order(&mut tx, app.order_id, fail_at)?;
        *s = tx;
        Ok(CascadeOutcome::Deleted(report))
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order_with_application(&self, order: &Order, app: &Application) -> Result<()> {
        let mut s = self.lock()?;
        if s.orders.contains_key(&order.id) {
            bail!("duplicate order id {}", order.id);
        }
        s.orders.insert(order.id, order.clone());
        s.applications.insert(app.id, app.clone());
        Ok(())
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.lock()?.orders.get(&order_id).cloned())
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool> {
        let mut s = self.lock()?;
        match s.orders.get_mut(&order_id) {
            Some(o) if o.status == expected => {
                o.status = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_payment_status(
        &self,
        order_id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut s = self.lock()?;
        match s.orders.get_mut(&order_id) {
            Some(o) if o.payment_status == expected => {
                o.payment_status = next;
                if paid_at.is_some() {
                    o.paid_at = paid_at;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn order_times_for_owner(
        &self,
        owner_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let s = self.lock()?;
        let mut times: Vec<_> = s
            .orders
            .values()
            .filter(|o| o.owner_id == owner_id && o.created_at > since)
            .map(|o| o.created_at)
            .collect();
        times.sort();
        Ok(times)
    }
}

// ---------------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------------

fn take_sorted(
    mut rows: Vec<Application>,
    key: impl Fn(&Application) -> DateTime<Utc>,
    limit: u32,
) -> Vec<Application> {
    rows.sort_by_key(|a| (key(a), a.id));
    rows.truncate(limit as usize);
    rows
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn fetch_application(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
    ) -> Result<Option<Application>> {
        Ok(self
            .lock()?
            .applications
            .get(&app_id)
            .filter(|a| a.kind == kind)
            .cloned())
    }

    async fn update_application_status(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
        expected: ApplicationStatus,
        next: ApplicationStatus,
        now: DateTime<Utc>,
        clear_abandonment: bool,
    ) -> Result<bool> {
        let mut s = self.lock()?;
        match s.applications.get_mut(&app_id) {
            Some(a) if a.kind == kind && a.status == expected => {
                a.status = next;
                a.last_updated = now;
                if clear_abandonment {
                    a.abandoned_at = None;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_stale_drafts(
        &self,
        kind: ApplicationKind,
        idle_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Application>> {
        let s = self.lock()?;
        let rows = s
            .applications
            .values()
            .filter(|a| {
                a.kind == kind
                    && a.status == ApplicationStatus::Draft
                    && a.abandoned_at.is_none()
                    && a.last_updated < idle_before
            })
            .cloned()
            .collect();
        Ok(take_sorted(rows, |a| a.last_updated, limit))
    }

    async fn mark_abandoned(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut s = self.lock()?;
        match s.applications.get_mut(&app_id) {
            Some(a) if a.kind == kind && a.abandoned_at.is_none() => {
                a.abandoned_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_reminder_candidates(
        &self,
        kind: ApplicationKind,
        abandoned_after: DateTime<Utc>,
        last_reminder_before: DateTime<Utc>,
        max_reminders: u32,
        limit: u32,
    ) -> Result<Vec<Application>> {
        let s = self.lock()?;
        let rows = s
            .applications
            .values()
            .filter(|a| {
                a.kind == kind
                    && a.status == ApplicationStatus::Draft
                    && a.abandoned_at.map_or(false, |t| t > abandoned_after)
                    && a.reminders_sent < max_reminders
                    && a.last_reminder_at.map_or(true, |t| t < last_reminder_before)
            })
            .cloned()
            .collect();
        Ok(take_sorted(
            rows,
            |a| a.abandoned_at.unwrap_or(a.last_updated),
            limit,
        ))
    }

    async fn record_reminder(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
        expected_sent: u32,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut s = self.lock()?;
        match s.applications.get_mut(&app_id) {
            Some(a) if a.kind == kind && a.reminders_sent == expected_sent => {
                a.reminders_sent = expected_sent + 1;
                a.last_reminder_at = Some(a.last_reminder_at.map_or(at, |t| t.max(at)));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_expired_abandoned(
        &self,
        kind: ApplicationKind,
        abandoned_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Application>> {
        let s = self.lock()?;
        let rows = s
            .applications
            .values()
            .filter(|a| {
                a.kind == kind
                    && a.status == ApplicationStatus::Draft
                    && a.abandoned_at.is_some_and(|t| t < abandoned_before)
            })
            .cloned()
            .collect();
        Ok(take_sorted(
            rows,
            |a| a.abandoned_at.unwrap_or(a.last_updated),
            limit,
        ))
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[async_trait]
impl AccountStore for MemoryStore {
    async fn fetch_account(&self, account_id: Uuid) -> Result<Option<Account>> {
        Ok(self.lock()?.accounts.get(&account_id).cloned())
    }

    async fn save_account(&self, account: &Account) -> Result<bool> {
        let racing = self
            .racing_profile_write
            .lock()
            .map_err(|_| anyhow!("race hook poisoned"))?
            .take();
        let mut s = self.lock()?;
        if let (Some((key, value)), Some(stored)) = (racing, s.accounts.get_mut(&account.id)) {
            stored.profile.insert(key, value);
            stored.version += 1;
        }
        match s.accounts.get_mut(&account.id) {
            Some(stored) if stored.version == account.version => {
                *stored = account.clone();
                stored.version = account.version + 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => bail!("account {} does not exist", account.id),
        }
    }
}

// ---------------------------------------------------------------------------
// OTP tokens
// ---------------------------------------------------------------------------

#[async_trait]
impl OtpStore for MemoryStore {
    async fn insert_token(&self, token: &OtpToken) -> Result<()> {
        self.lock()?.tokens.push(token.clone());
        Ok(())
    }

    async fn find_newest_match(
        &self,
        subject_email: &str,
        code: &str,
        purpose: OtpPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<OtpToken>> {
        let s = self.lock()?;
        Ok(s.tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.subject_email == subject_email
                    && t.code == code
                    && t.purpose == purpose
                    && !t.verified
                    && t.expires_at > now
            })
            .max_by_key(|(i, t)| (t.created_at, *i))
            .map(|(_, t)| t.clone()))
    }

    async fn mark_verified(&self, token_id: Uuid) -> Result<bool> {
        let mut s = self.lock()?;
        match s.tokens.iter_mut().find(|t| t.id == token_id) {
            Some(t) if !t.verified => {
                t.verified = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_outstanding(&self, subject_email: &str, purpose: OtpPurpose) -> Result<u64> {
        let mut s = self.lock()?;
        Ok(drain(&mut s.tokens, |t| {
            t.subject_email == subject_email && t.purpose == purpose && !t.verified
        }))
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn enqueue(&self, email: &OutboundEmail, now: DateTime<Utc>) -> Result<Uuid> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            bail!("outbox unavailable (injected)");
        }
        let id = Uuid::new_v4();
        self.lock()?.outbox.push(OutboxMessage {
            id,
            email: email.clone(),
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
        });
        Ok(id)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>> {
        let mut s = self.lock()?;
        let mut due: Vec<usize> = s
            .outbox
            .iter()
            .enumerate()
            .filter(|(_, m)| m.status == OutboxStatus::Pending && m.next_attempt_at <= now)
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|i| (s.outbox[*i].next_attempt_at, s.outbox[*i].created_at));
        due.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            claimed.push(s.outbox[i].clone());
            s.outbox[i].next_attempt_at = now + lease;
        }
        Ok(claimed)
    }

    async fn mark_sent(&self, msg_id: Uuid, attempts: u32, _at: DateTime<Utc>) -> Result<()> {
        let mut s = self.lock()?;
        let m = s
            .outbox
            .iter_mut()
            .find(|m| m.id == msg_id)
            .ok_or_else(|| anyhow!("outbox message {msg_id} missing"))?;
        m.status = OutboxStatus::Sent;
        m.attempts = attempts;
        m.last_error = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        msg_id: Uuid,
        attempts: u32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut s = self.lock()?;
        let m = s
            .outbox
            .iter_mut()
            .find(|m| m.id == msg_id)
            .ok_or_else(|| anyhow!("outbox message {msg_id} missing"))?;
        m.attempts = attempts;
        m.last_error = Some(error.to_string());
        match retry_at {
            Some(at) => m.next_attempt_at = at,
            None => m.status = OutboxStatus::Dead,
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

#[async_trait]
impl SweepLease for MemoryStore {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut s = self.lock()?;
        if let Some((owner, until)) = s.leases.get(name) {
            if owner != holder && *until > now {
                return Ok(false);
            }
        }
        s.leases
            .insert(name.to_string(), (holder.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, name: &str, holder: &str) -> Result<()> {
        let mut s = self.lock()?;
        if s.leases.get(name).is_some_and(|(owner, _)| owner == holder) {
            s.leases.remove(name);
        }
        Ok(())
    }
}
