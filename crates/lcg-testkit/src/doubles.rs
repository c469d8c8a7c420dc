//! Deterministic collaborators: manual clock, scripted codes, recording
//! mailer/audit/events/compliance.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lcg_runtime::{AuditSink, Clock, CodeSource, ComplianceScheduler, EventSink, Mailer};
use lcg_schemas::{GuardEvent, OutboundEmail};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        if let Ok(mut n) = self.now.lock() {
            *n = t;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut n) = self.now.lock() {
            *n += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(n) => *n,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Hands out queued codes first, then a counter starting at 100000.
#[derive(Debug, Default)]
pub struct ScriptedCodes {
    queued: Mutex<VecDeque<String>>,
    counter: AtomicU32,
}

impl ScriptedCodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, code: &str) {
        if let Ok(mut q) = self.queued.lock() {
            q.push_back(code.to_string());
        }
    }
}

impl CodeSource for ScriptedCodes {
    fn six_digits(&self) -> String {
        if let Some(code) = self.queued.lock().ok().and_then(|mut q| q.pop_front()) {
            return code;
        }
        let n = 100_000 + self.counter.fetch_add(1, Ordering::SeqCst) % 900_000;
        format!("{n:06}")
    }
}

#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("smtp relay refused connection");
        }
        if let Ok(mut s) = self.sent.lock() {
            s.push(email.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub target_id: String,
    pub details: Value,
}

#[derive(Debug, Default)]
pub struct RecordingAudit {
    rows: Mutex<Vec<AuditRow>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<AuditRow> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.rows().into_iter().map(|r| r.action).collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(
        &self,
        action: &str,
        actor_id: Option<Uuid>,
        target_id: &str,
        details: Value,
    ) -> Result<()> {
        if let Ok(mut r) = self.rows.lock() {
            r.push(AuditRow {
                action: action.to_string(),
                actor_id,
                target_id: target_id.to_string(),
                details,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<GuardEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GuardEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }
}

impl EventSink for RecordingEvents {
    fn publish(&self, event: GuardEvent) {
        if let Ok(mut e) = self.events.lock() {
            e.push(event);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceCall {
    Compute(Uuid),
    Clear(Uuid),
}

#[derive(Debug, Default)]
pub struct RecordingCompliance {
    calls: Mutex<Vec<ComplianceCall>>,
    fail: AtomicBool,
}

impl RecordingCompliance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ComplianceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, call: ComplianceCall) -> Result<()> {
        if let Ok(mut c) = self.calls.lock() {
            c.push(call);
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("compliance service unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ComplianceScheduler for RecordingCompliance {
    async fn compute_deadlines(&self, order_id: Uuid) -> Result<()> {
        self.push(ComplianceCall::Compute(order_id))
    }

    async fn clear_deadlines(&self, order_id: Uuid) -> Result<()> {
        self.push(ComplianceCall::Clear(order_id))
    }
}
