//! Shared runtime state for lcg-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The background loops
//! (reclaim sweep, outbox dispatch, rate-limit prune) write their latest
//! result into the status snapshot and echo it on the SSE bus.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lcg_runtime::{DispatchReport, EventSink, GuardRuntime, SweepOutcome};
use lcg_schemas::GuardEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, warn};

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Guard { event: GuardEvent },
    Sweep { outcome: SweepOutcome },
    Dispatch { report: DispatchReport },
    LogLine { level: String, msg: String },
}

impl BusMsg {
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Guard { event } => event.name(),
            BusMsg::Sweep { .. } => "sweep",
            BusMsg::Dispatch { .. } => "dispatch",
            BusMsg::LogLine { .. } => "log",
        }
    }
}

/// [`EventSink`] that forwards guard events onto the SSE bus. Publishing with
/// no subscribers is not an error.
#[derive(Clone)]
pub struct BroadcastEvents {
    bus: broadcast::Sender<BusMsg>,
}

impl BroadcastEvents {
    pub fn new(bus: broadcast::Sender<BusMsg>) -> Self {
        Self { bus }
    }
}

impl EventSink for BroadcastEvents {
    fn publish(&self, event: GuardEvent) {
        let _ = self.bus.send(BusMsg::Guard { event });
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Returned by GET /v1/status.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub config_hash: String,
    pub last_sweep: Option<SweepOutcome>,
    pub last_sweep_at: Option<DateTime<Utc>>,
    /// Set when the most recent sweep failed; cleared by the next success.
    pub last_sweep_error: Option<String>,
    pub last_dispatch: Option<DispatchReport>,
    pub rate_limit_pruned_total: u64,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub status: Arc<RwLock<StatusSnapshot>>,
}

impl AppState {
    pub fn new(config_hash: impl Into<String>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "lcg-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            status: Arc::new(RwLock::new(StatusSnapshot {
                daemon_uptime_secs: uptime_secs(),
                config_hash: config_hash.into(),
                ..StatusSnapshot::default()
            })),
        }
    }

    pub fn event_sink(&self) -> BroadcastEvents {
        BroadcastEvents::new(self.bus.clone())
    }
}

// ---------------------------------------------------------------------------
// Ticks
// ---------------------------------------------------------------------------

/// One reclaim sweep. Failures are recorded on the snapshot, never fatal to
/// the loop.
pub async fn reclaim_tick(state: &AppState, rt: &GuardRuntime, holder: &str) {
    let at = rt.ports.now();
    match rt.reclaimer.sweep_once(holder).await {
        Ok(outcome) => {
            {
                let mut s = state.status.write().await;
                s.last_sweep = Some(outcome.clone());
                s.last_sweep_at = Some(at);
                s.last_sweep_error = None;
            }
            let _ = state.bus.send(BusMsg::Sweep { outcome });
        }
        Err(err) => {
            error!(error = %err, "reclaim sweep failed");
            {
                let mut s = state.status.write().await;
                s.last_sweep_at = Some(at);
                s.last_sweep_error = Some(err.to_string());
            }
            let _ = state.bus.send(BusMsg::LogLine {
                level: "ERROR".to_string(),
                msg: format!("reclaim sweep failed: {err}"),
            });
        }
    }
}

pub async fn dispatch_tick(state: &AppState, rt: &GuardRuntime) {
    match rt.outbox.dispatch_once().await {
        Ok(report) => {
            state.status.write().await.last_dispatch = Some(report);
            if report.claimed > 0 {
                let _ = state.bus.send(BusMsg::Dispatch { report });
            }
        }
        Err(err) => warn!(error = %err, "outbox dispatch failed"),
    }
}

pub async fn prune_tick(state: &AppState, rt: &GuardRuntime) {
    match rt.prune_rate_limits().await {
        Ok(n) => state.status.write().await.rate_limit_pruned_total += n,
        Err(err) => warn!(error = %err, "rate limit prune failed"),
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

pub fn spawn_reclaim_loop(state: Arc<AppState>, rt: GuardRuntime, holder: String) {
    let interval = rt.reclaimer.settings().interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            reclaim_tick(&state, &rt, &holder).await;
        }
    });
}

pub fn spawn_outbox_loop(state: Arc<AppState>, rt: GuardRuntime) {
    let interval = rt.outbox.settings().poll_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            dispatch_tick(&state, &rt).await;
        }
    });
}

pub fn spawn_prune_loop(state: Arc<AppState>, rt: GuardRuntime, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            prune_tick(&state, &rt).await;
        }
    });
}
