use chrono::Duration;
use std::collections::BTreeMap;

/// At most `limit` events per rolling `window`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowQuota {
    pub limit: u32,
    pub window: Duration,
}

impl WindowQuota {
    pub fn new(limit: u32, window: Duration) -> Self {
        debug_assert!(limit > 0, "limit must be positive");
        Self { limit, window }
    }
}

/// Outcome of a rate-limit check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    /// The attempt was recorded; `remaining` further attempts fit the window.
    Allowed { remaining: u32 },
    /// Nothing was recorded. One slot frees after `retry_after`.
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Fraud thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FraudConfig {
    /// Order creations allowed per IP per rolling 24h.
    pub ip_max_orders_24h: u32,
    /// Account is suspicious at this many orders in 24h.
    pub account_max_orders_24h: u32,
    /// Account is suspicious at this many orders in 1h.
    pub account_max_orders_1h: u32,
}

impl FraudConfig {
    pub fn sane_defaults() -> Self {
        Self {
            ip_max_orders_24h: 7,
            account_max_orders_24h: 7,
            account_max_orders_1h: 4,
        }
    }

    pub fn ip_quota(&self) -> WindowQuota {
        WindowQuota::new(self.ip_max_orders_24h, Duration::hours(24))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FraudSignalKind {
    DailyVelocity,
    HourlyVelocity,
}

/// Why an account looks abusive: code + evidence (deterministic ordering).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FraudSignal {
    pub kind: FraudSignalKind,
    pub code: String,
    pub evidence: BTreeMap<String, String>,
}

impl FraudSignal {
    pub fn new(kind: FraudSignalKind) -> Self {
        let code = match kind {
            FraudSignalKind::DailyVelocity => "FRAUD_ORDER_VELOCITY_24H",
            FraudSignalKind::HourlyVelocity => "FRAUD_ORDER_VELOCITY_1H",
        }
        .to_string();

        Self {
            kind,
            code,
            evidence: BTreeMap::new(),
        }
    }

    pub fn with_evidence(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.evidence.insert(k.into(), v.into());
        self
    }

    /// One-line reason suitable for `internal_notes`.
    pub fn reason(&self) -> String {
        let ev = self
            .evidence
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!("{} {}", self.code, ev)
    }
}
