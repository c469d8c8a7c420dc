//! Typed guard thresholds read from the merged config JSON.
//!
//! Every field has a default; a key that is present but has the wrong type is
//! an error rather than a silent fallback.

use anyhow::{anyhow, bail, Result};
use chrono::Duration;
use lcg_lifecycle::ReclaimPolicy;
use lcg_risk::{FraudConfig, WindowQuota};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpSettings {
    pub code_ttl: Duration,
    /// Issuance quota per (purpose, ip) bucket.
    pub issue_quota: WindowQuota,
    /// On a successful verify, also consume older outstanding codes of the
    /// same subject + purpose.
    pub revoke_older_on_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingSettings {
    pub expiry: Duration,
    /// Failed confirmations before the account is escalated to review.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimSettings {
    pub interval: std::time::Duration,
    pub policy: ReclaimPolicy,
    /// Rows per application kind per phase per sweep.
    pub batch_limit: u32,
    pub lease_ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxSettings {
    pub poll_interval: std::time::Duration,
    pub batch_limit: u32,
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub otp: OtpSettings,
    pub staging: StagingSettings,
    pub fraud: FraudConfig,
    pub reclaim: ReclaimSettings,
    pub outbox: OutboxSettings,
    /// Recipient of confirmed-profile-change notices. `None` disables them.
    pub admin_notify_email: Option<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            otp: OtpSettings {
                code_ttl: Duration::minutes(15),
                issue_quota: WindowQuota::new(5, Duration::minutes(15)),
                revoke_older_on_verify: true,
            },
            staging: StagingSettings {
                expiry: Duration::hours(24),
                max_attempts: 5,
            },
            fraud: FraudConfig::sane_defaults(),
            reclaim: ReclaimSettings {
                interval: std::time::Duration::from_secs(300),
                policy: ReclaimPolicy::sane_defaults(),
                batch_limit: 20,
                lease_ttl: Duration::minutes(10),
            },
            outbox: OutboxSettings {
                poll_interval: std::time::Duration::from_secs(15),
                batch_limit: 50,
                max_attempts: 6,
                base_backoff: Duration::seconds(30),
            },
            admin_notify_email: None,
        }
    }
}

impl GuardConfig {
    pub fn from_config_json(cfg: &Value) -> Result<Self> {
        let d = Self::default();

        let otp = OtpSettings {
            code_ttl: secs_at(cfg, "/otp/code_ttl_secs", d.otp.code_ttl)?,
            issue_quota: WindowQuota::new(
                positive_u32_at(cfg, "/otp/issue_limit", d.otp.issue_quota.limit)?,
                secs_at(cfg, "/otp/issue_window_secs", d.otp.issue_quota.window)?,
            ),
            revoke_older_on_verify: bool_at(
                cfg,
                "/otp/revoke_older_on_verify",
                d.otp.revoke_older_on_verify,
            )?,
        };

        let staging = StagingSettings {
            expiry: secs_at(cfg, "/staging/expiry_secs", d.staging.expiry)?,
            max_attempts: positive_u32_at(cfg, "/staging/max_attempts", d.staging.max_attempts)?,
        };

        let fraud = FraudConfig {
            ip_max_orders_24h: positive_u32_at(
                cfg,
                "/fraud/ip_max_orders_24h",
                d.fraud.ip_max_orders_24h,
            )?,
            account_max_orders_24h: u32_at(
                cfg,
                "/fraud/account_max_orders_24h",
                d.fraud.account_max_orders_24h,
            )?,
            account_max_orders_1h: u32_at(
                cfg,
                "/fraud/account_max_orders_1h",
                d.fraud.account_max_orders_1h,
            )?,
        };

        let dp = d.reclaim.policy;
        let policy = ReclaimPolicy {
            abandon_after: hours_at(cfg, "/reclaim/abandon_after_hours", dp.abandon_after)?,
            reminder_spacing: hours_at(cfg, "/reclaim/reminder_spacing_hours", dp.reminder_spacing)?,
            delete_after: hours_at(cfg, "/reclaim/delete_after_hours", dp.delete_after)?,
            max_reminders: u32_at(cfg, "/reclaim/max_reminders", dp.max_reminders)?,
        };
        if policy.delete_after <= policy.reminder_spacing {
            bail!("reclaim.delete_after_hours must exceed reclaim.reminder_spacing_hours");
        }
        let reclaim = ReclaimSettings {
            interval: std_secs_at(cfg, "/reclaim/interval_secs", d.reclaim.interval)?,
            policy,
            batch_limit: positive_u32_at(cfg, "/reclaim/batch_limit", d.reclaim.batch_limit)?,
            lease_ttl: secs_at(cfg, "/reclaim/lease_ttl_secs", d.reclaim.lease_ttl)?,
        };

        let outbox = OutboxSettings {
            poll_interval: std_secs_at(cfg, "/outbox/poll_interval_secs", d.outbox.poll_interval)?,
            batch_limit: positive_u32_at(cfg, "/outbox/batch_limit", d.outbox.batch_limit)?,
            max_attempts: positive_u32_at(cfg, "/outbox/max_attempts", d.outbox.max_attempts)?,
            base_backoff: secs_at(cfg, "/outbox/base_backoff_secs", d.outbox.base_backoff)?,
        };

        let admin_notify_email = match cfg.pointer("/admin/notify_email") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(other) => bail!("admin.notify_email must be a string (got {other})"),
        };

        Ok(Self {
            otp,
            staging,
            fraud,
            reclaim,
            outbox,
            admin_notify_email,
        })
    }
}

fn u64_at(cfg: &Value, ptr: &str, default: u64) -> Result<u64> {
    match cfg.pointer(ptr) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| anyhow!("config {ptr} must be a non-negative integer (got {v})")),
    }
}

fn u32_at(cfg: &Value, ptr: &str, default: u32) -> Result<u32> {
    let v = u64_at(cfg, ptr, default as u64)?;
    u32::try_from(v).map_err(|_| anyhow!("config {ptr} out of range: {v}"))
}

fn positive_u32_at(cfg: &Value, ptr: &str, default: u32) -> Result<u32> {
    let v = u32_at(cfg, ptr, default)?;
    if v == 0 {
        bail!("config {ptr} must be > 0");
    }
    Ok(v)
}

fn secs_at(cfg: &Value, ptr: &str, default: Duration) -> Result<Duration> {
    let secs = u64_at(cfg, ptr, default.num_seconds().max(0) as u64)?;
    if secs == 0 {
        bail!("config {ptr} must be > 0");
    }
    Ok(Duration::seconds(secs as i64))
}

fn hours_at(cfg: &Value, ptr: &str, default: Duration) -> Result<Duration> {
    let hours = u64_at(cfg, ptr, default.num_hours().max(0) as u64)?;
    if hours == 0 {
        bail!("config {ptr} must be > 0");
    }
    Ok(Duration::hours(hours as i64))
}

fn std_secs_at(cfg: &Value, ptr: &str, default: std::time::Duration) -> Result<std::time::Duration> {
    let secs = u64_at(cfg, ptr, default.as_secs())?;
    if secs == 0 {
        bail!("config {ptr} must be > 0");
    }
    Ok(std::time::Duration::from_secs(secs))
}

fn bool_at(cfg: &Value, ptr: &str, default: bool) -> Result<bool> {
    match cfg.pointer(ptr) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| anyhow!("config {ptr} must be a boolean (got {v})")),
    }
}
