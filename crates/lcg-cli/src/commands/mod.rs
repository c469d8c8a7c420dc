//! Command handler modules for lcg-cli.
//!
//! Shared wiring used by multiple command paths lives here.

pub mod guard;

use std::sync::Arc;

use anyhow::Result;
use lcg_audit::JsonlAuditSink;
use lcg_config::{LoadedConfig, UnusedKeyPolicy};
use lcg_db::{PgRateLimiter, PgStore};
use lcg_runtime::{
    Clock, DiscardEvents, GuardRuntime, LogMailer, NoCompliance, OsRandomCodes, Ports, SystemClock,
};

/// Layered config from explicit paths; none means built-in defaults.
pub fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    if paths.is_empty() {
        return lcg_config::load_layered_yaml_from_strings(&[]);
    }
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    lcg_config::load_layered_yaml(&path_refs)
}

/// Postgres-backed runtime for one-shot operator commands. Events have no
/// subscribers outside the daemon and are discarded.
pub async fn connect_runtime(config_paths: &[String]) -> Result<GuardRuntime> {
    let loaded = load_config(config_paths)?;
    let unused = lcg_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !unused.is_clean() {
        tracing::warn!(keys = ?unused.unused_leaf_pointers, "config has keys nothing reads");
    }
    let cfg = loaded.guard()?;

    let pool = lcg_db::connect_from_env().await?;
    let store = Arc::new(PgStore::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let audit = JsonlAuditSink::open(lcg_audit::audit_path_from_env(), clock.clone())?;

    let ports = Ports {
        orders: store.clone(),
        applications: store.clone(),
        accounts: store.clone(),
        otp: store.clone(),
        outbox: store.clone(),
        cascade: store.clone(),
        lease: store.clone(),
        limiter: Arc::new(PgRateLimiter::new(pool)),
        mailer: Arc::new(LogMailer),
        audit: Arc::new(audit),
        compliance: Arc::new(NoCompliance),
        events: Arc::new(DiscardEvents),
        clock,
        codes: Arc::new(OsRandomCodes),
    };
    Ok(GuardRuntime::new(ports, &cfg))
}
