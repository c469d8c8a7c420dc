//! lcg-daemon entry point.
//!
//! Sets up tracing, loads config, wires the Postgres-backed ports into a
//! [`GuardRuntime`], spawns the background loops and serves health, status
//! and the SSE stream.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use lcg_audit::JsonlAuditSink;
use lcg_config::{LoadedConfig, UnusedKeyPolicy};
use lcg_daemon::{routes, state};
use lcg_db::{PgRateLimiter, PgStore};
use lcg_runtime::{
    Clock, GuardRuntime, LogMailer, NoCompliance, OsRandomCodes, Ports, SystemClock,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

const ENV_CONFIG: &str = "LCG_CONFIG";
const ENV_ADDR: &str = "LCG_DAEMON_ADDR";
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config()?;
    let unused = lcg_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !unused.is_clean() {
        warn!(keys = ?unused.unused_leaf_pointers, "config has keys nothing reads");
    }
    let cfg = loaded.guard()?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let pool = lcg_db::connect_from_env().await?;
    lcg_db::migrate(&pool).await?;
    let store = Arc::new(PgStore::new(pool.clone()));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let audit = JsonlAuditSink::open(lcg_audit::audit_path_from_env(), clock.clone())?;

    let shared = Arc::new(state::AppState::new(loaded.config_hash.clone()));

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
        events: Arc::new(shared.event_sink()),
        clock,
        codes: Arc::new(OsRandomCodes),
    };
    let rt = GuardRuntime::new(ports, &cfg);

    let holder = format!("lcg-daemon-{}", uuid::Uuid::new_v4());
    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_reclaim_loop(Arc::clone(&shared), rt.clone(), holder);
    state::spawn_outbox_loop(Arc::clone(&shared), rt.clone());
    state::spawn_prune_loop(Arc::clone(&shared), rt, PRUNE_INTERVAL);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr(&loaded);
    info!("lcg-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// `LCG_CONFIG` is a comma-separated list of YAML layers; unset means
/// built-in defaults.
fn load_config() -> anyhow::Result<LoadedConfig> {
    match std::env::var(ENV_CONFIG) {
        Ok(raw) => {
            let paths: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            lcg_config::load_layered_yaml(&paths)
        }
        Err(_) => lcg_config::load_layered_yaml_from_strings(&[]),
    }
}

/// Env beats config; both fall back to localhost:8899.
fn bind_addr(loaded: &LoadedConfig) -> SocketAddr {
    std::env::var(ENV_ADDR)
        .ok()
        .or_else(|| {
            loaded
                .config_json
                .pointer("/daemon/addr")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)))
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers(tower_http::cors::Any)
}
