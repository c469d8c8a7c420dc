//! lcg-db
//!
//! Postgres (sqlx) implementation of every storage port in `lcg-runtime`,
//! plus the shared rate-limit table and the sweep lease.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod cascade;
mod entities;
mod limiter;
mod queue;

pub use limiter::PgRateLimiter;

pub const ENV_DB_URL: &str = "LCG_DATABASE_URL";

/// Connect to Postgres using LCG_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    tracing::debug!("db migrations applied");
    Ok(())
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    let pending_outbox = if exists {
        let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
            "select count(*)::bigint from email_outbox where status = 'pending'",
        )
        .fetch_one(pool)
        .await
        .context("status outbox count failed")?;
        n
    } else {
        0
    };

    Ok(DbStatus {
        ok: one == 1,
        has_orders_table: exists,
        pending_outbox,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
    pub pending_outbox: i64,
}

/// One pool, every storage port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn u32_col(v: i32, col: &str) -> Result<u32> {
    u32::try_from(v).with_context(|| format!("negative {col}: {v}"))
}
