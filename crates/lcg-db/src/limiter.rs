use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lcg_risk::{decide, RateDecision, WindowQuota};
use lcg_runtime::RateLimiter;
use sqlx::PgPool;

/// [`RateLimiter`] over `rate_limit_events`, shared by every instance on the
/// same database. Checks on one key are serialized with a transaction-scoped
/// advisory lock so count-then-insert cannot overshoot the quota.
#[derive(Clone)]
pub struct PgRateLimiter {
    pool: PgPool,
}

impl PgRateLimiter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check_and_record(
        &self,
        key: &str,
        quota: WindowQuota,
        now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        let mut tx = self.pool.begin().await.context("begin tx failed")?;

        sqlx::query("select pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *tx)
            .await
            .context("rate limit lock failed")?;

        let (count, oldest): (i64, Option<DateTime<Utc>>) = sqlx::query_as(
            "select count(*)::bigint, min(at) from rate_limit_events where key = $1 and at > $2",
        )
        .bind(key)
        .bind(now - quota.window)
        .fetch_one(&mut *tx)
        .await
        .context("rate limit count failed")?;

        let decision = decide(u32::try_from(count).unwrap_or(u32::MAX), oldest, now, quota);
        if decision.is_allowed() {
            sqlx::query("insert into rate_limit_events (key, at, expires_at) values ($1, $2, $3)")
                .bind(key)
                .bind(now)
                .bind(now + quota.window)
                .execute(&mut *tx)
                .await
                .context("rate limit insert failed")?;
        }

        tx.commit().await.context("rate limit commit failed")?;
        Ok(decision)
    }

    async fn prune(&self, now: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query("delete from rate_limit_events where expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .context("rate limit prune failed")?;
        Ok(res.rows_affected())
    }
}
