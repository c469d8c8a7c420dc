//! Email outbox and the sweep lease.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lcg_runtime::{OutboxStore, SweepLease};
use lcg_schemas::{OutboundEmail, OutboxMessage, OutboxStatus};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::{u32_col, PgStore};

fn outbox_from_row(row: &PgRow) -> Result<OutboxMessage> {
    Ok(OutboxMessage {
        id: row.try_get("id")?,
        email: OutboundEmail {
            to: row.try_get("to_addr")?,
            subject: row.try_get("subject")?,
            body: row.try_get("body")?,
            category: row.try_get("category")?,
        },
        status: OutboxStatus::parse(row.try_get::<&str, _>("status")?)?,
        attempts: u32_col(row.try_get("attempts")?, "attempts")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn enqueue(&self, email: &OutboundEmail, now: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            insert into email_outbox (id, to_addr, subject, body, category, status, attempts, next_attempt_at, created_at)
            values ($1, $2, $3, $4, $5, 'pending', 0, $6, $6)
            "#,
        )
        .bind(id)
        .bind(&email.to)
        .bind(&email.subject)
        .bind(&email.body)
        .bind(&email.category)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("outbox enqueue failed")?;
        Ok(id)
    }

    /// `FOR UPDATE SKIP LOCKED` keeps two dispatchers off the same row; the
    /// pushed `next_attempt_at` keeps it off again after the claim commits.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            with due as (
                select id
                  from email_outbox
                 where status = 'pending' and next_attempt_at <= $1
                 order by next_attempt_at, created_at
                 limit $2
                 for update skip locked
            )
            update email_outbox o
               set next_attempt_at = $3
              from due
             where o.id = due.id
            returning o.id, o.to_addr, o.subject, o.body, o.category, o.status,
                      o.attempts, o.next_attempt_at, o.last_error, o.created_at
            "#,
        )
        .bind(now)
        .bind(i64::from(limit))
        .bind(now + lease)
        .fetch_all(&self.pool)
        .await
        .context("outbox claim_due failed")?;
        rows.iter().map(outbox_from_row).collect()
    }

    async fn mark_sent(&self, msg_id: Uuid, attempts: u32, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            update email_outbox
               set status = 'sent', attempts = $2, sent_at = $3, last_error = null
             where id = $1
            "#,
        )
        .bind(msg_id)
        .bind(attempts as i32)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("outbox mark_sent failed")?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        msg_id: Uuid,
        attempts: u32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            update email_outbox
               set attempts = $2,
                   last_error = $3,
                   status = case when $4::timestamptz is null then 'dead' else 'pending' end,
                   next_attempt_at = coalesce($4, next_attempt_at)
             where id = $1
            "#,
        )
        .bind(msg_id)
        .bind(attempts as i32)
        .bind(error)
        .bind(retry_at)
        .execute(&self.pool)
        .await
        .context("outbox mark_failed failed")?;
        Ok(())
    }
}

#[async_trait]
impl SweepLease for PgStore {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            insert into sweep_leases (name, holder, expires_at)
            values ($1, $2, $3)
            on conflict (name) do update
               set holder = excluded.holder, expires_at = excluded.expires_at
             where sweep_leases.holder = excluded.holder
                or sweep_leases.expires_at <= $4
            returning name
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(now + ttl)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("lease try_acquire failed")?;
        Ok(row.is_some())
    }

    async fn release(&self, name: &str, holder: &str) -> Result<()> {
        sqlx::query("delete from sweep_leases where name = $1 and holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await
            .context("lease release failed")?;
        Ok(())
    }
}
