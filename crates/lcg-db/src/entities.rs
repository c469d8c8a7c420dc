use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lcg_runtime::{AccountStore, ApplicationStore, OrderStore, OtpStore};
use lcg_schemas::{
    Account, AccountStatus, Application, ApplicationKind, ApplicationStatus, Locale, Order,
    OrderStatus, OtpPurpose, OtpToken, PaymentStatus, StagedChange,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{u32_col, PgStore};

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub(crate) fn application_table(kind: ApplicationKind) -> &'static str {
    match kind {
        ApplicationKind::Llc => "llc_applications",
        ApplicationKind::Maintenance => "maintenance_applications",
    }
}

const ORDER_COLS: &str = "id, owner_id, status, payment_status, amount_cents, created_at, paid_at";
const APP_COLS: &str =
    "id, order_id, status, abandoned_at, reminders_sent, last_reminder_at, last_updated";

fn order_from_row(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        status: OrderStatus::parse(row.try_get::<&str, _>("status")?)?,
        payment_status: PaymentStatus::parse(row.try_get::<&str, _>("payment_status")?)?,
        amount_cents: row.try_get("amount_cents")?,
        created_at: row.try_get("created_at")?,
        paid_at: row.try_get("paid_at")?,
    })
}

fn application_from_row(kind: ApplicationKind, row: &PgRow) -> Result<Application> {
    Ok(Application {
        id: row.try_get("id")?,
        kind,
        order_id: row.try_get("order_id")?,
        status: ApplicationStatus::parse(row.try_get::<&str, _>("status")?)?,
        abandoned_at: row.try_get("abandoned_at")?,
        reminders_sent: u32_col(row.try_get("reminders_sent")?, "reminders_sent")?,
        last_reminder_at: row.try_get("last_reminder_at")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let Json(profile): Json<BTreeMap<String, String>> = row.try_get("profile")?;
    let pending: Option<Json<StagedChange>> = row.try_get("pending_change")?;
    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        locale: Locale::parse_lossy(row.try_get::<&str, _>("locale")?),
        status: AccountStatus::parse(row.try_get::<&str, _>("status")?)?,
        profile,
        pending_change: pending.map(|Json(c)| c),
        internal_notes: row.try_get("internal_notes")?,
        security_otp_required: row.try_get("security_otp_required")?,
        version: row.try_get("version")?,
    })
}

fn token_from_row(row: &PgRow) -> Result<OtpToken> {
    Ok(OtpToken {
        id: row.try_get("id")?,
        subject_email: row.try_get("subject_email")?,
        code: row.try_get("code")?,
        purpose: OtpPurpose::parse(row.try_get::<&str, _>("purpose")?)?,
        expires_at: row.try_get("expires_at")?,
        verified: row.try_get("verified")?,
        created_at: row.try_get("created_at")?,
    })
}

impl PgStore {
    /// Registration lives outside the guard; this is the seeding path used by
    /// operators and tests.
    pub async fn insert_account(&self, a: &Account) -> Result<()> {
        sqlx::query(
            r#"
            insert into accounts (
              id, email, locale, status, profile, pending_change, internal_notes,
              security_otp_required, version
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(a.id)
        .bind(&a.email)
        .bind(a.locale.as_str())
        .bind(a.status.as_str())
        .bind(Json(&a.profile))
        .bind(a.pending_change.as_ref().map(Json))
        .bind(&a.internal_notes)
        .bind(a.security_otp_required)
        .bind(a.version)
        .execute(&self.pool)
        .await
        .context("insert_account failed")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order_with_application(&self, order: &Order, app: &Application) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin tx failed")?;

        sqlx::query(
            r#"
            insert into orders (id, owner_id, status, payment_status, amount_cents, created_at, paid_at)
            values ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id)
        .bind(order.owner_id)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.amount_cents)
        .bind(order.created_at)
        .bind(order.paid_at)
        .execute(&mut *tx)
        .await
        .context("insert order failed")?;

        let sql = format!(
            "insert into {} ({APP_COLS}) values ($1, $2, $3, $4, $5, $6, $7)",
            application_table(app.kind)
        );
        sqlx::query(&sql)
            .bind(app.id)
            .bind(app.order_id)
            .bind(app.status.as_str())
            .bind(app.abandoned_at)
            .bind(app.reminders_sent as i32)
            .bind(app.last_reminder_at)
            .bind(app.last_updated)
            .execute(&mut *tx)
            .await
            .context("insert application failed")?;

        tx.commit().await.context("commit order insert failed")?;
        Ok(())
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        let sql = format!("select {ORDER_COLS} from orders where id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetch_order failed")?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool> {
        let res = sqlx::query("update orders set status = $3 where id = $1 and status = $2")
            .bind(order_id)
            .bind(expected.as_str())
            .bind(next.as_str())
            .execute(&self.pool)
            .await
            .context("update_order_status failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_payment_status(
        &self,
        order_id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            update orders
               set payment_status = $3,
                   paid_at = coalesce($4, paid_at)
             where id = $1 and payment_status = $2
            "#,
        )
        .bind(order_id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(paid_at)
        .execute(&self.pool)
        .await
        .context("update_payment_status failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn order_times_for_owner(
        &self,
        owner_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let rows: Vec<(DateTime<Utc>,)> = sqlx::query_as(
            "select created_at from orders where owner_id = $1 and created_at > $2 order by created_at",
        )
        .bind(owner_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("order_times_for_owner failed")?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }
}

// ---------------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------------

#[async_trait]
impl ApplicationStore for PgStore {
    async fn fetch_application(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
    ) -> Result<Option<Application>> {
        let sql = format!(
            "select {APP_COLS} from {} where id = $1",
            application_table(kind)
        );
        let row = sqlx::query(&sql)
            .bind(app_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetch_application failed")?;
        row.as_ref()
            .map(|r| application_from_row(kind, r))
            .transpose()
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
        let sql = format!(
            r#"
            update {}
               set status = $3,
                   last_updated = $4,
                   abandoned_at = case when $5 then null else abandoned_at end
             where id = $1 and status = $2
            "#,
            application_table(kind)
        );
        let res = sqlx::query(&sql)
            .bind(app_id)
            .bind(expected.as_str())
            .bind(next.as_str())
            .bind(now)
            .bind(clear_abandonment)
            .execute(&self.pool)
            .await
            .context("update_application_status failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn list_stale_drafts(
        &self,
        kind: ApplicationKind,
        idle_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Application>> {
        let sql = format!(
            r#"
            select {APP_COLS} from {}
             where status = 'draft' and abandoned_at is null and last_updated < $1
             order by last_updated
             limit $2
            "#,
            application_table(kind)
        );
        let rows = sqlx::query(&sql)
            .bind(idle_before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .context("list_stale_drafts failed")?;
        rows.iter().map(|r| application_from_row(kind, r)).collect()
    }

    async fn mark_abandoned(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            "update {} set abandoned_at = $2 where id = $1 and abandoned_at is null and status = 'draft'",
            application_table(kind)
        );
        let res = sqlx::query(&sql)
            .bind(app_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .context("mark_abandoned failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn list_reminder_candidates(
        &self,
        kind: ApplicationKind,
        abandoned_after: DateTime<Utc>,
        last_reminder_before: DateTime<Utc>,
        max_reminders: u32,
        limit: u32,
    ) -> Result<Vec<Application>> {
        let sql = format!(
            r#"
            select {APP_COLS} from {}
             where status = 'draft'
               and abandoned_at > $1
               and reminders_sent < $2
               and (last_reminder_at is null or last_reminder_at < $3)
             order by abandoned_at
             limit $4
            "#,
            application_table(kind)
        );
        let rows = sqlx::query(&sql)
            .bind(abandoned_after)
            .bind(i32::try_from(max_reminders).unwrap_or(i32::MAX))
            .bind(last_reminder_before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .context("list_reminder_candidates failed")?;
        rows.iter().map(|r| application_from_row(kind, r)).collect()
    }

    async fn record_reminder(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
        expected_sent: u32,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            r#"
            update {}
               set reminders_sent = reminders_sent + 1,
                   last_reminder_at = greatest(coalesce(last_reminder_at, $3), $3)
             where id = $1 and reminders_sent = $2
            "#,
            application_table(kind)
        );
        let res = sqlx::query(&sql)
            .bind(app_id)
            .bind(i32::try_from(expected_sent).unwrap_or(i32::MAX))
            .bind(at)
            .execute(&self.pool)
            .await
            .context("record_reminder failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn list_expired_abandoned(
        &self,
        kind: ApplicationKind,
        abandoned_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Application>> {
        let sql = format!(
            r#"
            select {APP_COLS} from {}
             where status = 'draft' and abandoned_at < $1
             order by abandoned_at
             limit $2
            "#,
            application_table(kind)
        );
        let rows = sqlx::query(&sql)
            .bind(abandoned_before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .context("list_expired_abandoned failed")?;
        rows.iter().map(|r| application_from_row(kind, r)).collect()
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[async_trait]
impl AccountStore for PgStore {
    async fn fetch_account(&self, account_id: Uuid) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            select id, email, locale, status, profile, pending_change, internal_notes,
                   security_otp_required, version
              from accounts where id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch_account failed")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn save_account(&self, a: &Account) -> Result<bool> {
        let res = sqlx::query(
            r#"
            update accounts
               set email = $3,
                   locale = $4,
                   status = $5,
                   profile = $6,
                   pending_change = $7,
                   internal_notes = $8,
                   security_otp_required = $9,
                   version = version + 1
             where id = $1 and version = $2
            "#,
        )
        .bind(a.id)
        .bind(a.version)
        .bind(&a.email)
        .bind(a.locale.as_str())
        .bind(a.status.as_str())
        .bind(Json(&a.profile))
        .bind(a.pending_change.as_ref().map(Json))
        .bind(&a.internal_notes)
        .bind(a.security_otp_required)
        .execute(&self.pool)
        .await
        .context("save_account failed")?;
        Ok(res.rows_affected() == 1)
    }
}

// ---------------------------------------------------------------------------
// OTP tokens
// ---------------------------------------------------------------------------

#[async_trait]
impl OtpStore for PgStore {
    async fn insert_token(&self, t: &OtpToken) -> Result<()> {
        sqlx::query(
            r#"
            insert into otp_tokens (id, subject_email, code, purpose, expires_at, verified, created_at)
            values ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(t.id)
        .bind(&t.subject_email)
        .bind(&t.code)
        .bind(t.purpose.as_str())
        .bind(t.expires_at)
        .bind(t.verified)
        .bind(t.created_at)
        .execute(&self.pool)
        .await
        .context("insert_token failed")?;
        Ok(())
    }

    async fn find_newest_match(
        &self,
        subject_email: &str,
        code: &str,
        purpose: OtpPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<OtpToken>> {
        let row = sqlx::query(
            r#"
            select id, subject_email, code, purpose, expires_at, verified, created_at
              from otp_tokens
             where subject_email = $1 and code = $2 and purpose = $3
               and not verified and expires_at > $4
             order by created_at desc
             limit 1
            "#,
        )
        .bind(subject_email)
        .bind(code)
        .bind(purpose.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("find_newest_match failed")?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn mark_verified(&self, token_id: Uuid) -> Result<bool> {
        let res = sqlx::query("update otp_tokens set verified = true where id = $1 and not verified")
            .bind(token_id)
            .execute(&self.pool)
            .await
            .context("mark_verified failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn revoke_outstanding(&self, subject_email: &str, purpose: OtpPurpose) -> Result<u64> {
        let res = sqlx::query(
            "delete from otp_tokens where subject_email = $1 and purpose = $2 and not verified",
        )
        .bind(subject_email)
        .bind(purpose.as_str())
        .execute(&self.pool)
        .await
        .context("revoke_outstanding failed")?;
        Ok(res.rows_affected())
    }
}
