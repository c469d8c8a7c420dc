//! Ordered, single-transaction cascades. Any failing step rolls back the
//! whole unit; nothing is half-deleted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lcg_runtime::{CascadeOutcome, CascadeReport, CascadeStep, CascadeStore};
use lcg_schemas::{ApplicationKind, ApplicationStatus};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::entities::application_table;
use crate::PgStore;

fn step_sql(step: CascadeStep) -> &'static str {
    match step {
        CascadeStep::TimelineEvents => "delete from order_timeline_events where order_id = $1",
        CascadeStep::DocumentRequests => {
            "delete from document_requests where document_id in \
             (select id from application_documents where order_id = $1)"
        }
        CascadeStep::ApplicationDocuments => "delete from application_documents where order_id = $1",
        CascadeStep::Notifications => "delete from notifications where order_id = $1",
        CascadeStep::Application => {
            "with l as (delete from llc_applications where order_id = $1 returning 1), \
                  m as (delete from maintenance_applications where order_id = $1 returning 1) \
             select (select count(*) from l) + (select count(*) from m)"
        }
        CascadeStep::Order => "delete from orders where id = $1",
    }
}

async fn cascade_order(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<CascadeReport> {
    let mut report = CascadeReport::default();
    for step in CascadeStep::ORDER {
        let n = match step {
            CascadeStep::Application => {
                let (n,): (i64,) = sqlx::query_as(step_sql(step))
                    .bind(order_id)
                    .fetch_one(&mut **tx)
                    .await
                    .with_context(|| format!("cascade step {} failed", step.as_str()))?;
                n as u64
            }
            _ => sqlx::query(step_sql(step))
                .bind(order_id)
                .execute(&mut **tx)
                .await
                .with_context(|| format!("cascade step {} failed", step.as_str()))?
                .rows_affected(),
        };
        report.deleted.push((step, n));
    }
    Ok(report)
}

#[async_trait]
impl CascadeStore for PgStore {
    async fn delete_order_cascade(&self, order_id: Uuid) -> Result<CascadeOutcome> {
        let mut tx = self.pool.begin().await.context("begin tx failed")?;

        let exists = sqlx::query("select 1 from orders where id = $1 for update")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await
            .context("lock order failed")?
            .is_some();
        if !exists {
            return Ok(CascadeOutcome::NotFound);
        }

        let report = cascade_order(&mut tx, order_id).await?;
        tx.commit().await.context("commit cascade failed")?;
        tracing::debug!(order_id = %order_id, "order cascade committed");
        Ok(CascadeOutcome::Deleted(report))
    }

    async fn delete_draft_application_cascade(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
    ) -> Result<CascadeOutcome> {
        let mut tx = self.pool.begin().await.context("begin tx failed")?;

        let sql = format!(
            "select order_id, status from {} where id = $1 for update",
            application_table(kind)
        );
        let row: Option<(Uuid, String)> = sqlx::query_as(&sql)
            .bind(app_id)
            .fetch_optional(&mut *tx)
            .await
            .context("lock application failed")?;
        let Some((order_id, status)) = row else {
            return Ok(CascadeOutcome::NotFound);
        };
        let status = ApplicationStatus::parse(&status)?;
        if status != ApplicationStatus::Draft {
            return Ok(CascadeOutcome::NotDraft(status));
        }

        let report = cascade_order(&mut tx, order_id).await?;
        tx.commit().await.context("commit cascade failed")?;
        Ok(CascadeOutcome::Deleted(report))
    }
}
