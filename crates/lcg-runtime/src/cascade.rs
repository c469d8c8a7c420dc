use lcg_schemas::ApplicationKind;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GuardError, GuardResult};
use crate::ports::{CascadeOutcome, CascadeReport, Ports};

/// Atomic removal of an order or draft application with every dependent row.
#[derive(Clone)]
pub struct CascadeDeleter {
    ports: Ports,
}

impl CascadeDeleter {
    pub fn new(ports: Ports) -> Self {
        Self { ports }
    }

    pub async fn delete_order_cascade(
        &self,
        order_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> GuardResult<CascadeReport> {
        match self.ports.cascade.delete_order_cascade(order_id).await? {
            CascadeOutcome::Deleted(report) => {
                self.deleted("order_cascade_deleted", order_id, actor_id, &report)
                    .await;
                Ok(report)
            }
            CascadeOutcome::NotFound => Err(GuardError::not_found("order", order_id)),
            CascadeOutcome::NotDraft(status) => {
                // Unreachable for the order-rooted cascade; treat as a store bug.
                warn!(order_id = %order_id, status = status.as_str(), "order cascade reported not-draft");
                Err(GuardError::Internal)
            }
        }
    }

    /// Same cascade rooted at an application; refused unless it is a draft.
    pub async fn delete_incomplete_application(
        &self,
        kind: ApplicationKind,
        app_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> GuardResult<CascadeReport> {
        match self
            .ports
            .cascade
            .delete_draft_application_cascade(kind, app_id)
            .await?
        {
            CascadeOutcome::Deleted(report) => {
                self.deleted("draft_application_deleted", app_id, actor_id, &report)
                    .await;
                Ok(report)
            }
            CascadeOutcome::NotFound => Err(GuardError::not_found("application", app_id)),
            CascadeOutcome::NotDraft(status) => Err(GuardError::Validation(format!(
                "application {app_id} is {}; only drafts can be deleted",
                status.as_str()
            ))),
        }
    }

    async fn deleted(
        &self,
        action: &str,
        root_id: Uuid,
        actor_id: Option<Uuid>,
        report: &CascadeReport,
    ) {
        let counts: serde_json::Map<String, serde_json::Value> = report
            .deleted
            .iter()
            .map(|(step, n)| (step.as_str().to_string(), json!(n)))
            .collect();
        info!(root_id = %root_id, action, "cascade delete committed");
        self.ports
            .audit(action, actor_id, &root_id.to_string(), json!({ "deleted": counts }))
            .await;
    }
}
