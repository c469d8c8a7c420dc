//! Events the guard publishes for downstream collaborators (order timeline,
//! admin review queue, survey mailer). OTP codes never appear here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which status column a transition touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardedEntity {
    Order,
    Payment,
    Application,
    Account,
}

impl GuardedEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardedEntity::Order => "order",
            GuardedEntity::Payment => "payment",
            GuardedEntity::Application => "application",
            GuardedEntity::Account => "account",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardEvent {
    StatusChanged {
        entity: GuardedEntity,
        id: Uuid,
        from: String,
        to: String,
        at: DateTime<Utc>,
    },
    SurveyRequested {
        order_id: Uuid,
        account_id: Uuid,
        at: DateTime<Utc>,
    },
    AccountFlagged {
        account_id: Uuid,
        reason: String,
        at: DateTime<Utc>,
    },
    /// Five failed confirmations on a staged profile change.
    SecurityReview {
        account_id: Uuid,
        reason: String,
        at: DateTime<Utc>,
    },
    ProfileChangeConfirmed {
        account_id: Uuid,
        fields: Vec<String>,
        at: DateTime<Utc>,
    },
    ApplicationReclaimed {
        application_id: Uuid,
        order_id: Uuid,
        at: DateTime<Utc>,
    },
}

impl GuardEvent {
    /// Short name used as the SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            GuardEvent::StatusChanged { .. } => "status_changed",
            GuardEvent::SurveyRequested { .. } => "survey_requested",
            GuardEvent::AccountFlagged { .. } => "account_flagged",
            GuardEvent::SecurityReview { .. } => "security_review",
            GuardEvent::ProfileChangeConfirmed { .. } => "profile_change_confirmed",
            GuardEvent::ApplicationReclaimed { .. } => "application_reclaimed",
        }
    }
}
