use chrono::Duration;
use lcg_lifecycle::TransitionError;

/// Caller-facing failure of a guard operation.
///
/// Infrastructure failures collapse into [`GuardError::Internal`]; the full
/// chain is logged where the conversion happens and never reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0} expired; start again")]
    Expired(&'static str),

    #[error("rate limited; retry after {}s", .retry_after.num_seconds())]
    RateLimited { retry_after: Duration },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error")]
    Internal,
}

impl GuardError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        GuardError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::Validation(_) => "VALIDATION",
            GuardError::InvalidTransition(_) => "INVALID_TRANSITION",
            GuardError::NotFound { .. } => "NOT_FOUND",
            GuardError::Unauthorized(_) => "UNAUTHORIZED",
            GuardError::Expired(_) => "EXPIRED",
            GuardError::RateLimited { .. } => "RATE_LIMITED",
            GuardError::Conflict(_) => "CONFLICT",
            GuardError::Internal => "INTERNAL",
        }
    }
}

impl From<anyhow::Error> for GuardError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "infrastructure failure");
        GuardError::Internal
    }
}

pub type GuardResult<T> = Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;
    use lcg_schemas::OrderStatus;

    #[test]
    fn internal_error_hides_details() {
        let err: GuardError = anyhow::anyhow!("connection refused to 10.0.0.5:5432").into();
        assert_eq!(err.to_string(), "internal error");
        assert_eq!(err.code(), "INTERNAL");
    }

    #[test]
    fn transition_error_keeps_allowed_set() {
        let te = lcg_lifecycle::transition(OrderStatus::Pending, OrderStatus::Filed).unwrap_err();
        let err = GuardError::from(te);
        assert!(err.to_string().contains("paid, processing, cancelled"));
    }

    #[test]
    fn rate_limited_reports_seconds() {
        let err = GuardError::RateLimited {
            retry_after: Duration::minutes(2),
        };
        assert_eq!(err.to_string(), "rate limited; retry after 120s");
    }
}
