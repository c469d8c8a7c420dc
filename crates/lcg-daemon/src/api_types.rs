//! Wire types for the lcg-daemon HTTP endpoints. No logic lives here.

use serde::{Deserialize, Serialize};

/// GET /v1/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// Hash of the merged config the loops run with.
    pub config_hash: String,
}

/// Query for GET /v1/stream. `events` is a comma-separated list of SSE event
/// names (`sweep`, `account_flagged`, ...); absent means everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    pub events: Option<String>,
}

impl StreamQuery {
    pub fn wanted(&self) -> Option<Vec<String>> {
        self.events.as_ref().map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }
}
