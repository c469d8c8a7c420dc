use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use lcg_runtime::{AuditSink, Clock};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::AuditWriter;

pub const ENV_AUDIT_PATH: &str = "LCG_AUDIT_PATH";
pub const DEFAULT_AUDIT_PATH: &str = "audit/guard_audit.jsonl";

/// `LCG_AUDIT_PATH`, or the default relative to the working directory.
pub fn audit_path_from_env() -> String {
    std::env::var(ENV_AUDIT_PATH).unwrap_or_else(|_| DEFAULT_AUDIT_PATH.to_string())
}

/// [`AuditSink`] backed by a hash-chained JSONL file. Appends are serialized
/// through one writer so `seq` and the chain stay linear.
#[derive(Clone)]
pub struct JsonlAuditSink {
    writer: Arc<Mutex<AuditWriter>>,
    clock: Arc<dyn Clock>,
}

impl JsonlAuditSink {
    /// Open (or continue) the log at `path` with the hash chain enabled.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let writer = AuditWriter::resume(path, true)?;
        tracing::info!(path = ?writer.path(), seq = writer.seq(), "audit log opened");
        Ok(Self::from_writer(writer, clock))
    }

    pub fn from_writer(writer: AuditWriter, clock: Arc<dyn Clock>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            clock,
        }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(
        &self,
        action: &str,
        actor_id: Option<Uuid>,
        target_id: &str,
        details: Value,
    ) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.append(self.clock.now(), action, actor_id, target_id, details)?;
        Ok(())
    }
}
