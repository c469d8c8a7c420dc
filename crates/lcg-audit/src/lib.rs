//! lcg-audit
//!
//! Append-only audit log in JSON Lines, one entry per line. With the hash
//! chain enabled every entry carries `hash_prev` (the previous entry's
//! `hash_self`) and `hash_self` (sha256 of its own canonical JSON without
//! `hash_self`), so edits, deletions and reordering are detectable offline.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

mod sink;

pub use sink::{audit_path_from_env, JsonlAuditSink, DEFAULT_AUDIT_PATH, ENV_AUDIT_PATH};

pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Number of entries already in the file; the next entry's `seq`.
    seq: u64,
}

impl AuditWriter {
    /// Start a fresh log at `path`. Parent directories are created.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }

        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Continue an existing log after a restart. The file must verify; a
    /// broken chain is refused rather than extended.
    pub fn resume(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let mut writer = Self::new(path.as_ref(), hash_chain)?;
        if !writer.path.exists() {
            return Ok(writer);
        }

        let content = fs::read_to_string(&writer.path)
            .with_context(|| format!("read audit log {:?}", writer.path))?;
        if let VerifyResult::Broken { line, reason } = verify_hash_chain_str(&content)? {
            bail!("audit log {:?} broken at line {line}: {reason}", writer.path);
        }

        let mut last: Option<AuditEntry> = None;
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(line.trim())
                .with_context(|| format!("parse audit entry at line {}", i + 1))?;
            last = Some(entry);
        }
        if let Some(entry) = last {
            writer.seq = entry.seq + 1;
            writer.last_hash = entry.hash_self;
        }
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one entry stamped `at`.
    pub fn append(
        &mut self,
        at: DateTime<Utc>,
        action: &str,
        actor_id: Option<Uuid>,
        target_id: &str,
        details: Value,
    ) -> Result<AuditEntry> {
        let entry_id = derive_entry_id(self.last_hash.as_deref(), &details, self.seq)?;

        let mut entry = AuditEntry {
            entry_id,
            seq: self.seq,
            ts_utc: at,
            action: action.to_string(),
            actor_id,
            target_id: target_id.to_string(),
            details,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            entry.hash_prev = self.last_hash.clone();
            let self_hash = compute_entry_hash(&entry)?;
            entry.hash_self = Some(self_hash);
        }

        let line = canonical_json_line(&entry)?;
        append_line(&self.path, &line)?;

        self.seq += 1;
        if self.hash_chain {
            self.last_hash = entry.hash_self.clone();
        }
        Ok(entry)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub seq: u64,
    pub ts_utc: DateTime<Utc>,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub target_id: String,
    pub details: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Entry ids are a v5 UUID over chain position and content, so replaying the
/// same log yields the same ids.
fn derive_entry_id(prev: Option<&str>, details: &Value, seq: u64) -> Result<Uuid> {
    let canonical = canonical_json_line(details)?;
    let name = format!("{}|{}|{}", prev.unwrap_or("genesis"), seq, canonical);
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Compact JSON with object keys sorted recursively.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit entry failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), sort_keys(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// sha256 over the canonical entry with `hash_self` cleared.
pub fn compute_entry_hash(entry: &AuditEntry) -> Result<String> {
    let mut clone = entry.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Walk JSONL content and report the first line whose link or self hash
/// does not check out.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut expected_seq = 0u64;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let entry: AuditEntry = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit entry at line {}", i + 1))?;
        line_count += 1;

        if entry.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, entry.hash_prev
                ),
            });
        }

        if let Some(ref claimed) = entry.hash_self {
            let recomputed = compute_entry_hash(&entry)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!(
                        "hash_self mismatch: claimed {}, recomputed {}",
                        claimed, recomputed
                    ),
                });
            }
        }

        if entry.seq != expected_seq {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!("seq gap: expected {expected_seq}, got {}", entry.seq),
            });
        }

        expected_seq += 1;
        prev_hash = entry.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    /// 1-based line of the first bad entry.
    Broken { line: usize, reason: String },
}
