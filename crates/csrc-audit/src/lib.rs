//! csrc-audit
//!
//! Audit boundary for the allocation engine.
//! - `AuditEmitter` collaborator trait + bounded in-memory outbox
//! - Append-only JSONL writer with optional SHA-256 hash chain
//! - Chain verification for tamper detection

mod emitter;

pub use emitter::{
    AuditEmitter, BufferedEmitter, NullEmitter, PendingEvent, RISK_LIMIT_BREACH,
    SYS_CORRELATION_UPDATE, SYS_NUMERICAL_FALLBACK, SYS_RESAMPLING,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Topic stamped on events delivered through the [`AuditEmitter`] impl.
pub const ALLOCATION_TOPIC: &str = "allocation";

/// Namespace for deterministic event ids.
const EVENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6373_7263_2d61_7564_6974_2d65_7665_6e74);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub run_id: Uuid,
    /// Position in the log, starting at 0.
    pub seq: u64,
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

/// Append-only JSONL sink for allocation events, one event per line.
///
/// With `hash_chain` every line carries `hash_prev` (the previous line's
/// `hash_self`) and its own `hash_self`, so an edited or dropped line breaks
/// verification. Sequence numbers are checked either way.
pub struct AuditWriter {
    path: PathBuf,
    run_id: Uuid,
    hash_chain: bool,
    cursor: ChainCursor,
}

impl AuditWriter {
    /// Starts a fresh log at `path`, creating parent directories.
    pub fn new(path: impl AsRef<Path>, run_id: Uuid, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }
        Ok(Self {
            path,
            run_id,
            hash_chain,
            cursor: ChainCursor::default(),
        })
    }

    /// Reopens an existing log after an engine restore and continues its
    /// chain. A missing file starts a fresh log; a log that fails
    /// verification is refused.
    pub fn resume(path: impl AsRef<Path>, run_id: Uuid, hash_chain: bool) -> Result<Self> {
        let mut writer = Self::new(path, run_id, hash_chain)?;
        if !writer.path.exists() {
            return Ok(writer);
        }
        let content = fs::read_to_string(&writer.path)
            .with_context(|| format!("read audit log {:?}", writer.path))?;
        match walk_chain(&content)? {
            (cursor, None) => writer.cursor = cursor,
            (_, Some((line, reason))) => {
                bail!("AUDIT_CHAIN_BROKEN: {:?} line {line}: {reason}", writer.path)
            }
        }
        info!(
            path = %writer.path.display(),
            seq = writer.cursor.seq,
            "audit log resumed"
        );
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_hash(&self) -> Option<String> {
        self.cursor.last_hash.clone()
    }

    /// Number of events in the log, which is also the next event's `seq`.
    pub fn seq(&self) -> u64 {
        self.cursor.seq
    }

    /// Appends one event. Chain state advances only once the line is written.
    pub fn append(&mut self, topic: &str, event_type: &str, payload: Value) -> Result<AuditEvent> {
        let hash_prev = if self.hash_chain {
            self.cursor.last_hash.clone()
        } else {
            None
        };
        let mut ev = AuditEvent {
            event_id: derive_event_id(hash_prev.as_deref(), &payload, self.cursor.seq)?,
            run_id: self.run_id,
            seq: self.cursor.seq,
            ts_utc: Utc::now(),
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            payload,
            hash_prev,
            hash_self: None,
        };
        if self.hash_chain {
            ev.hash_self = Some(compute_event_hash(&ev)?);
        }

        append_line(&self.path, &canonical_json(&ev)?)?;
        self.cursor.accept(&ev);
        Ok(ev)
    }
}

impl AuditEmitter for AuditWriter {
    fn emit(&mut self, event_type: &str, payload: Value) {
        if let Err(err) = self.append(ALLOCATION_TOPIC, event_type, payload) {
            warn!(event_type, error = %format!("{err:#}"), "audit append failed");
        }
    }
}

/// UUIDv5 over previous hash, sequence number and canonical payload.
/// Same chain position + same payload always yields the same id.
pub fn derive_event_id(prev_hash: Option<&str>, payload: &Value, seq: u64) -> Result<Uuid> {
    let material = format!(
        "{}|{}|{}",
        prev_hash.unwrap_or("GENESIS"),
        seq,
        canonical_json(payload)?
    );
    Ok(Uuid::new_v5(&EVENT_ID_NAMESPACE, material.as_bytes()))
}

/// SHA-256 of the event's canonical JSON with `hash_self` cleared.
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let unsigned = AuditEvent {
        hash_self: None,
        ..ev.clone()
    };
    let digest = Sha256::digest(canonical_json(&unsigned)?.as_bytes());
    Ok(hex::encode(digest))
}

/// Verifies the chain of an audit log file.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Same as [`verify_hash_chain`] over in-memory JSONL content.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    Ok(match walk_chain(content)? {
        (cursor, None) => VerifyResult::Valid {
            lines: cursor.lines,
        },
        (_, Some((line, reason))) => VerifyResult::Broken { line, reason },
    })
}

// ─── Chain walking ───────────────────────────────────────────────────────────

/// Position reached along a chain: next `seq`, last `hash_self`, events seen.
#[derive(Debug, Default)]
struct ChainCursor {
    seq: u64,
    last_hash: Option<String>,
    lines: usize,
}

impl ChainCursor {
    /// Reason `ev` cannot follow the current position, if any.
    fn check(&self, ev: &AuditEvent) -> Result<Option<String>> {
        if ev.hash_prev != self.last_hash {
            return Ok(Some(format!(
                "hash_prev mismatch: expected {:?}, got {:?}",
                self.last_hash, ev.hash_prev
            )));
        }
        if let Some(claimed) = &ev.hash_self {
            let recomputed = compute_event_hash(ev)?;
            if *claimed != recomputed {
                return Ok(Some(format!(
                    "hash_self mismatch: claimed {claimed}, recomputed {recomputed}"
                )));
            }
        }
        if ev.seq != self.seq {
            return Ok(Some(format!(
                "seq gap: expected {}, got {}",
                self.seq, ev.seq
            )));
        }
        Ok(None)
    }

    fn accept(&mut self, ev: &AuditEvent) {
        self.seq = ev.seq + 1;
        self.last_hash = ev.hash_self.clone();
        self.lines += 1;
    }
}

/// Folds every non-blank line into a cursor. Stops at the first broken link
/// and reports its 1-based line number.
fn walk_chain(content: &str) -> Result<(ChainCursor, Option<(usize, String)>)> {
    let mut cursor = ChainCursor::default();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit event at line {}", i + 1))?;
        if let Some(reason) = cursor.check(&ev)? {
            return Ok((cursor, Some((i + 1, reason))));
        }
        cursor.accept(&ev);
    }
    Ok((cursor, None))
}

// ─── Encoding ────────────────────────────────────────────────────────────────

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    f.write_all(line.as_bytes())
        .and_then(|_| f.write_all(b"\n"))
        .with_context(|| format!("write audit line {:?}", path))
}

// Going through `Value` sorts every object's keys (serde_json's default map
// is key-ordered), so equal events always encode to equal bytes.
fn canonical_json<T: Serialize>(v: &T) -> Result<String> {
    let value = serde_json::to_value(v).context("serialize audit event failed")?;
    serde_json::to_string(&value).context("json stringify failed")
}
