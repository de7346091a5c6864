//! Append-only audit log
//!
//! Every guard decision, workspace lifecycle change and phase transition is
//! appended here. Entries are hash-chained (sha256 over the entry and the
//! previous hash) so tampering is detectable with [`AuditLog::verify_integrity`].
//! Each scope (a workspace, or the scheduler) gets its own monotonic sequence.
//!
//! The log is write-only from the orchestrator's point of view: nothing reads
//! it to make control decisions.

use crate::types::{Action, Generation, PhaseState, Role, WorkspaceStatus};
use chrono::{DateTime, Utc};
use cloister_artifact::WorkspaceId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;

/// Guard verdict as recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Request allowed
    Allowed,
    /// Request denied
    Denied,
}

/// One access decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Workspace the request came from
    pub workspace_id: WorkspaceId,
    /// Role of that workspace
    pub role: Role,
    /// Path as requested
    pub path: String,
    /// Read or write
    pub action: Action,
    /// Outcome
    pub decision: Decision,
    /// Matching rule or denial reason
    pub detail: String,
}

/// What an entry describes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Guard decision
    Access(AuditRecord),
    /// Workspace lifecycle change
    Lifecycle {
        /// Workspace
        workspace_id: WorkspaceId,
        /// Owning role
        role: Role,
        /// Previous status, absent on creation
        from: Option<WorkspaceStatus>,
        /// New status
        to: WorkspaceStatus,
    },
    /// Scheduler phase change
    PhaseTransition {
        /// Generation after the transition
        generation: Generation,
        /// Previous phase
        from: PhaseState,
        /// New phase
        to: PhaseState,
        /// Why
        reason: String,
    },
}

impl AuditEvent {
    /// Scope the event is sequenced under
    #[must_use]
    pub fn scope(&self) -> AuditScope {
        match self {
            AuditEvent::Access(record) => AuditScope::Workspace(record.workspace_id),
            AuditEvent::Lifecycle { workspace_id, .. } => AuditScope::Workspace(*workspace_id),
            AuditEvent::PhaseTransition { .. } => AuditScope::Scheduler,
        }
    }
}

/// Sequencing scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditScope {
    /// Per-workspace sequence
    Workspace(WorkspaceId),
    /// Phase transitions
    Scheduler,
}

/// Chained log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the whole log
    pub seq: u64,
    /// Position within the entry's scope, starting at 1
    pub scope_seq: u64,
    /// Wall-clock time of the append
    pub timestamp: DateTime<Utc>,
    /// Recorded event
    pub event: AuditEvent,
    /// Hash of the previous entry
    #[serde(with = "hex_array")]
    pub prev_hash: [u8; 32],
    /// Hash of this entry
    #[serde(with = "hex_array")]
    pub hash: [u8; 32],
}

/// Tampering detected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    /// Chain or content hash mismatch
    #[error("audit log integrity violation at entry {seq}")]
    IntegrityViolation {
        /// First bad entry
        seq: u64,
    },
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<AuditEntry>,
    scope_counters: HashMap<AuditScope, u64>,
}

/// Concurrent append-only log
#[derive(Debug, Default)]
pub struct AuditLog {
    inner: Mutex<Inner>,
}

impl AuditLog {
    /// Create new empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return `(seq, scope_seq)`
    pub fn append(&self, event: AuditEvent) -> (u64, u64) {
        let mut inner = self.inner.lock();
        let scope_seq = {
            let counter = inner.scope_counters.entry(event.scope()).or_insert(0);
            *counter += 1;
            *counter
        };
        let seq = inner.entries.len() as u64 + 1;
        let prev_hash = inner.entries.last().map_or([0u8; 32], |e| e.hash);
        let mut entry = AuditEntry {
            seq,
            scope_seq,
            timestamp: Utc::now(),
            event,
            prev_hash,
            hash: [0u8; 32],
        };
        entry.hash = compute_hash(&entry);
        inner.entries.push(entry);
        (seq, scope_seq)
    }

    /// Record a guard decision
    pub fn record_access(&self, record: AuditRecord) -> u64 {
        self.append(AuditEvent::Access(record)).1
    }

    /// Record a workspace lifecycle change
    pub fn record_lifecycle(
        &self,
        workspace_id: WorkspaceId,
        role: Role,
        from: Option<WorkspaceStatus>,
        to: WorkspaceStatus,
    ) {
        self.append(AuditEvent::Lifecycle {
            workspace_id,
            role,
            from,
            to,
        });
    }

    /// Record a phase change
    pub fn record_transition(
        &self,
        generation: Generation,
        from: PhaseState,
        to: PhaseState,
        reason: impl Into<String>,
    ) {
        self.append(AuditEvent::PhaseTransition {
            generation,
            from,
            to,
            reason: reason.into(),
        });
    }

    /// Snapshot of every entry
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().entries.clone()
    }

    /// Entries of one workspace, in sequence order
    #[must_use]
    pub fn for_workspace(&self, workspace_id: WorkspaceId) -> Vec<AuditEntry> {
        self.filtered(AuditScope::Workspace(workspace_id))
    }

    /// Entries of one scope
    #[must_use]
    pub fn filtered(&self, scope: AuditScope) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.event.scope() == scope)
            .cloned()
            .collect()
    }

    /// Access decisions only
    #[must_use]
    pub fn access_records(&self) -> Vec<AuditRecord> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter_map(|e| match &e.event {
                AuditEvent::Access(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute the chain
    ///
    /// # Errors
    /// Returns the first entry whose link or content hash does not match.
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        let inner = self.inner.lock();
        let mut prev = [0u8; 32];
        for entry in &inner.entries {
            if entry.prev_hash != prev || entry.hash != compute_hash(entry) {
                return Err(AuditError::IntegrityViolation { seq: entry.seq });
            }
            prev = entry.hash;
        }
        Ok(())
    }

    /// Write every entry as one JSON object per line
    ///
    /// # Errors
    /// Returns I/O or serialization errors from the writer.
    pub fn export_jsonl<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for entry in self.entries() {
            serde_json::to_writer(&mut writer, &entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    #[cfg(test)]
    fn tamper(&self, seq: u64, f: impl FnOnce(&mut AuditEntry)) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.iter_mut().find(|e| e.seq == seq) {
            f(entry);
        }
    }
}

fn compute_hash(entry: &AuditEntry) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.seq.to_le_bytes());
    hasher.update(entry.scope_seq.to_le_bytes());
    hasher.update(entry.timestamp.to_rfc3339().as_bytes());
    hasher.update([0]);
    // serde_json output of a struct is stable for a given value
    hasher.update(serde_json::to_vec(&entry.event).unwrap_or_default());
    hasher.update([0]);
    hasher.update(entry.prev_hash);
    hasher.finalize().into()
}

mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(&s, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}
