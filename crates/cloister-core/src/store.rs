//! Persisted state log
//!
//! Phase, workspace, task and artifact records are appended as JSON lines,
//! each tagged with a sequence number and the generation it belongs to.
//! [`StateStore::replay`] folds the log back into a [`StateSummary`].

use crate::task::{Task, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use cloister_artifact::{ArtifactId, ArtifactRef, WorkspaceId};
use cloister_kernel::{Advance, Generation, PhaseState, WorkspaceRecord, WorkspaceStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// File name of the log inside the state directory
pub const STATE_FILE: &str = "state.jsonl";

/// State log failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// File could not be opened, read or written
    #[error("state log I/O error at {path}: {source}")]
    Io {
        /// Log path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Record could not be encoded or decoded
    #[error("state log line {line} is malformed: {source}")]
    Json {
        /// 1-based line, 0 when encoding
        line: usize,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateRecord {
    /// Phase transition
    Phase {
        /// Phase before
        from: PhaseState,
        /// Phase after
        to: PhaseState,
        /// Why
        reason: String,
    },
    /// Workspace status change
    Workspace(WorkspaceRecord),
    /// Task status change
    Task(Task),
    /// Sealed artifact
    Artifact(ArtifactRef),
}

impl From<&Advance> for StateRecord {
    fn from(advance: &Advance) -> Self {
        StateRecord::Phase {
            from: advance.from,
            to: advance.to,
            reason: advance.reason.clone(),
        }
    }
}

/// One line of the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Monotonic sequence
    pub seq: u64,
    /// Generation the record belongs to
    pub generation: Generation,
    /// Write time
    pub timestamp: DateTime<Utc>,
    /// Payload
    pub record: StateRecord,
}

/// Latest known state rebuilt from the log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSummary {
    /// Records read
    pub records: u64,
    /// Highest generation seen
    pub generation: Generation,
    /// Every generation seen
    pub generations: BTreeSet<Generation>,
    /// Latest phase
    pub phase: Option<PhaseState>,
    /// Latest status per workspace
    pub workspaces: BTreeMap<WorkspaceId, WorkspaceStatus>,
    /// Latest status per task
    pub tasks: BTreeMap<TaskId, TaskStatus>,
    /// Sealed artifacts
    pub artifacts: BTreeSet<ArtifactId>,
}

impl StateSummary {
    fn apply(&mut self, stored: StoredRecord) {
        self.records += 1;
        self.generation = self.generation.max(stored.generation);
        self.generations.insert(stored.generation);
        match stored.record {
            StateRecord::Phase { to, .. } => self.phase = Some(to),
            StateRecord::Workspace(ws) => {
                self.workspaces.insert(ws.id, ws.status);
            }
            StateRecord::Task(task) => {
                self.tasks.insert(task.id, task.status);
            }
            StateRecord::Artifact(artifact) => {
                self.artifacts.insert(artifact.id);
            }
        }
    }
}

#[derive(Debug)]
struct Inner {
    file: File,
    next_seq: u64,
}

/// Append-only JSON-lines log
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl StateStore {
    /// Open (or create) `dir/state.jsonl`, continuing its sequence
    ///
    /// # Errors
    /// Returns [`StoreError`] when the directory or file cannot be opened or
    /// an existing log is malformed.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(STATE_FILE);
        let next_seq = if path.exists() {
            Self::read(&path)?.last().map_or(0, |r| r.seq + 1)
        } else {
            0
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            inner: Mutex::new(Inner { file, next_seq }),
        })
    }

    /// Log file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record; returns its sequence number
    ///
    /// # Errors
    /// Returns [`StoreError`] on encode or write failure.
    pub fn append(&self, generation: Generation, record: StateRecord) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let stored = StoredRecord {
            seq: inner.next_seq,
            generation,
            timestamp: Utc::now(),
            record,
        };
        let mut line =
            serde_json::to_vec(&stored).map_err(|source| StoreError::Json { line: 0, source })?;
        line.push(b'\n');
        let file = &mut inner.file;
        file.write_all(&line)
            .and_then(|()| file.flush())
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        inner.next_seq += 1;
        Ok(stored.seq)
    }

    /// Every record in order
    ///
    /// # Errors
    /// Returns [`StoreError`] on I/O failure or a malformed line.
    pub fn records(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let _guard = self.inner.lock();
        Self::read(&self.path)
    }

    /// Fold the log into a summary
    ///
    /// # Errors
    /// Returns [`StoreError`] on I/O failure or a malformed line.
    pub fn replay(&self) -> Result<StateSummary, StoreError> {
        let mut summary = StateSummary::default();
        for stored in self.records()? {
            summary.apply(stored);
        }
        Ok(summary)
    }

    fn read(path: &Path) -> Result<Vec<StoredRecord>, StoreError> {
        let file = File::open(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut out = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let stored = serde_json::from_str(&line)
                .map_err(|source| StoreError::Json { line: i + 1, source })?;
            out.push(stored);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloister_kernel::Role;
    use tempfile::TempDir;

    fn phase(from: PhaseState, to: PhaseState) -> StateRecord {
        StateRecord::Phase {
            from,
            to,
            reason: "test".into(),
        }
    }

    #[test]
    fn replay_keeps_latest_state() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store
            .append(Generation::FIRST, phase(PhaseState::Idle, PhaseState::Collection))
            .unwrap();
        let mut task = Task::new(
            WorkspaceId::new(),
            Role::Collector,
            Generation::FIRST,
            Vec::new(),
            Vec::new(),
        );
        store.append(Generation::FIRST, StateRecord::Task(task.clone())).unwrap();
        task.complete(Vec::new());
        store.append(Generation::FIRST, StateRecord::Task(task.clone())).unwrap();
        store
            .append(Generation(2), phase(PhaseState::Merge, PhaseState::ParallelDevelopment))
            .unwrap();

        let summary = store.replay().unwrap();
        assert_eq!(summary.records, 4);
        assert_eq!(summary.generation, Generation(2));
        assert_eq!(summary.phase, Some(PhaseState::ParallelDevelopment));
        assert_eq!(summary.tasks[&task.id], TaskStatus::Done);
        assert_eq!(summary.generations.len(), 2);
    }

    #[test]
    fn reopen_continues_sequence() {
        let dir = TempDir::new().unwrap();
        {
            let store = StateStore::open(dir.path()).unwrap();
            assert_eq!(
                store
                    .append(Generation::FIRST, phase(PhaseState::Idle, PhaseState::Collection))
                    .unwrap(),
                0
            );
        }
        let store = StateStore::open(dir.path()).unwrap();
        let seq = store
            .append(Generation::FIRST, phase(PhaseState::Collection, PhaseState::Failed))
            .unwrap();
        assert_eq!(seq, 1);
        let seqs: Vec<u64> = store.records().unwrap().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn malformed_line_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), "{not json}\n").unwrap();
        let err = StateStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Json { line: 1, .. }));
    }
}
