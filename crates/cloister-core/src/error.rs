//! Error types for Cloister Core
//!
//! [`OrchestratorError`] aggregates the kernel and merge taxonomies and maps
//! every failure onto a process exit code. [`TaskError`] is what ends a
//! single worker task; it never escapes as an orchestrator error, because a
//! failing participant must not abort its siblings.

use crate::store::StoreError;
use cloister_artifact::WorkspaceId;
use cloister_kernel::{
    AuditError, CapabilityError, ConfigError, IncompleteArtifactError, SchedulerError,
    StorageError, WorkspaceError,
};
use cloister_merge::MergeError;
use serde::{Deserialize, Serialize};

/// Process exit codes of the command surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    /// Command succeeded
    Success,
    /// Capability or isolation violation
    IsolationViolation,
    /// Phase predicate not satisfied
    PredicateNotSatisfied,
    /// Merge conflict
    MergeConflict,
    /// Internal or storage failure
    Internal,
}

impl ExitCode {
    /// Numeric code
    #[inline]
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::IsolationViolation => 1,
            ExitCode::PredicateNotSatisfied => 2,
            ExitCode::MergeConflict => 3,
            ExitCode::Internal => 4,
        }
    }
}

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Guard denied a command-level request
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Workspace operation failed
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// Phase sequencing rejected the command
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Merge or canonical output failed
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// Unknown workspace id
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(WorkspaceId),

    /// Phase requires state that is missing
    #[error("phase precondition failed: {0}")]
    Precondition(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem failure outside a workspace
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Persisted state log failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Audit chain broken
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// Spawned participant panicked or was cancelled
    #[error("participant task aborted: {0}")]
    Join(String),
}

impl OrchestratorError {
    /// Exit code for this failure
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Capability(_) => ExitCode::IsolationViolation,
            Self::Workspace(e) => match e {
                WorkspaceError::Capability(_) | WorkspaceError::Path(_) => {
                    ExitCode::IsolationViolation
                }
                WorkspaceError::Storage(_) => ExitCode::Internal,
                WorkspaceError::Incomplete(_)
                | WorkspaceError::Transition(_)
                | WorkspaceError::Payload { .. } => ExitCode::PredicateNotSatisfied,
            },
            Self::Scheduler(e) => match e {
                SchedulerError::NotParticipant { .. } | SchedulerError::SupervisorOnly(_) => {
                    ExitCode::IsolationViolation
                }
                SchedulerError::ConflictPending(_) => ExitCode::MergeConflict,
                _ => ExitCode::PredicateNotSatisfied,
            },
            Self::Merge(e) => match e {
                MergeError::Conflict(_) => ExitCode::MergeConflict,
                MergeError::Empty => ExitCode::PredicateNotSatisfied,
                MergeError::MixedGeneration { .. }
                | MergeError::DocumentPackage { .. }
                | MergeError::Storage(_) => ExitCode::Internal,
            },
            Self::Precondition(_) => ExitCode::PredicateNotSatisfied,
            Self::WorkspaceNotFound(_)
            | Self::Config(_)
            | Self::Storage(_)
            | Self::Store(_)
            | Self::Audit(_)
            | Self::Join(_) => ExitCode::Internal,
        }
    }

    /// Check if error is a capability or isolation violation
    #[inline]
    #[must_use]
    pub fn is_isolation_violation(&self) -> bool {
        self.exit_code() == ExitCode::IsolationViolation
    }

    /// Check if error may clear once other participants or a supervisor act
    ///
    /// Isolation violations are never retryable.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.exit_code(),
            ExitCode::PredicateNotSatisfied | ExitCode::MergeConflict
        )
    }

    /// Short machine-readable kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Capability(_) | Self::Workspace(WorkspaceError::Capability(_)) => "capability",
            Self::Workspace(WorkspaceError::Incomplete(_)) => "incomplete_artifact",
            Self::Workspace(_) => "workspace",
            Self::Scheduler(_) => "phase",
            Self::Merge(MergeError::Conflict(_)) => "conflict",
            Self::Merge(_) => "merge",
            Self::WorkspaceNotFound(_) => "not_found",
            Self::Precondition(_) => "precondition",
            Self::Config(_) => "config",
            Self::Storage(_) | Self::Store(_) => "storage",
            Self::Audit(_) => "audit",
            Self::Join(_) => "internal",
        }
    }

    /// Capability error behind this failure, if any
    #[must_use]
    pub fn capability(&self) -> Option<&CapabilityError> {
        match self {
            Self::Capability(e) | Self::Workspace(WorkspaceError::Capability(e)) => Some(e),
            _ => None,
        }
    }
}

/// Why a worker task ended in `Failed`
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Guard denied a read or write; never auto-retried
    #[error("access denied: {0}")]
    AccessDenied(#[from] CapabilityError),

    /// Task exceeded its deadline
    #[error("task exceeded deadline of {deadline_ms}ms")]
    Timeout {
        /// Deadline in milliseconds
        deadline_ms: u64,
    },

    /// Declared outputs missing at seal time
    #[error(transparent)]
    Incomplete(#[from] IncompleteArtifactError),

    /// Worker reported failure
    #[error("worker failed: {0}")]
    Worker(String),

    /// Workspace rejected the outputs for another reason
    #[error(transparent)]
    Workspace(WorkspaceError),
}

impl From<WorkspaceError> for TaskError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::Capability(e) => Self::AccessDenied(e),
            WorkspaceError::Incomplete(e) => Self::Incomplete(e),
            other => Self::Workspace(other),
        }
    }
}

impl TaskError {
    /// Check if error is retryable; access denials never are
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Worker(_))
    }

    /// Check if error is an isolation violation
    #[inline]
    #[must_use]
    pub fn is_isolation_violation(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }
}
