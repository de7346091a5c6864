//! Kernel error taxonomy
//!
//! Every rejection carries enough context to name the rule that caused it.

use crate::types::{Action, PhaseState, Role, WorkspaceStatus};
use cloister_artifact::{ArtifactKind, LogicalPath, PathError, PayloadError, WorkspaceId};
use std::path::PathBuf;

/// Why the guard denied a request
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    /// A deny rule matched; deny rules take precedence over allow rules
    ExplicitDeny {
        /// Rendered rule, e.g. `isolated_producer_a#2 deny read_write implementation:implementation/**`
        rule: String,
    },
    /// No rule matched; unmatched paths are denied
    NoMatchingRule,
    /// Absolute path, `..` or `.` segment, or otherwise malformed path
    PathTraversal {
        /// Parser diagnostic
        detail: String,
    },
    /// Workspace no longer accepts the action
    WorkspaceNotActive {
        /// Current status
        status: WorkspaceStatus,
    },
    /// Snapshot artifact of a kind the role may not read
    KindNotReadable {
        /// Offending kind
        #[serde(rename = "artifact_kind")]
        kind: ArtifactKind,
    },
}

impl DenialReason {
    /// Rule text when a concrete rule caused the denial
    #[must_use]
    pub fn rule(&self) -> Option<&str> {
        match self {
            DenialReason::ExplicitDeny { rule } => Some(rule),
            _ => None,
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::ExplicitDeny { rule } => write!(f, "denied by rule {rule}"),
            DenialReason::NoMatchingRule => f.write_str("no rule matches (fail-closed)"),
            DenialReason::PathTraversal { detail } => write!(f, "path rejected: {detail}"),
            DenialReason::WorkspaceNotActive { status } => {
                write!(f, "workspace is {status}")
            }
            DenialReason::KindNotReadable { kind } => {
                write!(f, "no allow rule grants read on {kind} artifacts")
            }
        }
    }
}

/// Capability violation; fatal to the requesting task, never retried
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{role} may not {action} {path} in workspace {workspace_id}: {reason}")]
pub struct CapabilityError {
    /// Workspace the request was made from
    pub workspace_id: WorkspaceId,
    /// Requesting role
    pub role: Role,
    /// Path as requested
    pub path: String,
    /// Requested action
    pub action: Action,
    /// Why it was denied
    pub reason: DenialReason,
}

/// Declared outputs missing at seal time
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("workspace {workspace_id} never wrote declared outputs: {}", format_paths(.missing))]
pub struct IncompleteArtifactError {
    /// Workspace being sealed
    pub workspace_id: WorkspaceId,
    /// Declared but unwritten outputs
    pub missing: Vec<LogicalPath>,
}

fn format_paths(paths: &[LogicalPath]) -> String {
    paths.iter().map(LogicalPath::as_string).collect::<Vec<_>>().join(", ")
}

/// Illegal lifecycle or phase transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Workspace status change not in the lifecycle table
    #[error("illegal workspace transition {from} -> {to}")]
    Workspace {
        /// Current status
        from: WorkspaceStatus,
        /// Requested status
        to: WorkspaceStatus,
    },

    /// Phase change not in the phase table
    #[error("illegal phase transition {from} -> {to}")]
    Phase {
        /// Current phase
        from: PhaseState,
        /// Requested phase
        to: PhaseState,
    },
}

/// Capability table could not be loaded
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Pattern is not valid glob syntax
    #[error("{role} rule #{index}: invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Role owning the rule
        role: Role,
        /// Rule position, 1-based
        index: usize,
        /// Offending pattern
        pattern: String,
        /// Glob diagnostic
        message: String,
    },

    /// Table would let a producer see its sibling's output kind, or gives
    /// full read to a role other than the reviewer
    #[error("{role}: {message}")]
    IsolationInvariant {
        /// Offending role
        role: Role,
        /// What is violated
        message: String,
    },

    /// TOML parse failure
    #[error("capability table TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML parse failure
    #[error("capability table YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Role name not recognised
    #[error(transparent)]
    UnknownRole(#[from] crate::types::UnknownRole),

    /// Unknown file extension
    #[error("unsupported capability file format: {0}")]
    UnsupportedFormat(PathBuf),

    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Filesystem failure under a workspace or output root
#[derive(Debug, thiserror::Error)]
#[error("storage error at {path}: {source}")]
pub struct StorageError {
    /// Path being accessed
    pub path: PathBuf,
    /// Underlying error
    #[source]
    pub source: std::io::Error,
}

impl StorageError {
    /// Create new storage error
    pub fn new(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by workspace operations
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Guard denied the request
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Declared outputs were not written
    #[error(transparent)]
    Incomplete(#[from] IncompleteArtifactError),

    /// Lifecycle violation
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Filesystem failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Declared output path is malformed
    #[error("invalid declared output: {0}")]
    Path(#[from] PathError),

    /// Structured payload could not be decoded at seal time
    #[error("artifact {path} has an invalid payload: {source}")]
    Payload {
        /// Artifact path
        path: LogicalPath,
        /// Decode error
        #[source]
        source: PayloadError,
    },
}

impl WorkspaceError {
    /// Whether this error is an isolation violation
    #[must_use]
    pub fn is_capability_violation(&self) -> bool {
        matches!(self, WorkspaceError::Capability(_))
    }
}

/// Errors raised by the phase scheduler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// Role does not participate in the current phase
    #[error("{role} is not a participant of phase {phase}")]
    NotParticipant {
        /// Requesting role
        role: Role,
        /// Current phase
        phase: PhaseState,
    },

    /// Phase already has its single participant
    #[error("phase {phase} already has a {role} workspace")]
    PhaseFull {
        /// Requesting role
        role: Role,
        /// Current phase
        phase: PhaseState,
    },

    /// `init-phase` called twice
    #[error("scheduler already initialised (phase {0})")]
    AlreadyInitialised(PhaseState),

    /// Operation requires another phase
    #[error("operation requires phase {expected}, current phase is {actual}")]
    WrongPhase {
        /// Required phase
        expected: PhaseState,
        /// Current phase
        actual: PhaseState,
    },

    /// Workspace not registered in the current phase
    #[error("workspace {0} is not registered in the current phase")]
    UnknownWorkspace(WorkspaceId),

    /// Only the supervisor may retry
    #[error("{0} may not retry phases; only the supervisor can")]
    SupervisorOnly(Role),

    /// Nothing failed or blocked
    #[error("phase {0} has nothing to retry")]
    NothingToRetry(PhaseState),

    /// A merge conflict blocks the phase until a supervisor retry
    #[error("merge conflict pending on {}; supervisor retry required", format_paths(.0))]
    ConflictPending(Vec<LogicalPath>),

    /// Illegal phase change
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_error_names_rule() {
        let err = CapabilityError {
            workspace_id: WorkspaceId::new(),
            role: Role::IsolatedProducerA,
            path: "implementation/x".into(),
            action: Action::Read,
            reason: DenialReason::ExplicitDeny {
                rule: "isolated_producer_a#3 deny read_write implementation:implementation/**".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("isolated_producer_a may not read implementation/x"));
        assert!(msg.contains("implementation/**"));
        assert_eq!(
            err.reason.rule(),
            Some("isolated_producer_a#3 deny read_write implementation:implementation/**")
        );
    }

    #[test]
    fn incomplete_lists_paths() {
        let err = IncompleteArtifactError {
            workspace_id: WorkspaceId::new(),
            missing: vec!["tests/a.yaml".parse().unwrap(), "tests/b.yaml".parse().unwrap()],
        };
        assert!(err.to_string().ends_with("tests/a.yaml, tests/b.yaml"));
    }

    #[test]
    fn denial_reason_serializes_tagged() {
        let json = serde_json::to_value(DenialReason::NoMatchingRule).unwrap();
        assert_eq!(json["kind"], "no_matching_rule");
    }
}
