//! Cloister Kernel
//!
//! Isolation enforcement for multi-party development: role capability tables,
//! the access guard every workspace I/O passes through, the append-only audit
//! log, the workspace lifecycle and the phase scheduler.
//!
//! # Architecture
//!
//! ```text
//! CapabilityTable ──▶ AccessGuard ──▶ AuditLog
//!                         │
//!                     Workspace (Active → Sealed/Discarded)
//!                         │
//!                  SealedWorkspace ──▶ PhaseScheduler (barrier)
//! ```
//!
//! Isolation is structural: a workspace only ever touches its own root, every
//! path is checked against the owning role's rules (deny first, fail-closed),
//! and sealed outputs are immutable [`cloister_artifact::Artifact`]s.

#![warn(unreachable_pub)]

pub mod audit;
pub mod capability;
pub mod error;
pub mod guard;
pub mod scheduler;
pub mod state_machine;
pub mod types;
pub mod workspace;

pub use audit::{AuditEntry, AuditError, AuditEvent, AuditLog, AuditRecord, AuditScope, Decision};
pub use capability::{Access, CapabilityRule, CapabilitySet, CapabilityTable, Effect, RuleSpec};
pub use error::{
    CapabilityError, ConfigError, DenialReason, IncompleteArtifactError, SchedulerError,
    StorageError, TransitionError, WorkspaceError,
};
pub use guard::{AccessDecision, AccessGuard, Grant};
pub use scheduler::{
    Advance, ExitPredicate, Participant, ParticipantStatus, PhaseScheduler, PhaseSnapshot,
    SchedulerConfig,
};
pub use types::{Action, Generation, PhaseDefinition, PhaseState, Role, UnknownRole, WorkspaceStatus};
pub use workspace::{SealedWorkspace, Workspace, WorkspaceAllocator, WorkspaceRecord};
