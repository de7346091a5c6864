//! Core kernel types

use cloister_artifact::ArtifactKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Participant role; each role has a static capability set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Gathers the shared input documents
    Collector,
    /// Writes tests without seeing the implementation
    IsolatedProducerA,
    /// Writes the implementation without seeing the tests
    IsolatedProducerB,
    /// Full-read reviewer of the merged bundle
    Reviewer,
    /// Operator allowed to retry failed phases
    Supervisor,
}

impl Role {
    /// Every role
    pub const ALL: [Role; 5] = [
        Role::Collector,
        Role::IsolatedProducerA,
        Role::IsolatedProducerB,
        Role::Reviewer,
        Role::Supervisor,
    ];

    /// Roles that take part in parallel development
    pub const PRODUCERS: [Role; 2] = [Role::IsolatedProducerA, Role::IsolatedProducerB];

    /// Stable name used in configuration, paths and commands
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Collector => "collector",
            Role::IsolatedProducerA => "isolated_producer_a",
            Role::IsolatedProducerB => "isolated_producer_b",
            Role::Reviewer => "reviewer",
            Role::Supervisor => "supervisor",
        }
    }

    /// Artifact kind this role is expected to produce
    #[must_use]
    pub const fn produces(self) -> Option<ArtifactKind> {
        match self {
            Role::Collector => Some(ArtifactKind::DocumentPackage),
            Role::IsolatedProducerA => Some(ArtifactKind::TestSuite),
            Role::IsolatedProducerB => Some(ArtifactKind::Implementation),
            Role::Reviewer => Some(ArtifactKind::ReviewReport),
            Role::Supervisor => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Role name that does not parse
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

/// File operation checked by the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Read a file
    Read,
    /// Create or overwrite a file
    Write,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Read => "read",
            Action::Write => "write",
        })
    }
}

/// Monotonic run counter; every remediation or retry opens a new one
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// Generation opened by `init-phase`
    pub const FIRST: Generation = Generation(1);

    /// The following generation
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workspace lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    /// Accepting guarded reads and writes
    Active,
    /// Outputs frozen into artifacts
    Sealed,
    /// Outputs integrated into canonical output
    Merged,
    /// Storage released
    Discarded,
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkspaceStatus::Active => "active",
            WorkspaceStatus::Sealed => "sealed",
            WorkspaceStatus::Merged => "merged",
            WorkspaceStatus::Discarded => "discarded",
        })
    }
}

/// Phase of the orchestration state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    /// Nothing started
    Idle,
    /// Collector builds the document package
    Collection,
    /// Isolated producers work concurrently
    ParallelDevelopment,
    /// Reviewer inspects the merged bundle
    Review,
    /// Verdict is applied
    Merge,
    /// Canonical output written
    Done,
    /// A participant failed; only a supervisor retry leaves this state
    Failed,
}

impl PhaseState {
    /// Done or Failed
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, PhaseState::Done | PhaseState::Failed)
    }

    /// Static description of this phase
    #[must_use]
    pub fn definition(self) -> PhaseDefinition {
        let (predecessor, participants): (Option<PhaseState>, &'static [Role]) = match self {
            PhaseState::Idle => (None, &[]),
            PhaseState::Collection => (Some(PhaseState::Idle), &[Role::Collector]),
            PhaseState::ParallelDevelopment => (
                Some(PhaseState::Collection),
                &[Role::IsolatedProducerA, Role::IsolatedProducerB],
            ),
            PhaseState::Review => (Some(PhaseState::ParallelDevelopment), &[Role::Reviewer]),
            PhaseState::Merge => (Some(PhaseState::Review), &[]),
            PhaseState::Done => (Some(PhaseState::Merge), &[]),
            PhaseState::Failed => (None, &[]),
        };
        PhaseDefinition {
            name: self,
            predecessor,
            participants,
        }
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhaseState::Idle => "idle",
            PhaseState::Collection => "collection",
            PhaseState::ParallelDevelopment => "parallel_development",
            PhaseState::Review => "review",
            PhaseState::Merge => "merge",
            PhaseState::Done => "done",
            PhaseState::Failed => "failed",
        })
    }
}

/// Name, predecessor and participant roles of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDefinition {
    /// Phase
    pub name: PhaseState,
    /// Phase that must complete first within a generation
    pub predecessor: Option<PhaseState>,
    /// Roles allowed to hold workspaces in this phase
    pub participants: &'static [Role],
}

impl PhaseDefinition {
    /// Whether `role` may participate
    #[must_use]
    pub fn admits(&self, role: Role) -> bool {
        self.participants.contains(&role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn producers_make_disjoint_kinds() {
        assert_eq!(Role::IsolatedProducerA.produces(), Some(ArtifactKind::TestSuite));
        assert_eq!(Role::IsolatedProducerB.produces(), Some(ArtifactKind::Implementation));
        assert_eq!(Role::Supervisor.produces(), None);
    }

    #[test]
    fn phase_definitions_form_a_chain() {
        let mut phase = PhaseState::Done;
        let mut seen = vec![phase];
        while let Some(prev) = phase.definition().predecessor {
            seen.push(prev);
            phase = prev;
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(phase, PhaseState::Idle);
        assert!(PhaseState::ParallelDevelopment.definition().admits(Role::IsolatedProducerB));
        assert!(!PhaseState::ParallelDevelopment.definition().admits(Role::Reviewer));
    }

    #[test]
    fn generations_increase() {
        assert_eq!(Generation::FIRST.next(), Generation(2));
        assert!(Generation(3) > Generation(2));
    }
}
