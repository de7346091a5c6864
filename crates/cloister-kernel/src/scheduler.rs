//! Phase scheduler
//!
//! Sequences `Idle → Collection → ParallelDevelopment → Review → Merge → Done`
//! and gates each advance on the current phase's exit predicate. The
//! scheduler performs no I/O: callers report workspace outcomes
//! (`record_*`) and ask it to [`advance`](PhaseScheduler::advance), which is
//! a no-op while the predicate is pending.
//!
//! Parallel development is a barrier: it completes only when every
//! participant is terminal, and fails as a whole if any participant failed.

use crate::audit::AuditLog;
use crate::error::SchedulerError;
use crate::state_machine::{generation_restarts, validate_phase_transition};
use crate::types::{Generation, PhaseState, Role};
use cloister_artifact::{ArtifactKind, ArtifactRef, LogicalPath, Verdict, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Participation outcome of one workspace in the current phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Still running
    Active,
    /// Outputs sealed
    Sealed,
    /// Task failed (denied access, timeout, incomplete outputs)
    Failed,
    /// Workspace discarded before sealing
    Discarded,
}

impl ParticipantStatus {
    /// Anything but `Active`
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, ParticipantStatus::Active)
    }
}

/// Workspace registered in the current phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Workspace
    pub workspace_id: WorkspaceId,
    /// Owning role
    pub role: Role,
    /// Outcome so far
    pub status: ParticipantStatus,
    /// Sealed outputs
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Exit predicate evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ExitPredicate {
    /// Phase may advance
    Satisfied,
    /// Not yet; `advance` is a no-op
    Pending(String),
    /// Phase cannot complete; `advance` moves to `Failed`
    Violated(String),
}

impl ExitPredicate {
    /// Whether the phase may advance
    #[inline]
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        matches!(self, ExitPredicate::Satisfied)
    }
}

/// Result of an advance or retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advance {
    /// Phase before
    pub from: PhaseState,
    /// Phase after
    pub to: PhaseState,
    /// Generation after
    pub generation: Generation,
    /// False when the call was a no-op
    pub changed: bool,
    /// Predicate or transition explanation
    pub reason: String,
}

/// Scheduler limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum participants in parallel development
    pub min_parallel_participants: usize,
    /// Roles that must each be represented in parallel development
    pub required_producers: Vec<Role>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_parallel_participants: 2,
            required_producers: Role::PRODUCERS.to_vec(),
        }
    }
}

/// Serializable view of scheduler state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    /// Current phase
    pub phase: PhaseState,
    /// Current generation
    pub generation: Generation,
    /// Current exit predicate
    pub exit_predicate: ExitPredicate,
    /// Workspaces registered in the current phase
    pub participants: Vec<Participant>,
    /// Package preserved across generations
    pub document_package: Option<ArtifactRef>,
    /// Reviewer verdict of this generation
    pub verdict: Option<Verdict>,
    /// Paths of an unresolved merge conflict
    pub pending_conflict: Option<Vec<LogicalPath>>,
    /// Phase that failed and why
    pub failure: Option<(PhaseState, String)>,
}

/// Phase state machine with barrier semantics
#[derive(Debug)]
pub struct PhaseScheduler {
    config: SchedulerConfig,
    state: PhaseState,
    generation: Generation,
    participants: BTreeMap<WorkspaceId, Participant>,
    document_package: Option<ArtifactRef>,
    verdict: Option<Verdict>,
    pending_conflict: Option<Vec<LogicalPath>>,
    integrated: bool,
    failure: Option<(PhaseState, String)>,
    audit: Arc<AuditLog>,
}

impl PhaseScheduler {
    /// Create new scheduler in `Idle`
    #[must_use]
    pub fn new(config: SchedulerConfig, audit: Arc<AuditLog>) -> Self {
        Self {
            config,
            state: PhaseState::Idle,
            generation: Generation::default(),
            participants: BTreeMap::new(),
            document_package: None,
            verdict: None,
            pending_conflict: None,
            integrated: false,
            failure: None,
            audit,
        }
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn state(&self) -> PhaseState {
        self.state
    }

    /// Current generation; zero before `init`
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Sealed document package, once collection completed
    #[inline]
    #[must_use]
    pub fn document_package(&self) -> Option<&ArtifactRef> {
        self.document_package.as_ref()
    }

    /// Reviewer verdict of this generation
    #[inline]
    #[must_use]
    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    /// Paths of an unresolved merge conflict
    #[must_use]
    pub fn pending_conflict(&self) -> Option<&[LogicalPath]> {
        self.pending_conflict.as_deref()
    }

    /// Participants of the current phase
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Look up a participant
    #[must_use]
    pub fn participant(&self, workspace_id: WorkspaceId) -> Option<&Participant> {
        self.participants.get(&workspace_id)
    }

    /// Serializable view
    #[must_use]
    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            phase: self.state,
            generation: self.generation,
            exit_predicate: self.exit_predicate(),
            participants: self.participants.values().cloned().collect(),
            document_package: self.document_package.clone(),
            verdict: self.verdict,
            pending_conflict: self.pending_conflict.clone(),
            failure: self.failure.clone(),
        }
    }

    /// `Idle` → `Collection`, opening generation 1
    ///
    /// # Errors
    /// Returns [`SchedulerError::AlreadyInitialised`] outside `Idle`.
    pub fn init(&mut self) -> Result<Advance, SchedulerError> {
        if self.state != PhaseState::Idle {
            return Err(SchedulerError::AlreadyInitialised(self.state));
        }
        self.generation = Generation::FIRST;
        self.transition(PhaseState::Collection, "initialised")
    }

    /// Register a workspace for `role` in the current phase
    ///
    /// # Errors
    /// Returns [`SchedulerError::NotParticipant`] when the phase does not
    /// admit `role`, [`SchedulerError::PhaseFull`] when a single-participant
    /// phase already has one, or [`SchedulerError::ConflictPending`] while a
    /// merge conflict is unresolved.
    pub fn admit(&mut self, role: Role, workspace_id: WorkspaceId) -> Result<(), SchedulerError> {
        self.check_admission(role)?;
        self.participants.insert(
            workspace_id,
            Participant {
                workspace_id,
                role,
                status: ParticipantStatus::Active,
                artifacts: Vec::new(),
                failure: None,
            },
        );
        Ok(())
    }

    /// Validate that `role` could be admitted now, without registering
    ///
    /// # Errors
    /// Same as [`admit`](Self::admit).
    pub fn check_admission(&self, role: Role) -> Result<(), SchedulerError> {
        if let Some(paths) = &self.pending_conflict {
            return Err(SchedulerError::ConflictPending(paths.clone()));
        }
        if !self.state.definition().admits(role) {
            return Err(SchedulerError::NotParticipant {
                role,
                phase: self.state,
            });
        }
        let single = matches!(self.state, PhaseState::Collection | PhaseState::Review);
        if single && !self.participants.is_empty() {
            return Err(SchedulerError::PhaseFull {
                role,
                phase: self.state,
            });
        }
        Ok(())
    }

    /// Participant sealed its workspace
    ///
    /// # Errors
    /// Returns [`SchedulerError::UnknownWorkspace`] for unregistered ids.
    pub fn record_sealed(
        &mut self,
        workspace_id: WorkspaceId,
        artifacts: Vec<ArtifactRef>,
    ) -> Result<(), SchedulerError> {
        let participant = self.participant_mut(workspace_id)?;
        participant.status = ParticipantStatus::Sealed;
        participant.artifacts = artifacts;
        Ok(())
    }

    /// Participant's task failed
    ///
    /// # Errors
    /// Returns [`SchedulerError::UnknownWorkspace`] for unregistered ids.
    pub fn record_failed(
        &mut self,
        workspace_id: WorkspaceId,
        reason: impl Into<String>,
    ) -> Result<(), SchedulerError> {
        let participant = self.participant_mut(workspace_id)?;
        participant.status = ParticipantStatus::Failed;
        participant.failure = Some(reason.into());
        Ok(())
    }

    /// Participant's workspace was discarded; the phase can no longer succeed
    ///
    /// # Errors
    /// Returns [`SchedulerError::UnknownWorkspace`] for unregistered ids.
    pub fn record_discarded(&mut self, workspace_id: WorkspaceId) -> Result<(), SchedulerError> {
        let participant = self.participant_mut(workspace_id)?;
        if participant.status != ParticipantStatus::Failed {
            participant.status = ParticipantStatus::Discarded;
        }
        Ok(())
    }

    /// Reviewer verdict
    ///
    /// # Errors
    /// Returns [`SchedulerError::WrongPhase`] outside `Review`.
    pub fn record_verdict(&mut self, verdict: Verdict) -> Result<(), SchedulerError> {
        self.expect_phase(PhaseState::Review)?;
        self.verdict = Some(verdict);
        Ok(())
    }

    /// Merge found overlapping outputs; blocks the phase
    ///
    /// # Errors
    /// Returns [`SchedulerError::WrongPhase`] outside `ParallelDevelopment`.
    pub fn record_conflict(&mut self, paths: Vec<LogicalPath>) -> Result<(), SchedulerError> {
        self.expect_phase(PhaseState::ParallelDevelopment)?;
        warn!(generation = %self.generation, ?paths, "merge conflict recorded");
        self.pending_conflict = Some(paths);
        Ok(())
    }

    /// Canonical output written for an approved bundle
    ///
    /// # Errors
    /// Returns [`SchedulerError::WrongPhase`] outside `Merge`.
    pub fn record_integrated(&mut self) -> Result<(), SchedulerError> {
        self.expect_phase(PhaseState::Merge)?;
        self.integrated = true;
        Ok(())
    }

    /// Evaluate the current phase's exit predicate
    #[must_use]
    pub fn exit_predicate(&self) -> ExitPredicate {
        match self.state {
            PhaseState::Idle => ExitPredicate::Pending("not initialised".into()),
            PhaseState::Collection => self.barrier().unwrap_or_else(|| {
                let packages = self.sealed_of(ArtifactKind::DocumentPackage).count();
                if packages == 1 {
                    ExitPredicate::Satisfied
                } else {
                    ExitPredicate::Violated(format!(
                        "expected exactly one sealed document package, found {packages}"
                    ))
                }
            }),
            PhaseState::ParallelDevelopment => {
                if let Some(paths) = &self.pending_conflict {
                    let paths: Vec<String> = paths.iter().map(LogicalPath::as_string).collect();
                    return ExitPredicate::Pending(format!(
                        "unresolved merge conflict on {}",
                        paths.join(", ")
                    ));
                }
                self.barrier().unwrap_or(ExitPredicate::Satisfied)
            }
            PhaseState::Review => self.barrier().unwrap_or_else(|| {
                let reports = self.sealed_of(ArtifactKind::ReviewReport).count();
                if reports != 1 {
                    ExitPredicate::Violated(format!(
                        "expected exactly one review report, found {reports}"
                    ))
                } else if self.verdict.is_none() {
                    ExitPredicate::Pending("review verdict not recorded".into())
                } else {
                    ExitPredicate::Satisfied
                }
            }),
            PhaseState::Merge => match self.verdict {
                Some(Verdict::Approve) if !self.integrated => {
                    ExitPredicate::Pending("approved bundle not yet integrated".into())
                }
                Some(_) => ExitPredicate::Satisfied,
                None => ExitPredicate::Violated("no review verdict".into()),
            },
            PhaseState::Done | PhaseState::Failed => {
                ExitPredicate::Pending(format!("{} is terminal", self.state))
            }
        }
    }

    /// Advance if the exit predicate holds; idempotent otherwise
    ///
    /// # Errors
    /// Returns [`SchedulerError::Transition`] only on an internal table
    /// mismatch.
    pub fn advance(&mut self) -> Result<Advance, SchedulerError> {
        match self.exit_predicate() {
            ExitPredicate::Pending(reason) => Ok(self.unchanged(reason)),
            ExitPredicate::Violated(reason) => {
                warn!(phase = %self.state, generation = %self.generation, %reason, "phase failed");
                self.failure = Some((self.state, reason.clone()));
                self.transition(PhaseState::Failed, reason)
            }
            ExitPredicate::Satisfied => match self.state {
                PhaseState::Collection => {
                    let document_package = self.sealed_of(ArtifactKind::DocumentPackage).next().cloned();
                    self.document_package = document_package;
                    self.participants.clear();
                    self.transition(PhaseState::ParallelDevelopment, "document package sealed")
                }
                PhaseState::ParallelDevelopment => {
                    self.participants.clear();
                    self.transition(PhaseState::Review, "all participants sealed")
                }
                PhaseState::Review => {
                    self.participants.clear();
                    self.transition(PhaseState::Merge, "review verdict recorded")
                }
                PhaseState::Merge if self.verdict == Some(Verdict::Approve) => {
                    self.transition(PhaseState::Done, "canonical output integrated")
                }
                PhaseState::Merge => self.restart(PhaseState::ParallelDevelopment, "changes requested"),
                other => Ok(self.unchanged(format!("{other} has no successor"))),
            },
        }
    }

    /// Supervisor retry of a failed or conflict-blocked phase
    ///
    /// Opens a new generation. Collection failures restart collection; later
    /// failures and conflicts restart parallel development against the
    /// preserved document package.
    ///
    /// # Errors
    /// Returns [`SchedulerError::SupervisorOnly`] for other roles and
    /// [`SchedulerError::NothingToRetry`] when nothing failed or is blocked.
    pub fn retry(&mut self, role: Role) -> Result<Advance, SchedulerError> {
        if role != Role::Supervisor {
            return Err(SchedulerError::SupervisorOnly(role));
        }
        match self.state {
            PhaseState::Failed => {
                let target = match (&self.failure, &self.document_package) {
                    (Some((PhaseState::Collection | PhaseState::Idle, _)), _) | (_, None) => {
                        PhaseState::Collection
                    }
                    _ => PhaseState::ParallelDevelopment,
                };
                self.restart(target, "supervisor retry")
            }
            PhaseState::ParallelDevelopment if self.pending_conflict.is_some() => {
                self.restart(PhaseState::ParallelDevelopment, "supervisor retry after conflict")
            }
            other => Err(SchedulerError::NothingToRetry(other)),
        }
    }

    fn barrier(&self) -> Option<ExitPredicate> {
        if self.participants.is_empty() {
            return Some(ExitPredicate::Pending("no participants yet".into()));
        }
        // failures only resolve the phase once every sibling is terminal
        let active = self
            .participants
            .values()
            .filter(|p| !p.status.is_terminal())
            .count();
        if active > 0 {
            return Some(ExitPredicate::Pending(format!(
                "waiting for {active} of {} participants",
                self.participants.len()
            )));
        }
        if let Some(failed) = self
            .participants
            .values()
            .find(|p| matches!(p.status, ParticipantStatus::Failed | ParticipantStatus::Discarded))
        {
            let reason = failed.failure.clone().unwrap_or_else(|| "workspace discarded".into());
            return Some(ExitPredicate::Violated(format!(
                "{} workspace {} failed: {reason}",
                failed.role, failed.workspace_id
            )));
        }
        if self.state == PhaseState::ParallelDevelopment {
            let count = self.participants.len();
            if count < self.config.min_parallel_participants {
                return Some(ExitPredicate::Pending(format!(
                    "{count} of at least {} participants registered",
                    self.config.min_parallel_participants
                )));
            }
            let present: BTreeSet<Role> = self.participants.values().map(|p| p.role).collect();
            if let Some(missing) = self
                .config
                .required_producers
                .iter()
                .find(|r| !present.contains(r))
            {
                return Some(ExitPredicate::Pending(format!("no {missing} participant yet")));
            }
        }
        None
    }

    fn sealed_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &ArtifactRef> {
        self.participants
            .values()
            .filter(|p| p.status == ParticipantStatus::Sealed)
            .flat_map(|p| p.artifacts.iter())
            .filter(move |a| a.kind == kind)
    }

    fn participant_mut(&mut self, workspace_id: WorkspaceId) -> Result<&mut Participant, SchedulerError> {
        self.participants
            .get_mut(&workspace_id)
            .ok_or(SchedulerError::UnknownWorkspace(workspace_id))
    }

    fn expect_phase(&self, expected: PhaseState) -> Result<(), SchedulerError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SchedulerError::WrongPhase {
                expected,
                actual: self.state,
            })
        }
    }

    fn unchanged(&self, reason: String) -> Advance {
        Advance {
            from: self.state,
            to: self.state,
            generation: self.generation,
            changed: false,
            reason,
        }
    }

    fn transition(&mut self, to: PhaseState, reason: impl Into<String>) -> Result<Advance, SchedulerError> {
        let from = self.state;
        validate_phase_transition(from, to)?;
        Ok(self.commit(from, to, reason.into()))
    }

    fn restart(&mut self, to: PhaseState, reason: &str) -> Result<Advance, SchedulerError> {
        let from = self.state;
        if !generation_restarts(from).contains(&to) {
            return Err(crate::error::TransitionError::Phase { from, to }.into());
        }
        self.generation = self.generation.next();
        self.participants.clear();
        self.verdict = None;
        self.pending_conflict = None;
        self.integrated = false;
        self.failure = None;
        if to == PhaseState::Collection {
            self.document_package = None;
        }
        Ok(self.commit(from, to, reason.to_string()))
    }

    fn commit(&mut self, from: PhaseState, to: PhaseState, reason: String) -> Advance {
        self.state = to;
        self.audit
            .record_transition(self.generation, from, to, reason.clone());
        info!(%from, %to, generation = %self.generation, %reason, "phase transition");
        Advance {
            from,
            to,
            generation: self.generation,
            changed: true,
            reason,
        }
    }
}
