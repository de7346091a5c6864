//! Transition tables for workspaces and phases

use crate::error::TransitionError;
use crate::types::{PhaseState, WorkspaceStatus};

/// Validates a workspace status change
///
/// # Errors
/// Returns [`TransitionError::Workspace`] if the change is not in the table.
pub fn validate_workspace_transition(
    from: WorkspaceStatus,
    to: WorkspaceStatus,
) -> Result<(), TransitionError> {
    if workspace_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError::Workspace { from, to })
    }
}

/// Statuses reachable from `from`
#[must_use]
pub fn workspace_transitions(from: WorkspaceStatus) -> &'static [WorkspaceStatus] {
    use WorkspaceStatus::*;
    match from {
        Active => &[Sealed, Discarded],
        Sealed => &[Merged, Discarded],
        Merged | Discarded => &[],
    }
}

/// Validates a phase change within one generation
///
/// Rolling into a new generation (remediation, supervisor retry) is not a
/// transition in this table; the scheduler handles it separately.
///
/// # Errors
/// Returns [`TransitionError::Phase`] if the change is not in the table.
pub fn validate_phase_transition(from: PhaseState, to: PhaseState) -> Result<(), TransitionError> {
    if phase_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError::Phase { from, to })
    }
}

/// Phases reachable from `from` within one generation
#[must_use]
pub fn phase_transitions(from: PhaseState) -> &'static [PhaseState] {
    use PhaseState::*;
    match from {
        Idle => &[Collection, Failed],
        Collection => &[ParallelDevelopment, Failed],
        ParallelDevelopment => &[Review, Failed],
        Review => &[Merge, Failed],
        Merge => &[Done, Failed],
        Done | Failed => &[],
    }
}

/// Phases a new generation may open from `from`
#[must_use]
pub fn generation_restarts(from: PhaseState) -> &'static [PhaseState] {
    use PhaseState::*;
    match from {
        // RequestChanges verdict, or a conflict awaiting supervisor retry
        Merge | ParallelDevelopment => &[ParallelDevelopment],
        Failed => &[Collection, ParallelDevelopment],
        Idle | Collection | Review | Done => &[],
    }
}
