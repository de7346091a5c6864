use cloister_kernel::state_machine::{
    phase_transitions, validate_phase_transition, validate_workspace_transition,
    workspace_transitions,
};
use cloister_kernel::{PhaseState, WorkspaceStatus};
use proptest::prelude::*;

#[test]
fn test_active_transitions() {
    assert!(validate_workspace_transition(WorkspaceStatus::Active, WorkspaceStatus::Sealed).is_ok());
    assert!(validate_workspace_transition(WorkspaceStatus::Active, WorkspaceStatus::Discarded).is_ok());

    // Invalid
    assert!(validate_workspace_transition(WorkspaceStatus::Active, WorkspaceStatus::Merged).is_err());
    assert!(validate_workspace_transition(WorkspaceStatus::Active, WorkspaceStatus::Active).is_err());
}

#[test]
fn test_terminal_workspace_states() {
    assert!(workspace_transitions(WorkspaceStatus::Merged).is_empty());
    assert!(workspace_transitions(WorkspaceStatus::Discarded).is_empty());
}

#[test]
fn test_phase_order() {
    let order = [
        PhaseState::Idle,
        PhaseState::Collection,
        PhaseState::ParallelDevelopment,
        PhaseState::Review,
        PhaseState::Merge,
        PhaseState::Done,
    ];
    for pair in order.windows(2) {
        assert!(validate_phase_transition(pair[0], pair[1]).is_ok());
    }
    assert!(validate_phase_transition(PhaseState::Done, PhaseState::Collection).is_err());
}

fn any_status() -> impl Strategy<Value = WorkspaceStatus> {
    prop_oneof![
        Just(WorkspaceStatus::Active),
        Just(WorkspaceStatus::Sealed),
        Just(WorkspaceStatus::Merged),
        Just(WorkspaceStatus::Discarded),
    ]
}

fn any_phase() -> impl Strategy<Value = PhaseState> {
    prop_oneof![
        Just(PhaseState::Idle),
        Just(PhaseState::Collection),
        Just(PhaseState::ParallelDevelopment),
        Just(PhaseState::Review),
        Just(PhaseState::Merge),
        Just(PhaseState::Done),
        Just(PhaseState::Failed),
    ]
}

proptest! {
    #[test]
    fn prop_workspace_transitions_match_table(from in any_status(), to in any_status()) {
        let res = validate_workspace_transition(from, to);
        prop_assert_eq!(res.is_ok(), workspace_transitions(from).contains(&to));
    }

    #[test]
    fn prop_phase_transitions_match_table(from in any_phase(), to in any_phase()) {
        let res = validate_phase_transition(from, to);
        prop_assert_eq!(res.is_ok(), phase_transitions(from).contains(&to));
    }

    #[test]
    fn prop_sealed_never_returns_to_active(to in any_status()) {
        if to == WorkspaceStatus::Active {
            prop_assert!(validate_workspace_transition(WorkspaceStatus::Sealed, to).is_err());
        }
    }
}
