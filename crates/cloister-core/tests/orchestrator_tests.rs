use cloister_artifact::{LogicalPath, Namespace, Verdict};
use cloister_core::{
    Command, CommandStatus, MergeOutcome, OrchestratorError, TaskStatus, STATE_FILE,
};
use cloister_kernel::{
    Access, AuditEvent, CapabilityTable, ConfigError, Decision, Generation, PhaseState, Role, RuleSpec,
    SchedulerError, WorkspaceStatus,
};
use cloister_merge::{MergeError, MANIFEST_FILE};
use cloister_test_utils::{
    collector, implementer, producers, tests_writer, ScriptedReviewer, ScriptedWorker,
    TestOrchestrator, IMPLEMENTATION_PATH, PACKAGE_PATH, REVIEW_PATH, TESTS_PATH,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn shared_rules_table() -> CapabilityTable {
    let mut specs = CapabilityTable::default().to_specs();
    specs
        .get_mut(&Role::IsolatedProducerA)
        .unwrap()
        .push(RuleSpec::allow(Namespace::Tests, "rules/**", Access::ReadWrite));
    specs
        .get_mut(&Role::IsolatedProducerB)
        .unwrap()
        .push(RuleSpec::allow(Namespace::Implementation, "rules/**", Access::ReadWrite));
    CapabilityTable::from_specs(specs).unwrap()
}

/// Init, run the collector and enter parallel development
async fn into_parallel_development(t: &TestOrchestrator) {
    let o = &t.orchestrator;
    o.init_phase().await.unwrap();
    let task = o.run_task(collector()).await.unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    let advance = o.advance_phase().await.unwrap();
    assert_eq!(advance.to, PhaseState::ParallelDevelopment);
}

#[tokio::test]
async fn approved_pipeline_writes_canonical_output() {
    let t = TestOrchestrator::new();
    let reviewer = Arc::new(ScriptedReviewer::new(vec![Verdict::Approve]));

    let report = t
        .orchestrator
        .run_pipeline(collector(), producers(), reviewer.clone())
        .await
        .unwrap();

    assert_eq!(report.phase, PhaseState::Done);
    assert_eq!(report.generation, Generation::FIRST);
    assert!(report.warnings.is_empty());
    assert_eq!(report.tasks.len(), 4);
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Done));
    assert_eq!(reviewer.calls(), 1);

    let root = report.output.unwrap();
    assert_eq!(root, t.output_dir().join("generation-1"));
    for path in [PACKAGE_PATH, TESTS_PATH, IMPLEMENTATION_PATH, REVIEW_PATH, MANIFEST_FILE] {
        assert!(root.join(path).is_file(), "{path} missing from canonical output");
    }
    let tests = std::fs::read_to_string(root.join(TESTS_PATH)).unwrap();
    assert_eq!(tests, cloister_test_utils::sample_tests());
}

#[tokio::test]
async fn reviewer_sees_merged_bundle() {
    let t = TestOrchestrator::new();
    let o = &t.orchestrator;
    into_parallel_development(&t).await;
    o.run_generation(&producers()).await.unwrap();
    assert_eq!(o.advance_phase().await.unwrap().to, PhaseState::Review);

    let record = o.create_workspace(Role::Reviewer, Vec::new()).await.unwrap();
    let paths: Vec<String> = record.snapshot.iter().map(|r| r.path.as_string()).collect();
    assert_eq!(paths, vec![PACKAGE_PATH, IMPLEMENTATION_PATH, TESTS_PATH]);
    let tests = o.read_file(record.id, TESTS_PATH).await.unwrap();
    assert_eq!(tests, cloister_test_utils::sample_tests().as_bytes());
}

#[tokio::test]
async fn producer_reading_implementation_is_denied_and_fails_phase() {
    let t = TestOrchestrator::new();
    let o = &t.orchestrator;
    into_parallel_development(&t).await;

    let snooping = tests_writer()
        .reads("implementation/eligibility.param")
        .swallowing_denials()
        .shared();
    let tasks = o
        .run_generation(&[snooping, implementer().shared()])
        .await
        .unwrap();

    let a = tasks.iter().find(|t| t.role == Role::IsolatedProducerA).unwrap();
    assert_eq!(a.status, TaskStatus::Failed);
    let failure = a.failure.as_deref().unwrap();
    assert!(failure.contains("implementation/**"), "{failure}");

    let denied: Vec<_> = o
        .audit()
        .access_records()
        .into_iter()
        .filter(|r| r.workspace_id == a.workspace_id && r.decision == Decision::Denied)
        .collect();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].path, "implementation/eligibility.param");

    let record = o.workspace_record(a.workspace_id).await.unwrap();
    assert_eq!(record.status, WorkspaceStatus::Discarded);

    let advance = o.advance_phase().await.unwrap();
    assert_eq!(advance.to, PhaseState::Failed);
}

#[tokio::test]
async fn denied_read_command_reports_rule_and_exit_code() {
    let t = TestOrchestrator::new();
    let o = &t.orchestrator;
    into_parallel_development(&t).await;

    let created = o
        .execute(Command::CreateWorkspace {
            role: Role::IsolatedProducerA,
            declared_outputs: vec![TESTS_PATH.parse().unwrap()],
        })
        .await;
    assert!(created.is_ok());
    let id = serde_json::from_value(created.data.unwrap()["id"].clone()).unwrap();

    let result = o
        .execute(Command::ReadFile {
            workspace_id: id,
            path: "implementation/x".into(),
        })
        .await;
    assert_eq!(result.status, CommandStatus::Error);
    assert_eq!(result.exit_code, 1);
    let body = result.error.unwrap();
    assert_eq!(body.kind, "capability");
    assert!(body.rule.unwrap().contains("deny"));

    // the denial aborted the participant
    let record = o.workspace_record(id).await.unwrap();
    assert_eq!(record.status, WorkspaceStatus::Discarded);
    let sealed = o.execute(Command::SealWorkspace { workspace_id: id }).await;
    assert!(!sealed.is_ok());

    let b = o
        .create_workspace(Role::IsolatedProducerB, vec![IMPLEMENTATION_PATH.parse().unwrap()])
        .await
        .unwrap();
    o.write_file(b.id, IMPLEMENTATION_PATH, b"threshold = 1200\n").await.unwrap();
    o.seal_workspace(b.id).await.unwrap();

    let advance = o.execute(Command::AdvancePhase).await;
    assert!(advance.is_ok());
    assert_eq!(o.phase(), PhaseState::Failed);
    let failure = o.phase_status().failure.unwrap().1;
    assert!(failure.contains("implementation/x"), "{failure}");
}

#[tokio::test]
async fn denied_write_command_fails_participant() {
    let t = TestOrchestrator::new();
    let o = &t.orchestrator;
    into_parallel_development(&t).await;

    let b = o
        .create_workspace(Role::IsolatedProducerB, vec![IMPLEMENTATION_PATH.parse().unwrap()])
        .await
        .unwrap();
    let err = o.write_file(b.id, TESTS_PATH, b"case: leaked\n").await.unwrap_err();
    assert!(err.is_isolation_violation());
    assert_eq!(
        o.workspace_record(b.id).await.unwrap().status,
        WorkspaceStatus::Discarded
    );
    assert!(o.write_file(b.id, IMPLEMENTATION_PATH, b"x").await.is_err());
}

#[tokio::test]
async fn participant_admitted_after_merge_is_in_bundle() {
    let t = TestOrchestrator::new();
    let o = &t.orchestrator;
    into_parallel_development(&t).await;
    o.run_generation(&producers()).await.unwrap();
    match o.merge().await.unwrap() {
        MergeOutcome::Bundle { manifest } => assert_eq!(manifest.entries.len(), 2),
        other => panic!("expected bundle, got {other:?}"),
    }

    let extra = "implementation/extra.param";
    let late = o
        .create_workspace(Role::IsolatedProducerB, vec![extra.parse().unwrap()])
        .await
        .unwrap();
    assert!(o.bundle_manifest().is_none());

    // the barrier waits for the late participant
    let pending = o.execute(Command::AdvancePhase).await;
    assert_eq!(pending.status, CommandStatus::Pending);

    o.write_file(late.id, extra, b"rate = 0.35\n").await.unwrap();
    o.seal_workspace(late.id).await.unwrap();
    assert_eq!(o.advance_phase().await.unwrap().to, PhaseState::Review);

    let manifest = o.bundle_manifest().unwrap();
    let paths: Vec<String> = manifest.entries.iter().map(|e| e.path.as_string()).collect();
    assert_eq!(paths, vec![IMPLEMENTATION_PATH, extra, TESTS_PATH]);
}

#[tokio::test]
async fn overlapping_outputs_are_reported_as_conflict() {
    let t = TestOrchestrator::with(|c| c, shared_rules_table());
    let o = &t.orchestrator;
    into_parallel_development(&t).await;

    let a = ScriptedWorker::new(Role::IsolatedProducerA)
        .writes("rules/liheap.param", "threshold: 1200\n")
        .shared();
    let b = ScriptedWorker::new(Role::IsolatedProducerB)
        .writes("rules/liheap.param", "threshold = 1250\n")
        .shared();
    let tasks = o.run_generation(&[a, b]).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Done));

    let err = o.advance_phase().await.unwrap_err();
    assert_eq!(err.exit_code().code(), 3);
    match err {
        OrchestratorError::Merge(MergeError::Conflict(report)) => {
            let expected: Vec<LogicalPath> = vec!["rules/liheap.param".parse().unwrap()];
            assert_eq!(report.paths, expected);
            assert_eq!(report.conflicts.len(), 1);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // stays blocked until a supervisor acts
    let again = o.execute(Command::AdvancePhase).await;
    assert_eq!(again.exit_code, 3);
    assert_eq!(again.error.unwrap().paths.len(), 1);
    assert_eq!(o.phase(), PhaseState::ParallelDevelopment);

    let retry = o.retry_phase(Role::Supervisor).await.unwrap();
    assert_eq!(retry.to, PhaseState::ParallelDevelopment);
    assert_eq!(retry.generation, Generation(2));
    assert!(o.phase_status().pending_conflict.is_none());
}

#[tokio::test]
async fn barrier_holds_until_every_participant_is_terminal() {
    let t = TestOrchestrator::new();
    let o = &t.orchestrator;
    into_parallel_development(&t).await;

    let a = o
        .create_workspace(Role::IsolatedProducerA, vec![TESTS_PATH.parse().unwrap()])
        .await
        .unwrap();
    let b = o
        .create_workspace(Role::IsolatedProducerB, vec![IMPLEMENTATION_PATH.parse().unwrap()])
        .await
        .unwrap();
    o.write_file(b.id, IMPLEMENTATION_PATH, b"threshold = 1200\n").await.unwrap();
    o.seal_workspace(b.id).await.unwrap();

    let pending = o.execute(Command::AdvancePhase).await;
    assert_eq!(pending.status, CommandStatus::Pending);
    assert_eq!(pending.exit_code, 2);

    let merge = o.merge().await.unwrap_err();
    assert!(matches!(merge, OrchestratorError::Precondition(_)));
    assert!(o.bundle_manifest().is_none());

    o.write_file(a.id, TESTS_PATH, b"case: below\n").await.unwrap();
    o.seal_workspace(a.id).await.unwrap();
    match o.merge().await.unwrap() {
        MergeOutcome::Bundle { manifest } => assert_eq!(manifest.entries.len(), 2),
        other => panic!("expected bundle, got {other:?}"),
    }
    assert_eq!(o.advance_phase().await.unwrap().to, PhaseState::Review);
}

#[tokio::test]
async fn timed_out_task_fails_without_releasing_siblings_early() {
    let t = TestOrchestrator::with(
        |c| c.with_task_deadline(Duration::from_millis(100)),
        CapabilityTable::default(),
    );
    let o = &t.orchestrator;
    into_parallel_development(&t).await;

    let slow = tests_writer().sleeps(Duration::from_secs(5)).shared();
    let tasks = o
        .run_generation(&[slow, implementer().shared()])
        .await
        .unwrap();

    let a = tasks.iter().find(|t| t.role == Role::IsolatedProducerA).unwrap();
    let b = tasks.iter().find(|t| t.role == Role::IsolatedProducerB).unwrap();
    assert_eq!(a.status, TaskStatus::Failed);
    assert!(a.failure.as_deref().unwrap().contains("deadline"));
    assert_eq!(b.status, TaskStatus::Done);
    assert!(o.bundle_manifest().is_none());

    let advance = o.advance_phase().await.unwrap();
    assert_eq!(advance.to, PhaseState::Failed);
}

#[tokio::test]
async fn missing_declared_output_fails_task() {
    let t = TestOrchestrator::new();
    let o = &t.orchestrator;
    into_parallel_development(&t).await;

    let lazy = tests_writer().declares("tests/edge_cases.yaml").shared();
    let tasks = o
        .run_generation(&[lazy, implementer().shared()])
        .await
        .unwrap();
    let a = tasks.iter().find(|t| t.role == Role::IsolatedProducerA).unwrap();
    assert_eq!(a.status, TaskStatus::Failed);
    assert!(a.failure.as_deref().unwrap().contains("tests/edge_cases.yaml"));
    assert_eq!(
        o.workspace_record(a.workspace_id).await.unwrap().status,
        WorkspaceStatus::Discarded
    );
}

#[tokio::test]
async fn advance_without_progress_is_idempotent() {
    let t = TestOrchestrator::new();
    let o = &t.orchestrator;
    o.init_phase().await.unwrap();
    let records = o.store().records().unwrap().len();

    for _ in 0..3 {
        let advance = o.advance_phase().await.unwrap();
        assert!(!advance.changed);
        assert_eq!(advance.to, PhaseState::Collection);
    }
    assert_eq!(o.store().records().unwrap().len(), records);
    assert_eq!(o.phase(), PhaseState::Collection);

    let again = o.init_phase().await.unwrap_err();
    assert!(matches!(
        again,
        OrchestratorError::Scheduler(SchedulerError::AlreadyInitialised(_))
    ));
}

#[tokio::test]
async fn wrong_role_cannot_join_phase() {
    let t = TestOrchestrator::new();
    let o = &t.orchestrator;
    o.init_phase().await.unwrap();

    let result = o
        .execute(Command::CreateWorkspace {
            role: Role::IsolatedProducerB,
            declared_outputs: Vec::new(),
        })
        .await;
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.error.unwrap().kind, "phase");
}

#[tokio::test]
async fn requested_changes_open_new_generation() {
    let t = TestOrchestrator::new();
    let reviewer = Arc::new(ScriptedReviewer::new(vec![
        Verdict::RequestChanges,
        Verdict::Approve,
    ]));

    let report = t
        .orchestrator
        .run_pipeline(collector(), producers(), reviewer.clone())
        .await
        .unwrap();
    assert_eq!(report.phase, PhaseState::Done);
    assert_eq!(report.generation, Generation(2));
    assert_eq!(reviewer.calls(), 2);
    assert_eq!(report.output, Some(t.output_dir().join("generation-2")));

    let summary = t.orchestrator.replay().unwrap();
    assert_eq!(summary.generations.len(), 2);
    let discarded = summary
        .workspaces
        .values()
        .filter(|s| **s == WorkspaceStatus::Discarded)
        .count();
    // both producers and the reviewer of generation 1
    assert_eq!(discarded, 3);
    let merged = summary
        .workspaces
        .values()
        .filter(|s| **s == WorkspaceStatus::Merged)
        .count();
    assert_eq!(merged, 3);
}

#[tokio::test]
async fn only_supervisor_may_retry_failed_phase() {
    let t = TestOrchestrator::new();
    let o = &t.orchestrator;
    into_parallel_development(&t).await;

    let failing = tests_writer().fails_with("generator crashed").shared();
    o.run_generation(&[failing, implementer().shared()])
        .await
        .unwrap();
    assert_eq!(o.advance_phase().await.unwrap().to, PhaseState::Failed);

    let denied = o.retry_phase(Role::IsolatedProducerA).await.unwrap_err();
    assert!(denied.is_isolation_violation());

    let retry = o.retry_phase(Role::Supervisor).await.unwrap();
    assert_eq!(retry.to, PhaseState::ParallelDevelopment);
    assert_eq!(retry.generation, Generation(2));

    let tasks = o.run_generation(&producers()).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Done));
    assert_eq!(o.advance_phase().await.unwrap().to, PhaseState::Review);
}

#[tokio::test]
async fn audit_chain_and_state_log_survive_full_run() {
    let t = TestOrchestrator::new();
    let reviewer = Arc::new(ScriptedReviewer::new(vec![Verdict::Approve]));
    t.orchestrator
        .run_pipeline(collector(), producers(), reviewer)
        .await
        .unwrap();

    let audit = t.orchestrator.audit();
    audit.verify_integrity().unwrap();
    let transitions = audit
        .entries()
        .into_iter()
        .filter(|e| matches!(e.event, AuditEvent::PhaseTransition { .. }))
        .count();
    // idle → collection → development → review → merge → done
    assert_eq!(transitions, 5);

    assert!(t.dir.path().join("state").join(STATE_FILE).is_file());
    let summary = t.orchestrator.replay().unwrap();
    assert_eq!(summary.phase, Some(PhaseState::Done));
    assert_eq!(summary.tasks.len(), 4);
    assert!(summary.tasks.values().all(|s| *s == TaskStatus::Done));
    assert_eq!(summary.artifacts.len(), 4);
}

#[tokio::test]
async fn capability_file_from_config_is_enforced() {
    let dir = tempfile::TempDir::new().unwrap();
    let table_path = dir.path().join("capabilities.toml");
    std::fs::write(&table_path, shared_rules_table().to_toml_string().unwrap()).unwrap();

    let config = cloister_core::OrchestratorConfig::new()
        .with_root(dir.path())
        .with_capabilities(&table_path);
    let o = cloister_core::Orchestrator::new(config).unwrap();
    o.init_phase().await.unwrap();
    o.run_task(collector()).await.unwrap();
    o.advance_phase().await.unwrap();

    // allowed only by the file's extra rule
    let record = o
        .create_workspace(Role::IsolatedProducerA, vec!["rules/liheap.param".parse().unwrap()])
        .await
        .unwrap();
    o.write_file(record.id, "rules/liheap.param", b"threshold: 1200\n")
        .await
        .unwrap();

    let missing = cloister_core::OrchestratorConfig::new()
        .with_root(dir.path().join("other"))
        .with_capabilities(dir.path().join("absent.toml"));
    let err = cloister_core::Orchestrator::new(missing).unwrap_err();
    assert_eq!(err.exit_code().code(), 4);
}

#[tokio::test]
async fn capability_file_with_overreaching_pattern_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let table_path = dir.path().join("capabilities.toml");
    let toml = r#"
        [[roles.isolated_producer_a]]
        namespace = "documents"
        pattern = "documents/**"
        effect = "allow"
        access = "read"

        [[roles.isolated_producer_a]]
        namespace = "tests"
        pattern = "**"
        effect = "allow"
        access = "read_write"

        [[roles.reviewer]]
        namespace = "documents"
        pattern = "documents/**"
        effect = "allow"
        access = "read"
        [[roles.reviewer]]
        namespace = "tests"
        pattern = "tests/**"
        effect = "allow"
        access = "read"
        [[roles.reviewer]]
        namespace = "implementation"
        pattern = "implementation/**"
        effect = "allow"
        access = "read"
        [[roles.reviewer]]
        namespace = "review"
        pattern = "review/**"
        effect = "allow"
    "#;
    std::fs::write(&table_path, toml).unwrap();

    let config = cloister_core::OrchestratorConfig::new()
        .with_root(dir.path())
        .with_capabilities(&table_path);
    let err = cloister_core::Orchestrator::new(config).unwrap_err();
    assert_eq!(err.exit_code().code(), 4);
    assert!(matches!(
        err,
        OrchestratorError::Config(ConfigError::IsolationInvariant {
            role: Role::IsolatedProducerA,
            ..
        })
    ));
}
