use cloister_artifact::{Artifact, ArtifactKind, DocumentPackage, LogicalPath, Namespace, WorkspaceId};
use cloister_kernel::{
    Access, AccessGuard, AuditLog, CapabilityTable, Generation, Role, RuleSpec, SealedWorkspace,
    Workspace, WorkspaceAllocator,
};
use cloister_merge::{integrate, BreachHeuristicConfig, MergeCoordinator, MergeError, MANIFEST_FILE};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    allocator: WorkspaceAllocator,
    guard: Arc<AccessGuard>,
}

impl Harness {
    fn new(table: CapabilityTable) -> Self {
        let dir = TempDir::new().unwrap();
        let allocator = WorkspaceAllocator::new(dir.path().join("workspaces"));
        let guard = Arc::new(AccessGuard::new(Arc::new(table), Arc::new(AuditLog::new())));
        Self {
            dir,
            allocator,
            guard,
        }
    }

    async fn produce(
        &self,
        role: Role,
        generation: Generation,
        outputs: &[(&str, &str)],
    ) -> SealedWorkspace {
        let declared: Vec<LogicalPath> = outputs.iter().map(|(p, _)| p.parse().unwrap()).collect();
        let mut ws = Workspace::create(
            &self.allocator,
            self.guard.clone(),
            role,
            generation,
            &[package()],
            &declared,
        )
        .await
        .unwrap();
        for (path, text) in outputs {
            ws.write(path, text.as_bytes()).await.unwrap();
        }
        ws.seal().await.unwrap()
    }
}

fn package() -> Artifact {
    let package = DocumentPackage::new().with_document(
        "statute.md",
        "Households below 1200 per month qualify. The benefit rate is 0.35.",
    );
    Artifact::new(
        ArtifactKind::DocumentPackage,
        "documents/package.json".parse().unwrap(),
        WorkspaceId::new(),
        package.to_blob().unwrap(),
    )
    .with_manifest(package.manifest())
}

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

#[tokio::test]
async fn disjoint_outputs_merge_into_their_union() {
    let h = Harness::new(CapabilityTable::default());
    let a = h
        .produce(
            Role::IsolatedProducerA,
            Generation::FIRST,
            &[("tests/eligibility.yaml", "income: 1100\nexpected: eligible\n")],
        )
        .await;
    let b = h
        .produce(
            Role::IsolatedProducerB,
            Generation::FIRST,
            &[
                ("implementation/rules.param", "income_limit = 1200\n"),
                ("implementation/rate.param", "benefit_rate = 0.35\n"),
            ],
        )
        .await;

    let documents = package();
    let bundle = MergeCoordinator::default()
        .merge(&[a, b], Some(&documents))
        .unwrap();

    let paths: Vec<String> = bundle.paths().map(LogicalPath::as_string).collect();
    assert_eq!(
        paths,
        vec![
            "implementation/rate.param".to_string(),
            "implementation/rules.param".to_string(),
            "tests/eligibility.yaml".to_string(),
        ]
    );
    assert!(bundle.is_clean());
    assert_eq!(bundle.sources().len(), 2);
    // package first, then outputs
    let snapshot = bundle.snapshot();
    assert_eq!(snapshot.len(), 4);
    assert_eq!(snapshot[0].kind(), ArtifactKind::DocumentPackage);
}

#[tokio::test]
async fn overlapping_outputs_raise_conflict_report() {
    let h = Harness::new(shared_rules_table());
    let a = h
        .produce(Role::IsolatedProducerA, Generation::FIRST, &[("rules/liheap.param", "ceiling: 1\n")])
        .await;
    let b = h
        .produce(Role::IsolatedProducerB, Generation::FIRST, &[("rules/liheap.param", "ceiling = 2\n")])
        .await;

    let err = MergeCoordinator::default().merge(&[a, b], None).unwrap_err();
    assert!(err.is_conflict());
    let report = match err {
        MergeError::Conflict(report) => report,
        other => panic!("expected conflict, got {other:?}"),
    };
    let paths: Vec<String> = report.paths.iter().map(LogicalPath::as_string).collect();
    assert_eq!(paths, vec!["rules/liheap.param".to_string()]);
    assert_eq!(cloister_merge::ConflictReport::EXIT_CODE, 3);
}

#[tokio::test]
async fn mixed_generations_are_rejected() {
    let h = Harness::new(CapabilityTable::default());
    let a = h
        .produce(Role::IsolatedProducerA, Generation::FIRST, &[("tests/a.yaml", "x: 1\n")])
        .await;
    let b = h
        .produce(Role::IsolatedProducerB, Generation(2), &[("implementation/a.param", "x = 1\n")])
        .await;
    let err = MergeCoordinator::default().merge(&[a, b], None).unwrap_err();
    assert!(matches!(err, MergeError::MixedGeneration { .. }));
    assert!(matches!(
        MergeCoordinator::default().merge(&[], None),
        Err(MergeError::Empty)
    ));
}

#[tokio::test]
async fn aligned_underivable_values_attach_breach_warning() {
    let h = Harness::new(CapabilityTable::default());
    let a = h
        .produce(
            Role::IsolatedProducerA,
            Generation::FIRST,
            &[("tests/hidden.yaml", "hidden_cap: 9876\nodd_factor: 0.8123\nsecret_floor: 4455\n")],
        )
        .await;
    let b = h
        .produce(
            Role::IsolatedProducerB,
            Generation::FIRST,
            &[("implementation/hidden.param", "hidden_cap = 9876\nodd_factor = 0.8123\nsecret_floor = 4455\n")],
        )
        .await;
    let documents = package();

    let bundle = MergeCoordinator::default()
        .merge(&[a.clone(), b.clone()], Some(&documents))
        .unwrap();
    assert_eq!(bundle.warnings().len(), 1);
    assert!(bundle.warnings()[0].matched.contains(&"9876".to_string()));

    let relaxed = MergeCoordinator::new(BreachHeuristicConfig {
        enabled: false,
        ..BreachHeuristicConfig::default()
    });
    assert!(!relaxed.breach_detector().config().enabled);
    assert!(relaxed.merge(&[a, b], Some(&documents)).unwrap().is_clean());
}

#[tokio::test]
async fn integrate_writes_generation_directory_and_manifest() {
    let h = Harness::new(CapabilityTable::default());
    let a = h
        .produce(Role::IsolatedProducerA, Generation::FIRST, &[("tests/a.yaml", "income: 1100\n")])
        .await;
    let b = h
        .produce(Role::IsolatedProducerB, Generation::FIRST, &[("implementation/a.param", "limit = 1200\n")])
        .await;
    let documents = package();
    let bundle = MergeCoordinator::default()
        .merge(&[a, b], Some(&documents))
        .unwrap();

    let output_dir = h.dir.path().join("output");
    let output = integrate(&bundle, None, &output_dir).await.unwrap();

    assert_eq!(output.root, output_dir.join("generation-1"));
    assert!(output.root.join("tests/a.yaml").exists());
    assert!(output.root.join("implementation/a.param").exists());
    assert!(output.root.join("documents/package.json").exists());
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(output.root.join(MANIFEST_FILE)).unwrap()).unwrap();
    assert_eq!(manifest["entries"].as_array().unwrap().len(), 2);
    assert_eq!(manifest["generation"], 1);
}
