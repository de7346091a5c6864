//! Testing utilities for the Cloister workspace
//!
//! Scripted workers, a sample document package, and a temp-dir backed
//! orchestrator.

#![allow(missing_docs)]

use async_trait::async_trait;
use cloister_artifact::{DocumentPackage, LogicalPath, ReviewReport, Verdict};
use cloister_core::{Orchestrator, OrchestratorConfig, Worker, WorkerContext};
use cloister_kernel::{CapabilityTable, Role};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const PACKAGE_PATH: &str = "documents/package.json";
pub const TESTS_PATH: &str = "tests/eligibility.yaml";
pub const IMPLEMENTATION_PATH: &str = "implementation/eligibility.param";
pub const REVIEW_PATH: &str = "review/report.json";

pub fn sample_package() -> DocumentPackage {
    DocumentPackage::new().with_document(
        "statute.md",
        "Households below 1200 per month qualify. The benefit rate is 0.35.",
    )
}

pub fn sample_tests() -> &'static str {
    "case: below_threshold\nincome: 1100\neligible: true\n"
}

pub fn sample_implementation() -> &'static str {
    "threshold = 1200\nrate = 0.35\n"
}

/// Worker that performs a fixed list of steps
#[derive(Debug, Clone)]
pub struct ScriptedWorker {
    role: Role,
    reads: Vec<String>,
    writes: Vec<(String, Vec<u8>)>,
    declared_only: Vec<String>,
    delay: Option<Duration>,
    failure: Option<String>,
    swallow_denials: bool,
}

impl ScriptedWorker {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            reads: Vec::new(),
            writes: Vec::new(),
            declared_only: Vec::new(),
            delay: None,
            failure: None,
            swallow_denials: false,
        }
    }

    pub fn reads(mut self, path: &str) -> Self {
        self.reads.push(path.to_string());
        self
    }

    pub fn writes(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.writes.push((path.to_string(), contents.into()));
        self
    }

    /// Declare an output that is never written
    pub fn declares(mut self, path: &str) -> Self {
        self.declared_only.push(path.to_string());
        self
    }

    pub fn sleeps(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fails_with(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    /// Ignore read errors instead of propagating them
    pub fn swallowing_denials(mut self) -> Self {
        self.swallow_denials = true;
        self
    }

    pub fn shared(self) -> Arc<dyn Worker> {
        Arc::new(self)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn role(&self) -> Role {
        self.role
    }

    fn declared_outputs(&self) -> Vec<LogicalPath> {
        self.writes
            .iter()
            .map(|(path, _)| path)
            .chain(&self.declared_only)
            .filter_map(|p| p.parse().ok())
            .collect()
    }

    async fn run(&self, ctx: &mut WorkerContext<'_>) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        for path in &self.reads {
            match ctx.read(path).await {
                Ok(_) => {}
                Err(_) if self.swallow_denials => {}
                Err(err) => return Err(err.into()),
            }
        }
        for (path, contents) in &self.writes {
            ctx.write(path, contents).await?;
        }
        match &self.failure {
            Some(reason) => Err(anyhow::anyhow!("{reason}")),
            None => Ok(()),
        }
    }
}

/// Reviewer that reads the whole bundle and returns scripted verdicts
///
/// The last verdict repeats once the script runs out.
#[derive(Debug)]
pub struct ScriptedReviewer {
    verdicts: Vec<Verdict>,
    calls: AtomicUsize,
}

impl ScriptedReviewer {
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedReviewer {
    fn role(&self) -> Role {
        Role::Reviewer
    }

    fn declared_outputs(&self) -> Vec<LogicalPath> {
        REVIEW_PATH.parse().into_iter().collect()
    }

    async fn run(&self, ctx: &mut WorkerContext<'_>) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let verdict = self
            .verdicts
            .get(call)
            .or_else(|| self.verdicts.last())
            .copied()
            .unwrap_or(Verdict::Approve);

        let mut report = ReviewReport::new(verdict);
        for path in ctx.list() {
            let text = ctx.read_to_string(&path.as_string()).await?;
            report = report.with_finding(format!("{path}: {} bytes", text.len()));
        }
        ctx.write(REVIEW_PATH, report.to_blob()?).await?;
        Ok(())
    }
}

pub fn collector() -> Arc<dyn Worker> {
    let blob = sample_package().to_blob().unwrap();
    ScriptedWorker::new(Role::Collector)
        .writes(PACKAGE_PATH, blob)
        .shared()
}

pub fn tests_writer() -> ScriptedWorker {
    ScriptedWorker::new(Role::IsolatedProducerA)
        .reads(PACKAGE_PATH)
        .writes(TESTS_PATH, sample_tests())
}

pub fn implementer() -> ScriptedWorker {
    ScriptedWorker::new(Role::IsolatedProducerB)
        .reads(PACKAGE_PATH)
        .writes(IMPLEMENTATION_PATH, sample_implementation())
}

pub fn producers() -> Vec<Arc<dyn Worker>> {
    vec![tests_writer().shared(), implementer().shared()]
}

/// Orchestrator rooted in a temp dir that lives as long as this value
pub struct TestOrchestrator {
    pub dir: TempDir,
    pub orchestrator: Arc<Orchestrator>,
}

impl TestOrchestrator {
    pub fn new() -> Self {
        Self::with(|config| config, CapabilityTable::default())
    }

    pub fn with(
        configure: impl FnOnce(OrchestratorConfig) -> OrchestratorConfig,
        table: CapabilityTable,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let config = configure(OrchestratorConfig::new().with_root(dir.path()));
        let orchestrator = Arc::new(Orchestrator::with_table(config, table).unwrap());
        Self { dir, orchestrator }
    }

    pub fn output_dir(&self) -> std::path::PathBuf {
        self.orchestrator.config().output_dir.clone()
    }
}

impl Default for TestOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}
