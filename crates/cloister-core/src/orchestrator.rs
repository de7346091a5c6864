//! Orchestrator
//!
//! Owns the scheduler, the live workspaces and the generation-local state
//! (document package, sealed producer workspaces, merged bundle, review
//! report) and exposes the operations of the command surface. Every state
//! change is appended to the persisted [`StateStore`].
//!
//! Locking: the scheduler and generation state sit behind `parking_lot`
//! mutexes that are never held across an `.await`; each workspace has its
//! own async mutex, so participants never contend with each other.

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, TaskError};
use crate::runner::TaskRunner;
use crate::store::{StateRecord, StateStore, StateSummary};
use crate::task::{Task, TaskId};
use crate::telemetry::init_tracing;
use crate::worker::Worker;
use cloister_artifact::{
    Artifact, ArtifactKind, ArtifactRef, LogicalPath, ReviewReport, Verdict, WorkspaceId,
};
use cloister_kernel::{
    AccessGuard, Advance, AuditEntry, AuditLog, CapabilityTable, Generation, PhaseScheduler,
    PhaseSnapshot, PhaseState, Role, SchedulerError, SealedWorkspace, Workspace,
    WorkspaceAllocator, WorkspaceError, WorkspaceRecord, WorkspaceStatus,
};
use cloister_merge::{
    integrate, BreachWarning, BundleManifest, MergeCoordinator, MergeError, MergedBundle,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of the `merge` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Parallel development outputs merged into a bundle for review
    Bundle {
        /// Bundle description
        manifest: BundleManifest,
    },
    /// Approved bundle written to canonical output
    Integrated {
        /// `output_dir/generation-N`
        root: PathBuf,
        /// Manifest as written
        manifest: BundleManifest,
    },
}

/// Summary of an automated run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Phase the run stopped in
    pub phase: PhaseState,
    /// Generation the run stopped in
    pub generation: Generation,
    /// Every task executed, in completion order
    pub tasks: Vec<Task>,
    /// Breach warnings of the last merged bundle
    pub warnings: Vec<BreachWarning>,
    /// Canonical output, when the run reached `Done`
    pub output: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct GenerationState {
    generation: Generation,
    document_package: Option<Artifact>,
    sealed: BTreeMap<WorkspaceId, SealedWorkspace>,
    bundle: Option<MergedBundle>,
    review: Option<(WorkspaceId, Artifact)>,
    output: Option<PathBuf>,
}

/// Central orchestrator
#[derive(Debug)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    audit: Arc<AuditLog>,
    guard: Arc<AccessGuard>,
    allocator: WorkspaceAllocator,
    runner: TaskRunner,
    merger: MergeCoordinator,
    store: StateStore,
    scheduler: Mutex<PhaseScheduler>,
    workspaces: DashMap<WorkspaceId, Arc<tokio::sync::Mutex<Workspace>>>,
    tasks: DashMap<TaskId, Task>,
    current: Mutex<GenerationState>,
}

impl Orchestrator {
    /// Create new orchestrator, loading the configured capability table
    ///
    /// Installs the tracing subscriber described by `config.telemetry`
    /// unless one is already set.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Config`] for an invalid table or
    /// [`OrchestratorError::Store`] when the state log cannot be opened.
    pub fn new(config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        if init_tracing(&config.telemetry) {
            debug!(filter = %config.telemetry.filter, "tracing initialised");
        }
        let table = config.capability_table()?;
        Self::with_table(config, table)
    }

    /// Create new orchestrator with an explicit capability table
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Store`] when the state log cannot be
    /// opened.
    pub fn with_table(
        config: OrchestratorConfig,
        table: CapabilityTable,
    ) -> Result<Self, OrchestratorError> {
        let audit = Arc::new(AuditLog::new());
        let guard = Arc::new(AccessGuard::new(Arc::new(table), Arc::clone(&audit)));
        let store = StateStore::open(&config.state_dir)?;
        Ok(Self {
            allocator: WorkspaceAllocator::new(&config.workspace_root),
            runner: TaskRunner::new(config.task_deadline()),
            merger: MergeCoordinator::new(config.breach.clone()),
            scheduler: Mutex::new(PhaseScheduler::new(config.scheduler(), Arc::clone(&audit))),
            store,
            audit,
            guard,
            workspaces: DashMap::new(),
            tasks: DashMap::new(),
            current: Mutex::new(GenerationState::default()),
            config,
        })
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Shared audit log
    #[inline]
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Access guard every workspace uses
    #[inline]
    #[must_use]
    pub fn guard(&self) -> &Arc<AccessGuard> {
        &self.guard
    }

    /// Persisted state log
    #[inline]
    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> PhaseState {
        self.scheduler.lock().state()
    }

    /// Current generation
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.scheduler.lock().generation()
    }

    /// Reviewer verdict of the current generation
    #[must_use]
    pub fn verdict(&self) -> Option<Verdict> {
        self.scheduler.lock().verdict()
    }

    /// `phase-status`
    #[must_use]
    pub fn phase_status(&self) -> PhaseSnapshot {
        self.scheduler.lock().snapshot()
    }

    /// Task by id
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).map(|t| t.value().clone())
    }

    /// Manifest of the current generation's bundle
    #[must_use]
    pub fn bundle_manifest(&self) -> Option<BundleManifest> {
        self.current.lock().bundle.as_ref().map(MergedBundle::manifest)
    }

    /// Serializable view of a workspace
    ///
    /// # Errors
    /// Returns [`OrchestratorError::WorkspaceNotFound`] for unknown ids.
    pub async fn workspace_record(&self, id: WorkspaceId) -> Result<WorkspaceRecord, OrchestratorError> {
        Ok(self.workspace(id)?.lock().await.record())
    }

    /// `get-audit-log(workspace_id?)`
    #[must_use]
    pub fn audit_log(&self, workspace_id: Option<WorkspaceId>) -> Vec<AuditEntry> {
        match workspace_id {
            Some(id) => self.audit.for_workspace(id),
            None => self.audit.entries(),
        }
    }

    /// Rebuild a summary from the persisted log
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Store`] on a malformed or unreadable log.
    pub fn replay(&self) -> Result<StateSummary, OrchestratorError> {
        Ok(self.store.replay()?)
    }

    /// `init-phase`: `Idle` → `Collection`
    ///
    /// # Errors
    /// Returns [`SchedulerError::AlreadyInitialised`] when already running.
    pub async fn init_phase(&self) -> Result<Advance, OrchestratorError> {
        let advance = self.scheduler.lock().init()?;
        self.after_advance(&advance).await?;
        Ok(advance)
    }

    /// `create-workspace(role)`
    ///
    /// The snapshot depends on the phase: nothing during collection, the
    /// document package during parallel development, the merged bundle
    /// during review.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Scheduler`] when the phase does not admit
    /// `role`, [`OrchestratorError::Workspace`] when the snapshot or a
    /// declared output is outside the role's capabilities, and
    /// [`OrchestratorError::Precondition`] when the phase input is missing.
    pub async fn create_workspace(
        &self,
        role: Role,
        declared_outputs: Vec<LogicalPath>,
    ) -> Result<WorkspaceRecord, OrchestratorError> {
        let (phase, generation) = {
            let scheduler = self.scheduler.lock();
            scheduler.check_admission(role)?;
            (scheduler.state(), scheduler.generation())
        };
        let snapshot = self.snapshot_for(phase)?;
        let mut workspace = Workspace::create(
            &self.allocator,
            Arc::clone(&self.guard),
            role,
            generation,
            &snapshot,
            &declared_outputs,
        )
        .await?;

        let admitted = self.scheduler.lock().admit(role, workspace.id());
        if let Err(err) = admitted {
            // lost a race for a single-participant phase
            workspace.discard().await?;
            return Err(err.into());
        }

        if phase == PhaseState::ParallelDevelopment {
            // a bundle built before this participant joined no longer covers the generation
            self.current.lock().bundle = None;
        }
        let record = workspace.record();
        self.persist(generation, StateRecord::Workspace(record.clone()))?;
        self.workspaces
            .insert(record.id, Arc::new(tokio::sync::Mutex::new(workspace)));
        Ok(record)
    }

    /// `read-file(workspace_id, path)`
    ///
    /// A denied read aborts the participant: its workspace is discarded and
    /// the phase can no longer succeed.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Workspace`] when denied or missing.
    pub async fn read_file(&self, id: WorkspaceId, path: &str) -> Result<Vec<u8>, OrchestratorError> {
        let workspace = self.workspace(id)?;
        let ws = workspace.lock().await;
        let read = ws.read(path).await;
        match read {
            Ok(bytes) => Ok(bytes),
            Err(err) => Err(self.abort_on_denial(ws, err).await),
        }
    }

    /// `write-file(workspace_id, path, content)`
    ///
    /// A denied write aborts the participant like a denied read.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Workspace`] when denied or on I/O failure.
    pub async fn write_file(
        &self,
        id: WorkspaceId,
        path: &str,
        contents: &[u8],
    ) -> Result<(), OrchestratorError> {
        let workspace = self.workspace(id)?;
        let mut ws = workspace.lock().await;
        let written = ws.write(path, contents).await;
        match written {
            Ok(()) => Ok(()),
            Err(err) => Err(self.abort_on_denial(ws, err).await),
        }
    }

    /// `seal-workspace(id)`
    ///
    /// Missing outputs, a guard denial or an undecodable payload are fatal:
    /// the workspace is discarded and its participant marked failed.
    ///
    /// # Errors
    /// Returns the [`WorkspaceError`] that prevented sealing.
    pub async fn seal_workspace(&self, id: WorkspaceId) -> Result<Vec<ArtifactRef>, OrchestratorError> {
        let workspace = self.workspace(id)?;
        let mut ws = workspace.lock().await;
        let generation = ws.generation();
        let sealed = ws.seal().await;
        match sealed {
            Ok(sealed) => {
                let record = ws.record();
                drop(ws);
                self.persist(generation, StateRecord::Workspace(record))?;
                self.on_sealed(sealed)
            }
            Err(err @ WorkspaceError::Transition(_)) => Err(err.into()),
            Err(err) => {
                let reason = err.to_string();
                if let Err(discard) = ws.discard().await {
                    warn!(workspace_id = %id, error = %discard, "discard after failed seal failed");
                }
                let record = ws.record();
                drop(ws);
                self.persist(generation, StateRecord::Workspace(record))?;
                self.record_failure(id, reason)?;
                Err(err.into())
            }
        }
    }

    /// `discard-workspace(id)`
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Workspace`] for merged or already
    /// discarded workspaces.
    pub async fn discard_workspace(&self, id: WorkspaceId) -> Result<(), OrchestratorError> {
        let workspace = self.workspace(id)?;
        let mut ws = workspace.lock().await;
        ws.discard().await?;
        let record = ws.record();
        drop(ws);
        self.persist(record.generation, StateRecord::Workspace(record))?;
        self.current.lock().sealed.remove(&id);
        let discarded = self.scheduler.lock().record_discarded(id);
        match discarded {
            // workspace of an earlier phase or generation
            Ok(()) | Err(SchedulerError::UnknownWorkspace(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// `advance-phase`
    ///
    /// Idempotent: while the exit predicate is pending the call changes
    /// nothing and reports the current state. Leaving parallel development
    /// re-merges every sealed output first; a conflict keeps the phase
    /// blocked.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Merge`] with a conflict report when the
    /// producers' outputs overlap.
    pub async fn advance_phase(&self) -> Result<Advance, OrchestratorError> {
        let (phase, ready) = {
            let scheduler = self.scheduler.lock();
            if let Some(paths) = scheduler.pending_conflict() {
                return Err(SchedulerError::ConflictPending(paths.to_vec()).into());
            }
            (scheduler.state(), scheduler.exit_predicate().is_satisfied())
        };
        if phase == PhaseState::ParallelDevelopment && ready {
            // always from the sealed set as it stands now
            self.merge_generation()?;
        }
        let advance = self.scheduler.lock().advance()?;
        self.after_advance(&advance).await?;
        Ok(advance)
    }

    /// `retry-phase` (supervisor only)
    ///
    /// # Errors
    /// Returns [`SchedulerError::SupervisorOnly`] for other roles and
    /// [`SchedulerError::NothingToRetry`] when nothing failed.
    pub async fn retry_phase(&self, role: Role) -> Result<Advance, OrchestratorError> {
        let advance = self.scheduler.lock().retry(role)?;
        info!(%role, generation = %advance.generation, to = %advance.to, "phase retried");
        self.after_advance(&advance).await?;
        Ok(advance)
    }

    /// `merge`
    ///
    /// During parallel development, once every participant is sealed, builds
    /// the bundle the reviewer will see. In the merge phase with an approving
    /// verdict, writes the canonical output and marks the sources merged.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Precondition`] before the barrier holds or
    /// after changes were requested, [`OrchestratorError::Merge`] on conflict
    /// or storage failure, and [`SchedulerError::WrongPhase`] elsewhere.
    pub async fn merge(&self) -> Result<MergeOutcome, OrchestratorError> {
        let (phase, predicate, verdict) = {
            let scheduler = self.scheduler.lock();
            if let Some(paths) = scheduler.pending_conflict() {
                return Err(SchedulerError::ConflictPending(paths.to_vec()).into());
            }
            (scheduler.state(), scheduler.exit_predicate(), scheduler.verdict())
        };
        match (phase, verdict) {
            (PhaseState::ParallelDevelopment, _) => {
                if !predicate.is_satisfied() {
                    return Err(OrchestratorError::Precondition(format!(
                        "parallel development not complete: {predicate:?}"
                    )));
                }
                let manifest = self.merge_generation()?;
                Ok(MergeOutcome::Bundle { manifest })
            }
            (PhaseState::Merge, Some(Verdict::Approve)) => self.integrate_approved().await,
            (PhaseState::Merge, _) => Err(OrchestratorError::Precondition(
                "changes requested; advance to open a new generation".into(),
            )),
            (actual, _) => Err(SchedulerError::WrongPhase {
                expected: PhaseState::Merge,
                actual,
            }
            .into()),
        }
    }

    /// Run one worker in a fresh workspace of the current phase
    ///
    /// A failing task is not an error: the returned task is `Failed` and the
    /// phase's exit predicate reflects it.
    ///
    /// # Errors
    /// Returns [`OrchestratorError`] when the workspace cannot be created or
    /// the outcome cannot be recorded.
    pub async fn run_task(&self, worker: Arc<dyn Worker>) -> Result<Task, OrchestratorError> {
        let role = worker.role();
        let record = self.create_workspace(role, worker.declared_outputs()).await?;
        let workspace = self.workspace(record.id)?;
        let mut task = Task::new(
            record.id,
            role,
            record.generation,
            record.snapshot,
            record.declared_outputs,
        );
        self.track(&task)?;

        let (result, record) = {
            let mut ws = workspace.lock().await;
            let result = self.runner.run(&mut task, &mut ws, worker.as_ref()).await;
            (result, ws.record())
        };
        self.persist(record.generation, StateRecord::Workspace(record))?;
        match result {
            Ok(sealed) => {
                self.on_sealed(sealed)?;
            }
            Err(err) => self.record_task_failure(&task, &err)?,
        }
        self.track(&task)?;
        Ok(task)
    }

    /// Run every producer of the current generation concurrently and wait
    /// for all of them
    ///
    /// # Errors
    /// Returns [`SchedulerError::WrongPhase`] outside parallel development,
    /// or the first participant error once every participant finished.
    pub async fn run_generation(
        self: &Arc<Self>,
        producers: &[Arc<dyn Worker>],
    ) -> Result<Vec<Task>, OrchestratorError> {
        let phase = self.phase();
        if phase != PhaseState::ParallelDevelopment {
            return Err(SchedulerError::WrongPhase {
                expected: PhaseState::ParallelDevelopment,
                actual: phase,
            }
            .into());
        }
        info!(generation = %self.generation(), participants = producers.len(), "parallel development started");

        let handles = producers.iter().map(|worker| {
            let this = Arc::clone(self);
            let worker = Arc::clone(worker);
            tokio::spawn(async move { this.run_task(worker).await })
        });
        let joined = futures::future::join_all(handles).await;

        let mut tasks = Vec::with_capacity(joined.len());
        let mut first_error = None;
        for outcome in joined {
            match outcome {
                Ok(Ok(task)) => tasks.push(task),
                Ok(Err(err)) => {
                    warn!(error = %err, "participant could not start");
                    first_error.get_or_insert(err);
                }
                Err(join) => {
                    first_error.get_or_insert(OrchestratorError::Join(join.to_string()));
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(tasks),
        }
    }

    /// Drive the whole flow: collection, then up to `max_generations` rounds
    /// of parallel development, review and merge
    ///
    /// Stops early in `Failed`; a merge conflict is returned as an error and
    /// leaves the phase blocked for a supervisor retry.
    ///
    /// # Errors
    /// Returns [`OrchestratorError`] for conflicts and for failures that are
    /// not task failures.
    pub async fn run_pipeline(
        self: &Arc<Self>,
        collector: Arc<dyn Worker>,
        producers: Vec<Arc<dyn Worker>>,
        reviewer: Arc<dyn Worker>,
    ) -> Result<PipelineReport, OrchestratorError> {
        let mut tasks = Vec::new();
        if self.phase() == PhaseState::Idle {
            self.init_phase().await?;
        }
        if self.phase() == PhaseState::Collection {
            tasks.push(self.run_task(collector).await?);
            self.advance_phase().await?;
        }

        for _ in 0..self.config.max_generations {
            if self.phase() != PhaseState::ParallelDevelopment {
                break;
            }
            tasks.extend(self.run_generation(&producers).await?);
            if self.advance_phase().await?.to != PhaseState::Review {
                break;
            }
            tasks.push(self.run_task(Arc::clone(&reviewer)).await?);
            if self.advance_phase().await?.to != PhaseState::Merge {
                break;
            }
            if self.verdict() == Some(Verdict::Approve) {
                self.merge().await?;
            }
            // Done on approval, a new generation on requested changes
            self.advance_phase().await?;
        }

        let current = self.current.lock();
        Ok(PipelineReport {
            phase: self.phase(),
            generation: self.generation(),
            tasks,
            warnings: current
                .bundle
                .as_ref()
                .map(|b| b.warnings().to_vec())
                .unwrap_or_default(),
            output: current.output.clone(),
        })
    }

    fn workspace(&self, id: WorkspaceId) -> Result<Arc<tokio::sync::Mutex<Workspace>>, OrchestratorError> {
        self.workspaces
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(OrchestratorError::WorkspaceNotFound(id))
    }

    fn snapshot_for(&self, phase: PhaseState) -> Result<Vec<Artifact>, OrchestratorError> {
        let current = self.current.lock();
        match phase {
            PhaseState::ParallelDevelopment => current
                .document_package
                .clone()
                .map(|package| vec![package])
                .ok_or_else(|| OrchestratorError::Precondition("no sealed document package".into())),
            PhaseState::Review => current
                .bundle
                .as_ref()
                .map(MergedBundle::snapshot)
                .ok_or_else(|| OrchestratorError::Precondition("no merged bundle to review".into())),
            _ => Ok(Vec::new()),
        }
    }

    fn on_sealed(&self, sealed: SealedWorkspace) -> Result<Vec<ArtifactRef>, OrchestratorError> {
        let id = sealed.id();
        let refs: Vec<ArtifactRef> = sealed.artifacts().iter().map(Artifact::to_ref).collect();
        let generation = self.generation();
        if sealed.generation() != generation {
            // superseded while running; roll-back discards it
            warn!(workspace_id = %id, sealed_in = %sealed.generation(), %generation, "stale seal ignored");
            return Ok(refs);
        }
        for artifact in &refs {
            self.persist(sealed.generation(), StateRecord::Artifact(artifact.clone()))?;
        }

        let phase = {
            let mut scheduler = self.scheduler.lock();
            scheduler.record_sealed(id, refs.clone())?;
            scheduler.state()
        };
        match phase {
            PhaseState::Collection => {
                if let Some(package) = sealed.artifacts_of(ArtifactKind::DocumentPackage).next() {
                    info!(workspace_id = %id, hash = %package.hash().short(), "document package sealed");
                    self.current.lock().document_package = Some(package.clone());
                }
            }
            PhaseState::ParallelDevelopment => {
                let mut current = self.current.lock();
                current.sealed.insert(id, sealed);
                current.bundle = None;
            }
            PhaseState::Review => {
                if let Some(report) = sealed.artifacts_of(ArtifactKind::ReviewReport).next() {
                    let parsed = ReviewReport::from_blob(report.blob()).map_err(|e| {
                        OrchestratorError::Precondition(format!("review report unreadable: {e}"))
                    })?;
                    self.scheduler.lock().record_verdict(parsed.verdict)?;
                    info!(workspace_id = %id, verdict = ?parsed.verdict, findings = parsed.findings.len(), "review recorded");
                    self.current.lock().review = Some((id, report.clone()));
                }
            }
            _ => {}
        }
        Ok(refs)
    }

    fn merge_generation(&self) -> Result<BundleManifest, OrchestratorError> {
        let (sealed, documents): (Vec<SealedWorkspace>, Option<Artifact>) = {
            let current = self.current.lock();
            (
                current.sealed.values().cloned().collect(),
                current.document_package.clone(),
            )
        };
        match self.merger.merge(&sealed, documents.as_ref()) {
            Ok(bundle) => {
                let manifest = bundle.manifest();
                self.current.lock().bundle = Some(bundle);
                Ok(manifest)
            }
            Err(MergeError::Conflict(report)) => {
                self.scheduler.lock().record_conflict(report.paths.clone())?;
                Err(MergeError::Conflict(report).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn integrate_approved(&self) -> Result<MergeOutcome, OrchestratorError> {
        let (bundle, review) = {
            let current = self.current.lock();
            let bundle = current
                .bundle
                .clone()
                .ok_or_else(|| OrchestratorError::Precondition("no merged bundle".into()))?;
            (bundle, current.review.clone())
        };
        let output = integrate(
            &bundle,
            review.as_ref().map(|(_, artifact)| artifact),
            &self.config.output_dir,
        )
        .await?;

        let sources = bundle
            .sources()
            .iter()
            .map(|s| s.workspace_id)
            .chain(review.map(|(id, _)| id));
        for id in sources {
            let workspace = self.workspace(id)?;
            let mut ws = workspace.lock().await;
            if ws.status() == WorkspaceStatus::Sealed {
                ws.mark_merged().map_err(WorkspaceError::from)?;
                let record = ws.record();
                drop(ws);
                self.persist(record.generation, StateRecord::Workspace(record))?;
            }
        }

        self.scheduler.lock().record_integrated()?;
        self.current.lock().output = Some(output.root.clone());
        Ok(MergeOutcome::Integrated {
            root: output.root,
            manifest: output.manifest,
        })
    }

    async fn after_advance(&self, advance: &Advance) -> Result<(), OrchestratorError> {
        if !advance.changed {
            return Ok(());
        }
        self.persist(advance.generation, StateRecord::from(advance))?;

        let previous = {
            let mut current = self.current.lock();
            if current.generation == advance.generation {
                return Ok(());
            }
            let package = if advance.to == PhaseState::Collection {
                None
            } else {
                current.document_package.take()
            };
            let previous = current.generation;
            *current = GenerationState {
                generation: advance.generation,
                document_package: package,
                ..GenerationState::default()
            };
            previous
        };
        if previous != Generation::default() {
            self.roll_back(previous, advance.to == PhaseState::Collection).await?;
        }
        Ok(())
    }

    /// Discard unmerged workspaces of a superseded generation
    async fn roll_back(&self, generation: Generation, recollect: bool) -> Result<(), OrchestratorError> {
        let stale: Vec<Arc<tokio::sync::Mutex<Workspace>>> = self
            .workspaces
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for workspace in stale {
            let mut ws = workspace.lock().await;
            let keep = ws.generation() > generation
                || matches!(ws.status(), WorkspaceStatus::Merged | WorkspaceStatus::Discarded)
                || (ws.role() == Role::Collector && !recollect);
            if keep {
                continue;
            }
            ws.discard().await?;
            let record = ws.record();
            drop(ws);
            self.persist(record.generation, StateRecord::Workspace(record))?;
        }
        Ok(())
    }

    /// Discard an active workspace whose request was denied and fail its
    /// participant; other errors pass through untouched
    async fn abort_on_denial(
        &self,
        mut ws: tokio::sync::MutexGuard<'_, Workspace>,
        err: WorkspaceError,
    ) -> OrchestratorError {
        if !err.is_capability_violation() || ws.status() != WorkspaceStatus::Active {
            return err.into();
        }
        let id = ws.id();
        warn!(workspace_id = %id, role = %ws.role(), error = %err, "isolation violation, participant aborted");
        if let Err(discard) = ws.discard().await {
            warn!(workspace_id = %id, error = %discard, "discard after denial failed");
        }
        let record = ws.record();
        drop(ws);

        self.current.lock().sealed.remove(&id);
        let recorded = self
            .persist(record.generation, StateRecord::Workspace(record))
            .and_then(|()| self.record_failure(id, err.to_string()));
        if let Err(follow_up) = recorded {
            warn!(workspace_id = %id, error = %follow_up, "recording aborted participant failed");
        }
        err.into()
    }

    fn record_failure(&self, id: WorkspaceId, reason: String) -> Result<(), OrchestratorError> {
        let failed = self.scheduler.lock().record_failed(id, reason);
        match failed {
            Ok(()) | Err(SchedulerError::UnknownWorkspace(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn record_task_failure(&self, task: &Task, err: &TaskError) -> Result<(), OrchestratorError> {
        if err.is_isolation_violation() {
            warn!(task_id = %task.id, role = %task.role, error = %err, "isolation violation");
        }
        self.record_failure(task.workspace_id, err.to_string())
    }

    fn track(&self, task: &Task) -> Result<(), OrchestratorError> {
        self.persist(task.generation, StateRecord::Task(task.clone()))?;
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn persist(&self, generation: Generation, record: StateRecord) -> Result<(), OrchestratorError> {
        self.store.append(generation, record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloister_artifact::DocumentPackage;
    use tempfile::TempDir;

    const PACKAGE: &str = "documents/package.json";
    const IMPLEMENTATION: &str = "implementation/eligibility.param";

    fn orchestrator(dir: &TempDir) -> Orchestrator {
        let config = OrchestratorConfig::new().with_root(dir.path());
        Orchestrator::with_table(config, CapabilityTable::default()).unwrap()
    }

    async fn collect(o: &Orchestrator) {
        o.init_phase().await.unwrap();
        let collector = o
            .create_workspace(Role::Collector, vec![PACKAGE.parse().unwrap()])
            .await
            .unwrap();
        let package = DocumentPackage::new()
            .with_document("statute.md", "Households below 1200 per month qualify.")
            .to_blob()
            .unwrap();
        o.write_file(collector.id, PACKAGE, &package).await.unwrap();
        o.seal_workspace(collector.id).await.unwrap();
        assert_eq!(o.advance_phase().await.unwrap().to, PhaseState::ParallelDevelopment);
    }

    #[tokio::test]
    async fn seal_from_superseded_generation_is_ignored() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir);
        collect(&o).await;

        let a = o
            .create_workspace(Role::IsolatedProducerA, Vec::new())
            .await
            .unwrap();
        let b = o
            .create_workspace(Role::IsolatedProducerB, vec![IMPLEMENTATION.parse().unwrap()])
            .await
            .unwrap();
        assert!(o.read_file(a.id, IMPLEMENTATION).await.is_err());
        o.write_file(b.id, IMPLEMENTATION, b"threshold = 1200\n").await.unwrap();
        o.seal_workspace(b.id).await.unwrap();
        assert_eq!(o.advance_phase().await.unwrap().to, PhaseState::Failed);
        let retry = o.retry_phase(Role::Supervisor).await.unwrap();
        assert_eq!(retry.generation, Generation(2));

        // a generation-1 participant that only finishes now
        let mut late = Workspace::create(
            &o.allocator,
            Arc::clone(&o.guard),
            Role::IsolatedProducerB,
            Generation::FIRST,
            &[],
            &[IMPLEMENTATION.parse().unwrap()],
        )
        .await
        .unwrap();
        late.write(IMPLEMENTATION, b"threshold = 1250\n").await.unwrap();
        let sealed = late.seal().await.unwrap();

        let refs = o.on_sealed(sealed).unwrap();
        assert_eq!(refs.len(), 1);
        assert!(o.current.lock().sealed.is_empty());
        assert!(o.phase_status().participants.is_empty());
        assert_eq!(o.phase(), PhaseState::ParallelDevelopment);
    }

    #[tokio::test]
    async fn late_participant_invalidates_bundle() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir);
        collect(&o).await;

        for (role, path) in [
            (Role::IsolatedProducerA, "tests/eligibility.yaml"),
            (Role::IsolatedProducerB, IMPLEMENTATION),
        ] {
            let record = o.create_workspace(role, vec![path.parse().unwrap()]).await.unwrap();
            o.write_file(record.id, path, b"threshold: 1200\n").await.unwrap();
            o.seal_workspace(record.id).await.unwrap();
        }
        o.merge().await.unwrap();
        assert!(o.bundle_manifest().is_some());

        o.create_workspace(Role::IsolatedProducerB, Vec::new())
            .await
            .unwrap();
        assert!(o.bundle_manifest().is_none());
    }
}
