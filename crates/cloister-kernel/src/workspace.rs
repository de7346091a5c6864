//! Workspace lifecycle
//!
//! A [`Workspace`] is an isolated directory owned by exactly one role. It is
//! created `Active` with a snapshot of the artifacts its role may read, accepts
//! guarded reads and writes, and is either sealed into immutable artifacts or
//! discarded:
//!
//! ```text
//! Active ──seal──▶ Sealed ──merge──▶ Merged
//!    │                │
//!    └───discard──────┴──▶ Discarded
//! ```
//!
//! [`SealedWorkspace`] can only be obtained from [`Workspace::seal`], so code
//! that accepts it can rely on the outputs being frozen.

use crate::error::{
    CapabilityError, DenialReason, IncompleteArtifactError, StorageError, TransitionError,
    WorkspaceError,
};
use crate::guard::AccessGuard;
use crate::state_machine::validate_workspace_transition;
use crate::types::{Action, Generation, Role, WorkspaceStatus};
use crate::capability::CapabilitySet;
use chrono::{DateTime, Utc};
use cloister_artifact::{
    Artifact, ArtifactKind, ArtifactRef, DocumentPackage, LogicalPath, ReviewReport, WorkspaceId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Hands out isolated roots under a base directory
#[derive(Debug, Clone)]
pub struct WorkspaceAllocator {
    base: PathBuf,
}

impl WorkspaceAllocator {
    /// Create new allocator rooted at `base`
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Base directory
    #[inline]
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// `base/generation-N/<role>-<id>`
    #[must_use]
    pub fn root_for(&self, generation: Generation, role: Role, id: WorkspaceId) -> PathBuf {
        self.base
            .join(format!("generation-{generation}"))
            .join(format!("{role}-{id}"))
    }
}

/// Serializable view of a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    /// Identifier
    pub id: WorkspaceId,
    /// Owning role
    pub role: Role,
    /// Generation it was created in
    pub generation: Generation,
    /// Filesystem root
    pub root: PathBuf,
    /// Lifecycle status
    pub status: WorkspaceStatus,
    /// Outputs that must exist at seal time
    pub declared_outputs: Vec<LogicalPath>,
    /// Artifacts copied in at creation
    pub snapshot: Vec<ArtifactRef>,
    /// Artifacts produced at seal time
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
}

/// Isolated, role-owned sandbox
#[derive(Debug)]
pub struct Workspace {
    id: WorkspaceId,
    role: Role,
    generation: Generation,
    root: PathBuf,
    status: WorkspaceStatus,
    guard: Arc<AccessGuard>,
    snapshot: Vec<ArtifactRef>,
    declared: BTreeSet<LogicalPath>,
    written: BTreeSet<LogicalPath>,
    artifacts: Vec<ArtifactRef>,
    created_at: DateTime<Utc>,
}

impl Workspace {
    /// Allocate a root and copy in the snapshot
    ///
    /// Every snapshot artifact must be readable by `role` and every declared
    /// output writable, otherwise nothing is created.
    ///
    /// # Errors
    /// Returns [`WorkspaceError::Capability`] for an artifact outside the
    /// role's allow-list, or [`WorkspaceError::Storage`] on I/O failure.
    pub async fn create(
        allocator: &WorkspaceAllocator,
        guard: Arc<AccessGuard>,
        role: Role,
        generation: Generation,
        snapshot: &[Artifact],
        declared_outputs: &[LogicalPath],
    ) -> Result<Self, WorkspaceError> {
        let id = WorkspaceId::new();
        let capabilities = guard.table().set(role);

        for artifact in snapshot {
            let namespace = artifact.kind().namespace();
            let path = artifact.path().as_string();
            if !capabilities.grants(namespace, Action::Read) {
                return Err(guard
                    .deny(
                        id,
                        role,
                        &path,
                        Action::Read,
                        DenialReason::KindNotReadable {
                            kind: artifact.kind(),
                        },
                    )
                    .into());
            }
            guard.authorize(id, role, &path, Action::Read)?;
        }
        for output in declared_outputs {
            guard.authorize(id, role, &output.as_string(), Action::Write)?;
        }

        let root = allocator.root_for(generation, role, id);
        create_dir(&root).await?;
        for artifact in snapshot {
            write_file(&artifact.path().to_fs_path(&root), artifact.blob()).await?;
        }

        let workspace = Self {
            id,
            role,
            generation,
            root,
            status: WorkspaceStatus::Active,
            guard,
            snapshot: snapshot.iter().map(Artifact::to_ref).collect(),
            declared: declared_outputs.iter().cloned().collect(),
            written: BTreeSet::new(),
            artifacts: Vec::new(),
            created_at: Utc::now(),
        };
        workspace
            .guard
            .audit()
            .record_lifecycle(id, role, None, WorkspaceStatus::Active);
        info!(
            workspace_id = %id,
            %role,
            %generation,
            root = %workspace.root.display(),
            snapshot = snapshot.len(),
            "workspace created"
        );
        Ok(workspace)
    }

    /// Identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> WorkspaceId {
        self.id
    }

    /// Owning role
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Generation the workspace belongs to
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Filesystem root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lifecycle status
    #[inline]
    #[must_use]
    pub fn status(&self) -> WorkspaceStatus {
        self.status
    }

    /// Creation time
    #[inline]
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Allow and deny rules of the owning role
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        self.guard.table().set(self.role)
    }

    /// Outputs that must exist at seal time
    pub fn declared_outputs(&self) -> impl Iterator<Item = &LogicalPath> {
        self.declared.iter()
    }

    /// Paths written so far
    pub fn written(&self) -> impl Iterator<Item = &LogicalPath> {
        self.written.iter()
    }

    /// Snapshot and written paths, sorted
    #[must_use]
    pub fn list(&self) -> Vec<LogicalPath> {
        let mut paths: BTreeSet<LogicalPath> =
            self.snapshot.iter().map(|a| a.path.clone()).collect();
        paths.extend(self.written.iter().cloned());
        paths.into_iter().collect()
    }

    /// Serializable view
    #[must_use]
    pub fn record(&self) -> WorkspaceRecord {
        WorkspaceRecord {
            id: self.id,
            role: self.role,
            generation: self.generation,
            root: self.root.clone(),
            status: self.status,
            declared_outputs: self.declared.iter().cloned().collect(),
            snapshot: self.snapshot.clone(),
            artifacts: self.artifacts.clone(),
        }
    }

    /// Guarded read
    ///
    /// # Errors
    /// Returns [`WorkspaceError::Capability`] when denied (including reads on
    /// a discarded workspace) or [`WorkspaceError::Storage`] when the file is
    /// missing.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>, WorkspaceError> {
        if matches!(self.status, WorkspaceStatus::Discarded | WorkspaceStatus::Merged) {
            return Err(self.deny_inactive(path, Action::Read).into());
        }
        let grant = self.guard.authorize(self.id, self.role, path, Action::Read)?;
        let fs_path = grant.path.to_fs_path(&self.root);
        tokio::fs::read(&fs_path)
            .await
            .map_err(|e| StorageError::new(&fs_path, e).into())
    }

    /// Guarded write; only `Active` workspaces accept writes
    ///
    /// # Errors
    /// Returns [`WorkspaceError::Capability`] when denied or
    /// [`WorkspaceError::Storage`] on I/O failure.
    pub async fn write(&mut self, path: &str, contents: &[u8]) -> Result<(), WorkspaceError> {
        if self.status != WorkspaceStatus::Active {
            return Err(self.deny_inactive(path, Action::Write).into());
        }
        let grant = self.guard.authorize(self.id, self.role, path, Action::Write)?;
        write_file(&grant.path.to_fs_path(&self.root), contents).await?;
        debug!(workspace_id = %self.id, path = %grant.path, bytes = contents.len(), "file written");
        self.written.insert(grant.path);
        Ok(())
    }

    /// Freeze declared outputs into artifacts; `Active` → `Sealed`
    ///
    /// Each artifact's kind is the namespace of the allow rule that grants
    /// the owning role write access to it.
    ///
    /// # Errors
    /// Returns [`WorkspaceError::Incomplete`] when a declared output was never
    /// written, [`WorkspaceError::Capability`] when one fails the guard,
    /// [`WorkspaceError::Payload`] when a document package or review report
    /// does not decode, and [`WorkspaceError::Transition`] when not `Active`.
    pub async fn seal(&mut self) -> Result<SealedWorkspace, WorkspaceError> {
        validate_workspace_transition(self.status, WorkspaceStatus::Sealed)?;

        let missing: Vec<LogicalPath> = self.declared.difference(&self.written).cloned().collect();
        if !missing.is_empty() {
            return Err(IncompleteArtifactError {
                workspace_id: self.id,
                missing,
            }
            .into());
        }

        let mut artifacts = Vec::with_capacity(self.declared.len());
        for path in &self.declared {
            let grant =
                self.guard
                    .authorize(self.id, self.role, &path.as_string(), Action::Write)?;
            let fs_path = path.to_fs_path(&self.root);
            let bytes = tokio::fs::read(&fs_path)
                .await
                .map_err(|e| StorageError::new(&fs_path, e))?;
            let kind = grant.namespace.artifact_kind();
            let artifact = Artifact::new(kind, path.clone(), self.id, bytes);
            artifacts.push(decode_payload(artifact)?);
        }

        self.transition(WorkspaceStatus::Sealed)?;
        self.artifacts = artifacts.iter().map(Artifact::to_ref).collect();
        info!(
            workspace_id = %self.id,
            role = %self.role,
            artifacts = artifacts.len(),
            "workspace sealed"
        );
        Ok(SealedWorkspace {
            id: self.id,
            role: self.role,
            generation: self.generation,
            root: self.root.clone(),
            artifacts,
            sealed_at: Utc::now(),
        })
    }

    /// `Sealed` → `Merged`
    ///
    /// # Errors
    /// Returns [`TransitionError`] unless the workspace is sealed.
    pub fn mark_merged(&mut self) -> Result<(), TransitionError> {
        self.transition(WorkspaceStatus::Merged)
    }

    /// Any non-merged state → `Discarded`; removes the root directory
    ///
    /// # Errors
    /// Returns [`WorkspaceError::Transition`] for merged or already discarded
    /// workspaces, or [`WorkspaceError::Storage`] when removal fails.
    pub async fn discard(&mut self) -> Result<(), WorkspaceError> {
        validate_workspace_transition(self.status, WorkspaceStatus::Discarded)?;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::new(&self.root, e).into()),
        }
        self.transition(WorkspaceStatus::Discarded)?;
        info!(workspace_id = %self.id, role = %self.role, "workspace discarded");
        Ok(())
    }

    fn transition(&mut self, to: WorkspaceStatus) -> Result<(), TransitionError> {
        validate_workspace_transition(self.status, to)?;
        self.guard
            .audit()
            .record_lifecycle(self.id, self.role, Some(self.status), to);
        self.status = to;
        Ok(())
    }

    fn deny_inactive(&self, path: &str, action: Action) -> CapabilityError {
        self.guard
            .deny_inactive(self.id, self.role, path, action, self.status)
    }
}

fn decode_payload(artifact: Artifact) -> Result<Artifact, WorkspaceError> {
    let invalid = |source| WorkspaceError::Payload {
        path: artifact.path().clone(),
        source,
    };
    match artifact.kind() {
        ArtifactKind::DocumentPackage => {
            let package = DocumentPackage::from_blob(artifact.blob()).map_err(invalid)?;
            Ok(artifact.with_manifest(package.manifest()))
        }
        ArtifactKind::ReviewReport => {
            ReviewReport::from_blob(artifact.blob()).map_err(invalid)?;
            Ok(artifact)
        }
        ArtifactKind::TestSuite | ArtifactKind::Implementation => Ok(artifact),
    }
}

async fn create_dir(path: &Path) -> Result<(), StorageError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| StorageError::new(path, e))
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        create_dir(parent).await?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| StorageError::new(path, e))
}

/// Workspace whose outputs are frozen
///
/// Only [`Workspace::seal`] constructs this type.
#[derive(Debug, Clone)]
pub struct SealedWorkspace {
    id: WorkspaceId,
    role: Role,
    generation: Generation,
    root: PathBuf,
    artifacts: Vec<Artifact>,
    sealed_at: DateTime<Utc>,
}

impl SealedWorkspace {
    /// Identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> WorkspaceId {
        self.id
    }

    /// Owning role
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Generation the workspace belongs to
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Former filesystem root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Frozen outputs
    #[inline]
    #[must_use]
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Seal time
    #[inline]
    #[must_use]
    pub fn sealed_at(&self) -> DateTime<Utc> {
        self.sealed_at
    }

    /// Outputs of one kind
    pub fn artifacts_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.kind() == kind)
    }
}
