//! Merged bundle handed to the reviewer

use crate::breach::BreachWarning;
use cloister_artifact::{Artifact, ArtifactKind, ArtifactRef, ContentHash, LogicalPath, WorkspaceId};
use cloister_kernel::{Generation, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Workspace that contributed to a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSource {
    /// Sealed workspace
    pub workspace_id: WorkspaceId,
    /// Its role
    pub role: Role,
    /// Number of artifacts contributed
    pub artifacts: usize,
}

/// One line of a bundle manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    /// Logical path
    pub path: LogicalPath,
    /// Artifact kind
    pub kind: ArtifactKind,
    /// Content hash
    pub hash: ContentHash,
    /// Producing workspace
    pub producer: WorkspaceId,
    /// Size in bytes
    pub size: usize,
}

impl BundleEntry {
    fn of(artifact: &Artifact) -> Self {
        Self {
            path: artifact.path().clone(),
            kind: artifact.kind(),
            hash: artifact.hash(),
            producer: artifact.producer(),
            size: artifact.blob().len(),
        }
    }
}

/// Serializable description of a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Generation merged
    pub generation: Generation,
    /// Contributing workspaces
    pub sources: Vec<BundleSource>,
    /// Document package the producers worked from
    pub document_package: Option<BundleEntry>,
    /// Merged outputs in path order
    pub entries: Vec<BundleEntry>,
    /// Review report, once integrated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<BundleEntry>,
    /// Non-fatal findings
    #[serde(default)]
    pub warnings: Vec<BreachWarning>,
}

/// Disjoint union of one generation's sealed outputs
#[derive(Debug, Clone)]
pub struct MergedBundle {
    generation: Generation,
    artifacts: BTreeMap<LogicalPath, Artifact>,
    document_package: Option<Artifact>,
    sources: Vec<BundleSource>,
    warnings: Vec<BreachWarning>,
}

impl MergedBundle {
    pub(crate) fn new(
        generation: Generation,
        artifacts: BTreeMap<LogicalPath, Artifact>,
        document_package: Option<Artifact>,
        sources: Vec<BundleSource>,
    ) -> Self {
        Self {
            generation,
            artifacts,
            document_package,
            sources,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn attach_warning(&mut self, warning: BreachWarning) {
        self.warnings.push(warning);
    }

    /// Generation merged
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Merged outputs keyed by path
    #[inline]
    #[must_use]
    pub fn artifacts(&self) -> &BTreeMap<LogicalPath, Artifact> {
        &self.artifacts
    }

    /// Merged output paths, sorted
    pub fn paths(&self) -> impl Iterator<Item = &LogicalPath> {
        self.artifacts.keys()
    }

    /// Outputs of one kind
    pub fn artifacts_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values().filter(move |a| a.kind() == kind)
    }

    /// Document package carried into the bundle
    #[inline]
    #[must_use]
    pub fn document_package(&self) -> Option<&Artifact> {
        self.document_package.as_ref()
    }

    /// Contributing workspaces
    #[inline]
    #[must_use]
    pub fn sources(&self) -> &[BundleSource] {
        &self.sources
    }

    /// Breach warnings
    #[inline]
    #[must_use]
    pub fn warnings(&self) -> &[BreachWarning] {
        &self.warnings
    }

    /// Whether nothing suspicious was found
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Snapshot for the review workspace: the document package followed by
    /// every merged output
    #[must_use]
    pub fn snapshot(&self) -> Vec<Artifact> {
        self.document_package
            .iter()
            .chain(self.artifacts.values())
            .cloned()
            .collect()
    }

    /// References to every merged output
    #[must_use]
    pub fn refs(&self) -> Vec<ArtifactRef> {
        self.artifacts.values().map(Artifact::to_ref).collect()
    }

    /// Serializable description
    #[must_use]
    pub fn manifest(&self) -> BundleManifest {
        BundleManifest {
            generation: self.generation,
            sources: self.sources.clone(),
            document_package: self.document_package.as_ref().map(BundleEntry::of),
            entries: self.artifacts.values().map(BundleEntry::of).collect(),
            review: None,
            warnings: self.warnings.clone(),
        }
    }

    pub(crate) fn entry(artifact: &Artifact) -> BundleEntry {
        BundleEntry::of(artifact)
    }
}
