//! Merge coordinator
//!
//! Reconciles the sealed workspaces of one generation into a
//! [`MergedBundle`]. Only [`SealedWorkspace`] values are accepted, so nothing
//! here can observe an unfinished workspace.

use crate::breach::{BreachDetector, BreachHeuristicConfig};
use crate::bundle::{BundleSource, MergedBundle};
use crate::conflict::{self, Claim, ConflictReport};
use cloister_artifact::{Artifact, ArtifactKind, DocumentPackage, LogicalPath};
use cloister_kernel::{Generation, SealedWorkspace, StorageError};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Errors raised while merging or integrating
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Overlapping outputs
    #[error(transparent)]
    Conflict(#[from] ConflictReport),

    /// Inputs belong to different generations
    #[error("cannot merge generation {found} into generation {expected}")]
    MixedGeneration {
        /// Generation of the first workspace
        expected: Generation,
        /// Offending generation
        found: Generation,
    },

    /// No sealed workspaces given
    #[error("nothing to merge")]
    Empty,

    /// Document package does not decode
    #[error("document package {path} is unreadable: {message}")]
    DocumentPackage {
        /// Package path
        path: LogicalPath,
        /// Decode error
        message: String,
    },

    /// Canonical output could not be written
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl MergeError {
    /// Whether this is an overlap that needs manual resolution
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, MergeError::Conflict(_))
    }
}

/// Builds merged bundles from sealed workspaces
#[derive(Debug, Clone, Default)]
pub struct MergeCoordinator {
    breach: BreachDetector,
}

impl MergeCoordinator {
    /// Create new coordinator with the given breach thresholds
    #[must_use]
    pub fn new(breach: BreachHeuristicConfig) -> Self {
        Self {
            breach: BreachDetector::new(breach),
        }
    }

    /// Breach detector in use
    #[inline]
    #[must_use]
    pub fn breach_detector(&self) -> &BreachDetector {
        &self.breach
    }

    /// Disjoint union of `sealed`, or a report naming every overlap
    ///
    /// `documents` is the package the producers started from; it is carried
    /// into the bundle and used to discount derivable values in the breach
    /// check.
    ///
    /// # Errors
    /// Returns [`MergeError::Conflict`] for overlapping outputs,
    /// [`MergeError::MixedGeneration`] or [`MergeError::Empty`] for bad input,
    /// and [`MergeError::DocumentPackage`] if `documents` does not decode.
    pub fn merge(
        &self,
        sealed: &[SealedWorkspace],
        documents: Option<&Artifact>,
    ) -> Result<MergedBundle, MergeError> {
        let generation = sealed.first().ok_or(MergeError::Empty)?.generation();
        if let Some(other) = sealed.iter().find(|w| w.generation() != generation) {
            return Err(MergeError::MixedGeneration {
                expected: generation,
                found: other.generation(),
            });
        }

        let claims: Vec<Claim<'_>> = sealed
            .iter()
            .flat_map(|w| {
                w.artifacts().iter().map(move |a| Claim {
                    workspace_id: w.id(),
                    role: w.role(),
                    path: a.path(),
                })
            })
            .collect();
        if let Some(report) = conflict::report(generation, &claims) {
            warn!(
                %generation,
                conflicts = report.conflicts.len(),
                paths = ?report.paths,
                "merge conflict"
            );
            return Err(report.into());
        }

        let artifacts: BTreeMap<LogicalPath, Artifact> = sealed
            .iter()
            .flat_map(|w| w.artifacts().iter())
            .map(|a| (a.path().clone(), a.clone()))
            .collect();
        let sources = sealed
            .iter()
            .map(|w| BundleSource {
                workspace_id: w.id(),
                role: w.role(),
                artifacts: w.artifacts().len(),
            })
            .collect();
        let mut bundle = MergedBundle::new(generation, artifacts, documents.cloned(), sources);

        let package = documents
            .map(|a| {
                DocumentPackage::from_blob(a.blob()).map_err(|e| MergeError::DocumentPackage {
                    path: a.path().clone(),
                    message: e.to_string(),
                })
            })
            .transpose()?;
        let tests: Vec<&Artifact> = bundle.artifacts_of(ArtifactKind::TestSuite).collect();
        let implementations: Vec<&Artifact> =
            bundle.artifacts_of(ArtifactKind::Implementation).collect();
        if let Some(warning) = self.breach.inspect(&tests, &implementations, package.as_ref()) {
            warn!(%generation, matched = ?warning.matched, ratio = warning.ratio, "suspected isolation breach");
            bundle.attach_warning(warning);
        }

        info!(
            %generation,
            workspaces = sealed.len(),
            artifacts = bundle.artifacts().len(),
            warnings = bundle.warnings().len(),
            "workspaces merged"
        );
        Ok(bundle)
    }
}
