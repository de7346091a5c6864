//! Canonical output of an approved bundle
//!
//! Layout:
//!
//! ```text
//! output_dir/generation-N/
//!   manifest.json
//!   documents/...        document package
//!   tests/...            merged outputs at their logical paths
//!   implementation/...
//!   review/...           review report
//! ```

use crate::bundle::{BundleManifest, MergedBundle};
use crate::coordinator::MergeError;
use cloister_artifact::Artifact;
use cloister_kernel::StorageError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the manifest written next to the outputs
pub const MANIFEST_FILE: &str = "manifest.json";

/// Where an approved bundle was written
#[derive(Debug, Clone)]
pub struct CanonicalOutput {
    /// `output_dir/generation-N`
    pub root: PathBuf,
    /// Manifest as written
    pub manifest: BundleManifest,
}

/// Write `bundle` (and the review report that approved it) under `output_dir`
///
/// An existing directory for the same generation is replaced.
///
/// # Errors
/// Returns [`MergeError::Storage`] on I/O failure.
pub async fn integrate(
    bundle: &MergedBundle,
    review: Option<&Artifact>,
    output_dir: &Path,
) -> Result<CanonicalOutput, MergeError> {
    let root = output_dir.join(format!("generation-{}", bundle.generation()));
    match tokio::fs::remove_dir_all(&root).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(StorageError::new(&root, e).into()),
    }

    let written = bundle
        .document_package()
        .into_iter()
        .chain(bundle.artifacts().values())
        .chain(review);
    for artifact in written {
        write(&artifact.path().to_fs_path(&root), artifact.blob()).await?;
    }

    let mut manifest = bundle.manifest();
    manifest.review = review.map(MergedBundle::entry);
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| StorageError::new(root.join(MANIFEST_FILE), e.into()))?;
    write(&root.join(MANIFEST_FILE), &json).await?;

    info!(
        generation = %bundle.generation(),
        root = %root.display(),
        artifacts = manifest.entries.len(),
        "canonical output written"
    );
    Ok(CanonicalOutput { root, manifest })
}

async fn write(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::new(parent, e))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| StorageError::new(path, e))
}
