//! Immutable artifacts
//!
//! An [`Artifact`] is a named blob plus a logical kind, produced by exactly one
//! workspace when it is sealed. Nothing downstream can mutate it: the blob is
//! shared behind an `Arc<[u8]>` and the content hash is fixed at construction.

use crate::hash::ContentHash;
use crate::kind::ArtifactKind;
use crate::package::ManifestEntry;
use crate::path::LogicalPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use ulid::Ulid;

/// Unique artifact identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub Ulid);

impl ArtifactId {
    /// Generate a new identifier
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique workspace identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub Ulid);

impl WorkspaceId {
    /// Generate a new identifier
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkspaceId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Immutable named blob with a logical kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    id: ArtifactId,
    kind: ArtifactKind,
    path: LogicalPath,
    producer: WorkspaceId,
    hash: ContentHash,
    manifest: Vec<ManifestEntry>,
    blob: Arc<[u8]>,
}

impl Artifact {
    /// Create an artifact; the content hash is computed here and never again
    #[must_use]
    pub fn new(
        kind: ArtifactKind,
        path: LogicalPath,
        producer: WorkspaceId,
        blob: impl Into<Arc<[u8]>>,
    ) -> Self {
        let blob = blob.into();
        Self {
            id: ArtifactId::new(),
            kind,
            path,
            producer,
            hash: ContentHash::compute(&blob),
            manifest: Vec::new(),
            blob,
        }
    }

    /// Attach the manifest of contained documents
    #[must_use]
    pub fn with_manifest(mut self, manifest: Vec<ManifestEntry>) -> Self {
        self.manifest = manifest;
        self
    }

    /// Identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> ArtifactId {
        self.id
    }

    /// Logical kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Name of the artifact inside its workspace
    #[inline]
    #[must_use]
    pub fn path(&self) -> &LogicalPath {
        &self.path
    }

    /// Workspace that produced this artifact
    #[inline]
    #[must_use]
    pub fn producer(&self) -> WorkspaceId {
        self.producer
    }

    /// Content hash
    #[inline]
    #[must_use]
    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    /// Contained documents, empty unless this is a document package
    #[inline]
    #[must_use]
    pub fn manifest(&self) -> &[ManifestEntry] {
        &self.manifest
    }

    /// Raw bytes
    #[inline]
    #[must_use]
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Blob interpreted as UTF-8, lossily
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.blob).into_owned()
    }

    /// Recompute the hash and compare
    #[must_use]
    pub fn verify(&self) -> bool {
        ContentHash::compute(&self.blob) == self.hash
    }

    /// Lightweight reference for records and snapshots
    #[must_use]
    pub fn to_ref(&self) -> ArtifactRef {
        ArtifactRef {
            id: self.id,
            kind: self.kind,
            path: self.path.clone(),
            hash: self.hash,
            producer: self.producer,
        }
    }
}

/// Reference to an artifact without its bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Artifact identifier
    pub id: ArtifactId,
    /// Logical kind
    pub kind: ArtifactKind,
    /// Name inside the producing workspace
    pub path: LogicalPath,
    /// Content hash
    pub hash: ContentHash,
    /// Producing workspace
    pub producer: WorkspaceId,
}
