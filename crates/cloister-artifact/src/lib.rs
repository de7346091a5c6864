//! Cloister Artifact System
//!
//! Immutable, content-addressed artifacts exchanged between isolated
//! workspaces.
//!
//! # Core Concepts
//!
//! - [`Artifact`]: immutable named blob with an [`ArtifactKind`]
//! - [`LogicalPath`]: relative workspace path that cannot escape its root
//! - [`Namespace`]: logical region (`documents`, `tests`, `implementation`, `review`)
//! - [`ContentHash`]: 32-byte Blake3 digest
//! - [`DocumentPackage`] / [`ReviewReport`]: the two payloads the orchestrator interprets
//!
//! # Example
//!
//! ```rust
//! use cloister_artifact::{Artifact, ArtifactKind, DocumentPackage, WorkspaceId};
//!
//! let package = DocumentPackage::new().with_document("statute.md", "limit 1200");
//! let artifact = Artifact::new(
//!     ArtifactKind::DocumentPackage,
//!     "documents/package.json".parse().unwrap(),
//!     WorkspaceId::new(),
//!     package.to_blob().unwrap(),
//! )
//! .with_manifest(package.manifest());
//!
//! assert!(artifact.verify());
//! assert_eq!(artifact.manifest().len(), 1);
//! ```

#![warn(unreachable_pub)]

mod artifact;
mod hash;
mod kind;
mod package;
mod path;

pub use artifact::{Artifact, ArtifactId, ArtifactRef, WorkspaceId};
pub use hash::{ContentHash, HashError};
pub use kind::{ArtifactKind, Namespace};
pub use package::{DocumentPackage, ManifestEntry, PayloadError, ReviewReport, Verdict};
pub use path::{LogicalPath, PathError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
