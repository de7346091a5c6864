//! Cloister Merge
//!
//! The single convergence point of a generation: sealed workspaces go in, a
//! merged bundle (or a report naming every overlap) comes out.
//!
//! # Core Concepts
//!
//! - [`MergeCoordinator`]: disjoint union of [`cloister_kernel::SealedWorkspace`] outputs
//! - [`ConflictReport`]: overlapping outputs, surfaced rather than resolved
//! - [`BreachDetector`]: advisory check for suspiciously aligned tests and implementation
//! - [`integrate`]: writes an approved bundle to the canonical output directory
//!
//! # Example
//!
//! ```rust,ignore
//! use cloister_merge::MergeCoordinator;
//!
//! let bundle = MergeCoordinator::default().merge(&sealed, Some(&package))?;
//! assert!(bundle.is_clean());
//! let review_snapshot = bundle.snapshot();
//! ```

#![warn(unreachable_pub)]

mod breach;
mod bundle;
mod canonical;
pub mod conflict;
mod coordinator;

pub use breach::{BreachDetector, BreachHeuristicConfig, BreachWarning};
pub use bundle::{BundleEntry, BundleManifest, BundleSource, MergedBundle};
pub use canonical::{integrate, CanonicalOutput, MANIFEST_FILE};
pub use conflict::{Conflict, ConflictReport};
pub use coordinator::{MergeCoordinator, MergeError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
