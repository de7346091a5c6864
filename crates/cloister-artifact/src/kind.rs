//! Artifact kinds and the logical namespace they live in

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level logical region of a workspace
///
/// Capability rules are grouped by namespace, and each artifact kind belongs
/// to exactly one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Shared input documents
    Documents,
    /// Test suites
    Tests,
    /// Implementation outputs
    Implementation,
    /// Review reports
    Review,
}

impl Namespace {
    /// Every namespace, in declaration order
    pub const ALL: [Namespace; 4] = [
        Namespace::Documents,
        Namespace::Tests,
        Namespace::Implementation,
        Namespace::Review,
    ];

    /// Directory name used by the default capability table
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Namespace::Documents => "documents",
            Namespace::Tests => "tests",
            Namespace::Implementation => "implementation",
            Namespace::Review => "review",
        }
    }

    /// Kind of artifact produced inside this namespace
    #[must_use]
    pub const fn artifact_kind(self) -> ArtifactKind {
        match self {
            Namespace::Documents => ArtifactKind::DocumentPackage,
            Namespace::Tests => ArtifactKind::TestSuite,
            Namespace::Implementation => ArtifactKind::Implementation,
            Namespace::Review => ArtifactKind::ReviewReport,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical kind of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Collected input documents
    DocumentPackage,
    /// Independently written tests
    TestSuite,
    /// Independently written implementation
    Implementation,
    /// Reviewer verdict
    ReviewReport,
}

impl ArtifactKind {
    /// Namespace this kind belongs to
    #[must_use]
    pub const fn namespace(self) -> Namespace {
        match self {
            ArtifactKind::DocumentPackage => Namespace::Documents,
            ArtifactKind::TestSuite => Namespace::Tests,
            ArtifactKind::Implementation => Namespace::Implementation,
            ArtifactKind::ReviewReport => Namespace::Review,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKind::DocumentPackage => "document_package",
            ArtifactKind::TestSuite => "test_suite",
            ArtifactKind::Implementation => "implementation",
            ArtifactKind::ReviewReport => "review_report",
        };
        f.write_str(s)
    }
}
