//! Overlap detection between workspace outputs
//!
//! Two outputs conflict when their paths overlap (equal, or one is a prefix
//! of the other) and they come from different workspaces. Conflicts are
//! reported, never resolved by picking a side.

use cloister_artifact::{LogicalPath, WorkspaceId};
use cloister_kernel::{Generation, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Output path claimed by a workspace
#[derive(Debug, Clone, Copy)]
pub struct Claim<'a> {
    /// Claiming workspace
    pub workspace_id: WorkspaceId,
    /// Its role
    pub role: Role,
    /// Claimed path
    pub path: &'a LogicalPath,
}

/// One overlapping pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Overlapping region (the shorter of the two paths)
    pub path: LogicalPath,
    /// First claimant
    pub first: (WorkspaceId, Role, LogicalPath),
    /// Second claimant
    pub second: (WorkspaceId, Role, LogicalPath),
}

/// Overlapping outputs surfaced for manual resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Generation being merged
    pub generation: Generation,
    /// Distinct overlapping regions, sorted
    pub paths: Vec<LogicalPath>,
    /// Every overlapping pair
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    /// Exit code of a merge conflict
    pub const EXIT_CODE: i32 = 3;
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths: Vec<String> = self.paths.iter().map(LogicalPath::as_string).collect();
        write!(
            f,
            "merge conflict in generation {}: {} overlapping path(s): {}",
            self.generation,
            paths.len(),
            paths.join(", ")
        )
    }
}

impl std::error::Error for ConflictReport {}

/// Pairwise overlap check across workspaces
///
/// Claims from the same workspace never conflict with each other.
#[must_use]
pub fn find_conflicts(claims: &[Claim<'_>]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for (i, a) in claims.iter().enumerate() {
        for b in &claims[i + 1..] {
            if a.workspace_id == b.workspace_id || !a.path.overlaps(b.path) {
                continue;
            }
            let region = if a.path.len() <= b.path.len() { a.path } else { b.path };
            conflicts.push(Conflict {
                path: region.clone(),
                first: (a.workspace_id, a.role, a.path.clone()),
                second: (b.workspace_id, b.role, b.path.clone()),
            });
        }
    }
    conflicts
}

/// Build a report, or `None` when the claims are disjoint
#[must_use]
pub fn report(generation: Generation, claims: &[Claim<'_>]) -> Option<ConflictReport> {
    let conflicts = find_conflicts(claims);
    if conflicts.is_empty() {
        return None;
    }
    let paths: BTreeSet<LogicalPath> = conflicts.iter().map(|c| c.path.clone()).collect();
    Some(ConflictReport {
        generation,
        paths: paths.into_iter().collect(),
        conflicts,
    })
}
