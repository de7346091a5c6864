//! Units of work executed inside a workspace

use chrono::{DateTime, Utc};
use cloister_artifact::{ArtifactRef, LogicalPath, WorkspaceId};
use cloister_kernel::{Generation, Role};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Ulid);

impl TaskId {
    /// Generate new ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task lifecycle; `Done` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created at phase entry
    Pending,
    /// Worker executing
    Running,
    /// Workspace sealed
    Done,
    /// Denied access, timeout, incomplete outputs or worker error
    Failed,
}

impl TaskStatus {
    /// Whether the task can no longer change
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One worker's unit of work
///
/// Mutated only by [`TaskRunner`](crate::TaskRunner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique ID
    pub id: TaskId,
    /// Workspace the task runs in
    pub workspace_id: WorkspaceId,
    /// Role of that workspace
    pub role: Role,
    /// Generation the task belongs to
    pub generation: Generation,
    /// Snapshot the workspace was created with
    pub inputs: Vec<ArtifactRef>,
    /// Outputs that must exist when the task completes
    pub declared_outputs: Vec<LogicalPath>,
    /// Current status
    pub status: TaskStatus,
    /// Sealed outputs once `Done`
    #[serde(default)]
    pub outputs: Vec<ArtifactRef>,
    /// Reason once `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time it became terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create new pending task
    #[must_use]
    pub fn new(
        workspace_id: WorkspaceId,
        role: Role,
        generation: Generation,
        inputs: Vec<ArtifactRef>,
        declared_outputs: Vec<LogicalPath>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            workspace_id,
            role,
            generation,
            inputs,
            declared_outputs,
            status: TaskStatus::Pending,
            outputs: Vec::new(),
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = TaskStatus::Running;
    }

    pub(crate) fn complete(&mut self, outputs: Vec<ArtifactRef>) {
        self.status = TaskStatus::Done;
        self.outputs = outputs;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.failure = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let mut task = Task::new(
            WorkspaceId::new(),
            Role::IsolatedProducerA,
            Generation::FIRST,
            Vec::new(),
            vec!["tests/a.yaml".parse().unwrap()],
        );
        assert_eq!(task.status, TaskStatus::Pending);
        task.start();
        assert!(!task.status.is_terminal());
        task.fail("denied");
        assert!(task.status.is_terminal());
        assert_eq!(task.failure.as_deref(), Some("denied"));
        assert!(task.finished_at.is_some());
    }
}
