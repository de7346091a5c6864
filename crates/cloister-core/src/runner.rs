//! Task runner
//!
//! Executes one worker inside its workspace under a deadline and turns the
//! outcome into a terminal task status. Success seals the workspace; any
//! failure (denied access, timeout, missing outputs, worker error) marks the
//! task `Failed` and discards the workspace.

use crate::error::TaskError;
use crate::task::Task;
use crate::worker::{Worker, WorkerContext};
use cloister_artifact::Artifact;
use cloister_kernel::{SealedWorkspace, Workspace, WorkspaceStatus};
use std::time::Duration;
use tracing::{info, warn};

/// Runs workers against their workspaces
#[derive(Debug, Clone)]
pub struct TaskRunner {
    deadline: Duration,
}

impl TaskRunner {
    /// Create new runner with a per-task deadline
    #[must_use]
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// Per-task deadline
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `worker` in `workspace`, updating `task` to `Done` or `Failed`
    ///
    /// # Errors
    /// Returns the [`TaskError`] that failed the task. The workspace has been
    /// discarded by then.
    pub async fn run(
        &self,
        task: &mut Task,
        workspace: &mut Workspace,
        worker: &dyn Worker,
    ) -> Result<SealedWorkspace, TaskError> {
        task.start();
        info!(task_id = %task.id, workspace_id = %workspace.id(), role = %task.role, "task started");

        let outcome = self.execute(task, workspace, worker).await;
        match outcome {
            Ok(sealed) => {
                task.complete(sealed.artifacts().iter().map(Artifact::to_ref).collect());
                info!(task_id = %task.id, outputs = task.outputs.len(), "task done");
                Ok(sealed)
            }
            Err(err) => {
                task.fail(err.to_string());
                warn!(task_id = %task.id, workspace_id = %workspace.id(), error = %err, "task failed");
                if workspace.status() != WorkspaceStatus::Discarded {
                    if let Err(discard) = workspace.discard().await {
                        warn!(workspace_id = %workspace.id(), error = %discard, "discard after failure failed");
                    }
                }
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        task: &Task,
        workspace: &mut Workspace,
        worker: &dyn Worker,
    ) -> Result<SealedWorkspace, TaskError> {
        let mut ctx = WorkerContext::new(workspace, &task.inputs);
        let result = tokio::time::timeout(self.deadline, worker.run(&mut ctx)).await;
        let violation = ctx.take_violation();
        drop(ctx);

        if let Some(denied) = violation {
            return Err(TaskError::AccessDenied(denied));
        }
        match result {
            Err(_) => {
                warn!(task_id = %task.id, deadline_ms = self.deadline_ms(), "task deadline exceeded");
                return Err(TaskError::Timeout {
                    deadline_ms: self.deadline_ms(),
                });
            }
            Ok(Err(err)) => return Err(TaskError::Worker(format!("{err:#}"))),
            Ok(Ok(())) => {}
        }
        Ok(workspace.seal().await?)
    }

    fn deadline_ms(&self) -> u64 {
        u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
