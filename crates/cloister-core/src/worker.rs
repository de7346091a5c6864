//! Worker trait and the guarded context it runs against
//!
//! A worker never sees a filesystem path. Everything it reads or writes goes
//! through [`WorkerContext`], which forwards to the workspace's access guard
//! and remembers the first denial. A denial fails the task even when the
//! worker swallows the error.

use crate::error::TaskError;
use async_trait::async_trait;
use cloister_artifact::{ArtifactRef, LogicalPath, WorkspaceId};
use cloister_kernel::{CapabilityError, Generation, Role, Workspace, WorkspaceError};
use std::fmt;

/// External collaborator executing one task
#[async_trait]
pub trait Worker: Send + Sync + fmt::Debug {
    /// Role this worker acts as
    fn role(&self) -> Role;

    /// Outputs the worker promises to write
    fn declared_outputs(&self) -> Vec<LogicalPath>;

    /// Do the work
    ///
    /// # Errors
    /// Any error fails the task.
    async fn run(&self, ctx: &mut WorkerContext<'_>) -> anyhow::Result<()>;
}

/// Guarded view of a workspace handed to a [`Worker`]
#[derive(Debug)]
pub struct WorkerContext<'a> {
    workspace: &'a mut Workspace,
    inputs: &'a [ArtifactRef],
    violation: Option<CapabilityError>,
}

impl<'a> WorkerContext<'a> {
    pub(crate) fn new(workspace: &'a mut Workspace, inputs: &'a [ArtifactRef]) -> Self {
        Self {
            workspace,
            inputs,
            violation: None,
        }
    }

    /// Workspace identifier
    #[inline]
    #[must_use]
    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace.id()
    }

    /// Role the worker acts as
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.workspace.role()
    }

    /// Current generation
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.workspace.generation()
    }

    /// Snapshot artifacts
    #[inline]
    #[must_use]
    pub fn inputs(&self) -> &[ArtifactRef] {
        self.inputs
    }

    /// Snapshot and written paths
    #[must_use]
    pub fn list(&self) -> Vec<LogicalPath> {
        self.workspace.list()
    }

    /// Guarded read
    ///
    /// # Errors
    /// Returns [`TaskError::AccessDenied`] when the guard refuses; the task
    /// fails regardless of how the worker handles it.
    pub async fn read(&mut self, path: &str) -> Result<Vec<u8>, TaskError> {
        let result = self.workspace.read(path).await;
        self.observe(result)
    }

    /// Guarded read decoded as UTF-8 (lossy)
    ///
    /// # Errors
    /// Same as [`read`](Self::read).
    pub async fn read_to_string(&mut self, path: &str) -> Result<String, TaskError> {
        let bytes = self.read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Guarded write
    ///
    /// # Errors
    /// Returns [`TaskError::AccessDenied`] when the guard refuses; the task
    /// fails regardless of how the worker handles it.
    pub async fn write(&mut self, path: &str, contents: impl AsRef<[u8]>) -> Result<(), TaskError> {
        let result = self.workspace.write(path, contents.as_ref()).await;
        self.observe(result)
    }

    pub(crate) fn take_violation(&mut self) -> Option<CapabilityError> {
        self.violation.take()
    }

    fn observe<T>(&mut self, result: Result<T, WorkspaceError>) -> Result<T, TaskError> {
        result.map_err(|err| {
            if let WorkspaceError::Capability(denied) = &err {
                self.violation.get_or_insert_with(|| denied.clone());
            }
            TaskError::from(err)
        })
    }
}
