//! Command surface
//!
//! Every orchestrator operation as a tagged JSON command, and a uniform
//! result carrying status, payload and exit code. Front ends (CLI, RPC)
//! translate their input into [`Command`] and print the [`CommandResult`].

use crate::error::{ExitCode, OrchestratorError};
use crate::orchestrator::Orchestrator;
use cloister_artifact::{LogicalPath, WorkspaceId};
use cloister_kernel::{Role, SchedulerError};
use cloister_merge::MergeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One request against the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// Leave `Idle`
    InitPhase,
    /// Create a workspace for `role` in the current phase
    CreateWorkspace {
        /// Requesting role
        role: Role,
        /// Outputs the workspace must produce
        #[serde(default)]
        declared_outputs: Vec<LogicalPath>,
    },
    /// Freeze a workspace's outputs
    SealWorkspace {
        /// Target
        workspace_id: WorkspaceId,
    },
    /// Withdraw a workspace
    DiscardWorkspace {
        /// Target
        workspace_id: WorkspaceId,
    },
    /// Guarded read
    ReadFile {
        /// Target
        workspace_id: WorkspaceId,
        /// Logical path
        path: String,
    },
    /// Guarded write
    WriteFile {
        /// Target
        workspace_id: WorkspaceId,
        /// Logical path
        path: String,
        /// UTF-8 contents
        content: String,
    },
    /// Advance if the exit predicate holds
    AdvancePhase,
    /// Supervisor retry
    RetryPhase {
        /// Requesting role
        role: Role,
    },
    /// Merge sealed outputs, or integrate an approved bundle
    Merge,
    /// Audit entries, optionally for one workspace
    GetAuditLog {
        /// Filter
        #[serde(default)]
        workspace_id: Option<WorkspaceId>,
    },
    /// Current phase, generation and participants
    PhaseStatus,
}

/// Outcome class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Command took effect
    Ok,
    /// Nothing changed yet; retry later
    Pending,
    /// Command was rejected
    Error,
}

/// Error body of a rejected command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    /// Machine-readable kind
    pub kind: String,
    /// Human-readable message
    pub message: String,
    /// Rule that denied access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Conflicting paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<LogicalPath>,
}

impl From<&OrchestratorError> for CommandError {
    fn from(err: &OrchestratorError) -> Self {
        let paths = match err {
            OrchestratorError::Merge(MergeError::Conflict(report)) => report.paths.clone(),
            OrchestratorError::Scheduler(SchedulerError::ConflictPending(paths)) => paths.clone(),
            _ => Vec::new(),
        };
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            rule: err
                .capability()
                .and_then(|denied| denied.reason.rule())
                .map(str::to_string),
            paths,
        }
    }
}

/// Uniform command response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Outcome class
    pub status: CommandStatus,
    /// Payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error body when rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
    /// Process exit code
    pub exit_code: i32,
}

impl CommandResult {
    /// Successful result with a payload
    #[must_use]
    pub fn ok<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                status: CommandStatus::Ok,
                data: Some(value),
                error: None,
                exit_code: ExitCode::Success.code(),
            },
            Err(err) => Self {
                status: CommandStatus::Error,
                data: None,
                error: Some(CommandError {
                    kind: "internal".into(),
                    message: format!("result not serializable: {err}"),
                    rule: None,
                    paths: Vec::new(),
                }),
                exit_code: ExitCode::Internal.code(),
            },
        }
    }

    /// Rejected command
    #[must_use]
    pub fn error(err: &OrchestratorError) -> Self {
        Self {
            status: CommandStatus::Error,
            data: None,
            error: Some(CommandError::from(err)),
            exit_code: err.exit_code().code(),
        }
    }

    /// Whether the command took effect
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == CommandStatus::Ok
    }

    fn from_result<T: Serialize>(result: Result<T, OrchestratorError>) -> Self {
        match result {
            Ok(data) => Self::ok(&data),
            Err(err) => Self::error(&err),
        }
    }
}

impl Orchestrator {
    /// Execute one command
    ///
    /// Never fails: rejections are reported in the result with their exit
    /// code. An `advance-phase` that changed nothing is `Pending` with the
    /// predicate-not-satisfied code.
    pub async fn execute(&self, command: Command) -> CommandResult {
        match command {
            Command::InitPhase => CommandResult::from_result(self.init_phase().await),
            Command::CreateWorkspace {
                role,
                declared_outputs,
            } => CommandResult::from_result(self.create_workspace(role, declared_outputs).await),
            Command::SealWorkspace { workspace_id } => {
                CommandResult::from_result(self.seal_workspace(workspace_id).await)
            }
            Command::DiscardWorkspace { workspace_id } => CommandResult::from_result(
                self.discard_workspace(workspace_id)
                    .await
                    .map(|()| serde_json::json!({ "workspace_id": workspace_id })),
            ),
            Command::ReadFile { workspace_id, path } => {
                CommandResult::from_result(self.read_file(workspace_id, &path).await.map(|bytes| {
                    serde_json::json!({
                        "path": path,
                        "content": String::from_utf8_lossy(&bytes),
                    })
                }))
            }
            Command::WriteFile {
                workspace_id,
                path,
                content,
            } => CommandResult::from_result(
                self.write_file(workspace_id, &path, content.as_bytes())
                    .await
                    .map(|()| serde_json::json!({ "path": path, "bytes": content.len() })),
            ),
            Command::AdvancePhase => match self.advance_phase().await {
                Ok(advance) if !advance.changed => CommandResult {
                    status: CommandStatus::Pending,
                    exit_code: ExitCode::PredicateNotSatisfied.code(),
                    ..CommandResult::ok(&advance)
                },
                other => CommandResult::from_result(other),
            },
            Command::RetryPhase { role } => CommandResult::from_result(self.retry_phase(role).await),
            Command::Merge => CommandResult::from_result(self.merge().await),
            Command::GetAuditLog { workspace_id } => {
                CommandResult::ok(&self.audit_log(workspace_id))
            }
            Command::PhaseStatus => CommandResult::ok(&self.phase_status()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn commands_use_kebab_case_tags() {
        let cmd: Command = serde_json::from_str(
            r#"{"command":"create-workspace","role":"isolated_producer_a","declared_outputs":["tests/a.yaml"]}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::CreateWorkspace {
                role: Role::IsolatedProducerA,
                declared_outputs: vec!["tests/a.yaml".parse().unwrap()],
            }
        );

        let cmd: Command = serde_json::from_str(r#"{"command":"get-audit-log"}"#).unwrap();
        assert_eq!(cmd, Command::GetAuditLog { workspace_id: None });

        let json = serde_json::to_value(Command::AdvancePhase).unwrap();
        assert_eq!(json, serde_json::json!({ "command": "advance-phase" }));
    }

    #[test]
    fn error_result_carries_exit_code_and_kind() {
        let err = OrchestratorError::Precondition("no sealed document package".into());
        let result = CommandResult::error(&err);
        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(result.exit_code, 2);
        let body = result.error.unwrap();
        assert_eq!(body.kind, "precondition");
        assert!(body.rule.is_none());
    }

    #[test]
    fn conflict_pending_lists_paths() {
        let paths: Vec<LogicalPath> = vec!["rules/liheap.param".parse().unwrap()];
        let err = OrchestratorError::Scheduler(SchedulerError::ConflictPending(paths.clone()));
        let result = CommandResult::error(&err);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.error.unwrap().paths, paths);
    }
}
