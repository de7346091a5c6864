//! Cloister Core - the orchestrator
//!
//! Drives the phase flow over the kernel and merge crates:
//! - Runs each worker inside its own guarded workspace under a deadline
//! - Runs parallel development participants concurrently behind a barrier
//! - Merges sealed outputs and surfaces conflicts instead of resolving them
//! - Persists every phase, workspace, task and artifact change
//! - Exposes all of it as a JSON command surface with stable exit codes
//!
//! # Example
//!
//! ```rust,ignore
//! use cloister_core::{Command, Orchestrator, OrchestratorConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestratorConfig::new().with_root("/tmp/cloister");
//! let orchestrator = Arc::new(Orchestrator::new(config)?);
//!
//! let report = orchestrator
//!     .run_pipeline(collector, vec![tests_writer, implementer], reviewer)
//!     .await?;
//! println!("stopped in {} after generation {}", report.phase, report.generation);
//!
//! let status = orchestrator.execute(Command::PhaseStatus).await;
//! assert!(status.is_ok());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod command;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod runner;
pub mod store;
pub mod task;
pub mod telemetry;
pub mod worker;

pub use command::{Command, CommandError, CommandResult, CommandStatus};
pub use config::OrchestratorConfig;
pub use error::{ExitCode, OrchestratorError, TaskError};
pub use orchestrator::{MergeOutcome, Orchestrator, PipelineReport};
pub use runner::TaskRunner;
pub use store::{StateRecord, StateStore, StateSummary, StoreError, StoredRecord, STATE_FILE};
pub use task::{Task, TaskId, TaskStatus};
pub use telemetry::{init_tracing, TelemetryConfig};
pub use worker::{Worker, WorkerContext};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for writing workers and driving the orchestrator
    pub use crate::{
        Command, CommandResult, Orchestrator, OrchestratorConfig, OrchestratorError, Task,
        TaskStatus, Worker, WorkerContext,
    };
    pub use cloister_artifact::{LogicalPath, Verdict, WorkspaceId};
    pub use cloister_kernel::{PhaseState, Role};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
