//! Orchestrator configuration

use crate::telemetry::TelemetryConfig;
use cloister_kernel::{CapabilityTable, ConfigError, Role, SchedulerConfig};
use cloister_merge::BreachHeuristicConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Orchestrator configuration
///
/// Loaded from TOML; every field has a default.
///
/// ```toml
/// workspace_root = "/var/lib/cloister/workspaces"
/// task_deadline_ms = 60000
/// capabilities = "roles.yaml"
///
/// [breach]
/// min_matches = 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Base directory for workspace roots
    pub workspace_root: PathBuf,
    /// Directory holding the persisted state log
    pub state_dir: PathBuf,
    /// Directory receiving canonical output
    pub output_dir: PathBuf,
    /// Per-task deadline in milliseconds
    pub task_deadline_ms: u64,
    /// Minimum participants in parallel development
    pub min_parallel_participants: usize,
    /// Roles that must each be represented in parallel development
    pub required_producers: Vec<Role>,
    /// Generations `run_pipeline` attempts before giving up
    pub max_generations: u32,
    /// Breach heuristic thresholds
    pub breach: BreachHeuristicConfig,
    /// Capability table file (`.toml`, `.yaml`, `.yml`); built-in table when unset
    pub capabilities: Option<PathBuf>,
    /// Logging
    pub telemetry: TelemetryConfig,
}

impl OrchestratorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place workspaces, state and output under one directory
    #[must_use]
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.workspace_root = root.join("workspaces");
        self.state_dir = root.join("state");
        self.output_dir = root.join("output");
        self
    }

    /// With task deadline
    #[inline]
    #[must_use]
    pub fn with_task_deadline(mut self, deadline: Duration) -> Self {
        self.task_deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With minimum parallel participants
    #[inline]
    #[must_use]
    pub fn with_min_parallel_participants(mut self, min: usize) -> Self {
        self.min_parallel_participants = min;
        self
    }

    /// With breach thresholds
    #[inline]
    #[must_use]
    pub fn with_breach(mut self, breach: BreachHeuristicConfig) -> Self {
        self.breach = breach;
        self
    }

    /// With capability table file
    #[inline]
    #[must_use]
    pub fn with_capabilities(mut self, path: impl Into<PathBuf>) -> Self {
        self.capabilities = Some(path.into());
        self
    }

    /// With generation limit for `run_pipeline`
    #[inline]
    #[must_use]
    pub fn with_max_generations(mut self, max: u32) -> Self {
        self.max_generations = max;
        self
    }

    /// Per-task deadline
    #[inline]
    #[must_use]
    pub fn task_deadline(&self) -> Duration {
        Duration::from_millis(self.task_deadline_ms)
    }

    /// Scheduler limits
    #[must_use]
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            min_parallel_participants: self.min_parallel_participants,
            required_producers: self.required_producers.clone(),
        }
    }

    /// Load the configured capability table, or the built-in one
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file cannot be read or validated.
    pub fn capability_table(&self) -> Result<CapabilityTable, ConfigError> {
        match &self.capabilities {
            Some(path) => CapabilityTable::load(path),
            None => Ok(CapabilityTable::default()),
        }
    }

    /// Parse from TOML
    ///
    /// # Errors
    /// Returns [`ConfigError::Toml`] on malformed input.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] on I/O or parse failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        Self {
            workspace_root: PathBuf::from(".cloister/workspaces"),
            state_dir: PathBuf::from(".cloister/state"),
            output_dir: PathBuf::from(".cloister/output"),
            task_deadline_ms: 300_000,
            min_parallel_participants: scheduler.min_parallel_participants,
            required_producers: scheduler.required_producers,
            max_generations: 3,
            breach: BreachHeuristicConfig::default(),
            capabilities: None,
            telemetry: TelemetryConfig::default(),
        }
    }
}
