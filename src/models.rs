//! Core data models for the stagehand task scheduler

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// Input validation limits
pub const MAX_YAML_SIZE: usize = 1_048_576; // 1 MB
pub const MAX_TASK_COUNT: usize = 1_000;
pub const MAX_TASK_NAME_LEN: usize = 64;
pub const MAX_ARG_COUNT: usize = 256;
pub const MAX_ARG_LEN: usize = 4_096; // 4 KB
pub const MAX_OUTPUT_SIZE: usize = 10_485_760; // 10 MB

/// Pipeline configuration parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub config: PipelineGlobalConfig,
    pub tasks: Vec<Task>,
}

/// Global pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineGlobalConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_timeout")]
    pub timeout_default: u64, // seconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for PipelineGlobalConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            timeout_default: default_timeout(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_timeout() -> u64 {
    300
}

fn default_debounce_ms() -> u64 {
    300
}

/// A single build task: a named unit of work with declared dependencies.
///
/// Immutable once registered. `inputs` drive fingerprinting and watch
/// bindings; `outputs` drive conservative write-conflict serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub mode: ConcurrencyMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    pub run: CommandSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>, // seconds
}

/// Whether a task may share a stage slot with concurrently running tasks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConcurrencyMode {
    #[default]
    ParallelSafe,
    Exclusive,
}

/// The command a task runs. This is the seam where external tools
/// (compilers, bundlers, minifiers, dev servers) plug in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String, // Absolute path to binary
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

/// Outcome of a task within one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskOutcome {
    /// Action ran and succeeded
    Ok,
    /// Inputs unchanged and every dependency was also skipped; counts as succeeded
    Skipped,
    /// Action ran and failed, or could not be launched
    Failed,
    /// Never executed because a (transitive) dependency failed
    SkippedDependencyFailed,
    /// Never executed, or killed in flight, due to run cancellation
    Cancelled,
}

impl TaskOutcome {
    /// True for outcomes that satisfy dependents
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Ok | TaskOutcome::Skipped)
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Ok => write!(f, "ok"),
            TaskOutcome::Skipped => write!(f, "skipped"),
            TaskOutcome::Failed => write!(f, "failed"),
            TaskOutcome::SkippedDependencyFailed => write!(f, "skipped-dependency-failed"),
            TaskOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-task record in a run report
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub name: String,
    pub outcome: TaskOutcome,
    pub duration: Duration,
    /// Failure cause, present only for `Failed`
    pub cause: Option<String>,
}

/// Result of one engine run over an execution plan
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub results: Vec<TaskResult>,
    /// Highest number of actions that ran simultaneously
    pub peak_parallelism: usize,
}

impl RunReport {
    /// A run is green when every reachable task succeeded or was cache-skipped
    pub fn is_green(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_success())
    }

    /// Names of tasks whose actions failed
    pub fn failed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.outcome == TaskOutcome::Failed)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Names of tasks skipped because an ancestor failed
    pub fn skipped_for_failure(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.outcome == TaskOutcome::SkippedDependencyFailed)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Count of tasks whose actions actually executed (ok or failed)
    pub fn executed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, TaskOutcome::Ok | TaskOutcome::Failed))
            .count()
    }
}

/// Result of running a task's command
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// True if captured output exceeded MAX_OUTPUT_SIZE
    pub output_truncated: bool,
}
