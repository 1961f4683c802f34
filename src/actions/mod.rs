//! Task actions
//!
//! An action is anything that can run and report success or failure. This is
//! the boundary where external tools (type checkers, bundlers, minifiers,
//! dev servers) plug into the scheduler; the core never looks inside.

pub mod shell;

use crate::error::Result;
use crate::fingerprint::resolve_patterns;
use crate::models::{ActionResult, MAX_OUTPUT_SIZE};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Read-only context handed to an action when it runs
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Name of the task being executed
    pub task_name: String,
    /// Pipeline root directory; relative paths resolve against it
    pub root: PathBuf,
    /// Resolved files matching the task's declared input patterns
    pub inputs: Vec<PathBuf>,
    /// Declared output patterns, used for interruption rollback
    pub outputs: Vec<String>,
    /// Cooperative cancellation signal for the current run
    pub cancel: watch::Receiver<bool>,
    /// Timeout applied to the action, in seconds
    pub timeout_secs: u64,
}

/// Action trait: the uniform interface every task runs through
#[async_trait]
pub trait Action: Send + Sync {
    /// Execute the action and report the result.
    ///
    /// Implementations must not leave partially written declared outputs
    /// behind when interrupted; newly created outputs are rolled back.
    async fn run(&self, ctx: &ActionContext) -> Result<ActionResult>;
}

/// Snapshot which declared-output paths already exist before a run
pub(crate) fn snapshot_outputs(root: &Path, patterns: &[String]) -> HashSet<PathBuf> {
    resolve_patterns(root, patterns).into_iter().collect()
}

/// Delete declared outputs created during an interrupted run.
///
/// Outputs that existed before the run are left alone; the task stays stale
/// (its fingerprint was never recorded), so the next run repairs them.
pub(crate) fn rollback_new_outputs(
    root: &Path,
    patterns: &[String],
    before: &HashSet<PathBuf>,
) {
    for path in resolve_patterns(root, patterns) {
        if before.contains(&path) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Rolled back partial output '{}'", path.display()),
            Err(e) => warn!("Could not roll back output '{}': {}", path.display(), e),
        }
    }
}

/// Truncate captured byte output to MAX_OUTPUT_SIZE
///
/// Returns (truncated_string, was_truncated)
pub(crate) fn truncate_output_bytes(data: &[u8]) -> (String, bool) {
    let truncated = data.len() > MAX_OUTPUT_SIZE;
    let bytes = if truncated {
        &data[..MAX_OUTPUT_SIZE]
    } else {
        data
    };

    let output = String::from_utf8_lossy(bytes).to_string();
    (output, truncated)
}
