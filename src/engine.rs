//! Execution engine: runs staged plans with bounded parallelism
//!
//! Stages run in order; the engine never advances to stage *i+1* until
//! every task in stage *i* completed, failed, or was skipped. Within a
//! stage, tasks are partitioned into serial groups: all `exclusive` tasks
//! share one group, and tasks whose declared output patterns conservatively
//! overlap are merged into the same group. Groups run concurrently under a
//! bounded semaphore; tasks inside a group run serially in registration
//! order.

use crate::actions::shell::ShellAction;
use crate::actions::{Action, ActionContext};
use crate::cache::CacheStore;
use crate::error::{Result, StagehandError};
use crate::fingerprint::{fingerprint_inputs, resolve_patterns, Fingerprint};
use crate::models::{
    ConcurrencyMode, RunReport, Task, TaskOutcome, TaskResult,
};
use crate::plan::ExecutionPlan;
use crate::registry::TaskRegistry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

/// Per-run configuration, passed in explicitly rather than held as ambient
/// process state
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker pool size for concurrently running actions
    pub max_workers: usize,
    /// Force every task stale for this run
    pub no_cache: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_workers: 4,
            no_cache: false,
        }
    }
}

/// Task execution engine
pub struct Engine {
    root: PathBuf,
    cache: CacheStore,
    cancel_tx: watch::Sender<bool>,
}

impl Engine {
    /// Create an engine rooted at the pipeline directory
    pub fn new(root: PathBuf, cache: CacheStore) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            root,
            cache,
            cancel_tx,
        }
    }

    /// Request cooperative cancellation of the current and future runs.
    ///
    /// Queued tasks finish as `cancelled`; in-flight actions are killed and
    /// roll back any declared outputs they created.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Execute a plan and report every task's outcome.
    ///
    /// A task failure aborts only its dependent subgraph; siblings and
    /// unrelated branches continue.
    pub async fn execute(
        &self,
        registry: &TaskRegistry,
        plan: &ExecutionPlan,
        opts: &RunOptions,
    ) -> Result<RunReport> {
        let semaphore = Arc::new(Semaphore::new(opts.max_workers.max(1)));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut outcomes: HashMap<String, TaskOutcome> = HashMap::new();
        let mut report = RunReport::default();

        for stage in plan.stages() {
            let mut runnable: Vec<(Task, Option<Fingerprint>)> = Vec::new();

            for name in stage {
                let task = registry.lookup(name)?;

                if self.is_cancelled() {
                    self.record(&mut report, &mut outcomes, name, TaskOutcome::Cancelled, None);
                    continue;
                }

                if let Some(outcome) = self.dependency_block(task, &outcomes) {
                    self.record(&mut report, &mut outcomes, name, outcome, None);
                    continue;
                }

                let fingerprint = fingerprint_inputs(&self.root, &task.inputs)?;
                if self.can_skip(task, fingerprint.as_ref(), &outcomes, opts) {
                    info!("Task '{}' inputs unchanged, skipping", name);
                    self.record(&mut report, &mut outcomes, name, TaskOutcome::Skipped, None);
                    continue;
                }

                runnable.push((task.clone(), fingerprint));
            }

            let groups = partition_serial_groups(runnable);
            let mut handles = Vec::with_capacity(groups.len());

            for group in groups {
                let root = self.root.clone();
                let cache = self.cache.clone();
                let cancel = self.cancel_tx.subscribe();
                let semaphore = semaphore.clone();
                let running = running.clone();
                let peak = peak.clone();
                let no_cache = opts.no_cache;

                handles.push(tokio::spawn(async move {
                    let mut results = Vec::with_capacity(group.len());
                    for (task, fingerprint) in group {
                        let result = run_one(
                            &root, &cache, &cancel, &semaphore, &running, &peak, no_cache,
                            &task, fingerprint,
                        )
                        .await;
                        results.push(result);
                    }
                    results
                }));
            }

            // Stage barrier: every task settles before the next stage starts
            for joined in futures::future::join_all(handles).await {
                let results = joined
                    .map_err(|e| StagehandError::Other(format!("worker task panicked: {e}")))?;
                for result in results {
                    outcomes.insert(result.name.clone(), result.outcome.clone());
                    report.results.push(result);
                }
            }
        }

        report.peak_parallelism = peak.load(Ordering::SeqCst);
        Ok(report)
    }

    /// Outcome forced by a failed or cancelled dependency, if any
    fn dependency_block(
        &self,
        task: &Task,
        outcomes: &HashMap<String, TaskOutcome>,
    ) -> Option<TaskOutcome> {
        for dep in &task.depends_on {
            match outcomes.get(dep) {
                Some(TaskOutcome::Failed) | Some(TaskOutcome::SkippedDependencyFailed) => {
                    return Some(TaskOutcome::SkippedDependencyFailed);
                }
                Some(TaskOutcome::Cancelled) => return Some(TaskOutcome::Cancelled),
                _ => {}
            }
        }
        None
    }

    /// A task is skipped only when its fingerprint is fresh AND every
    /// dependency was itself cache-skipped this run. Dependencies outside
    /// the plan (restricted watch re-runs) count as skipped: they were
    /// excluded precisely because nothing they cover changed.
    fn can_skip(
        &self,
        task: &Task,
        fingerprint: Option<&Fingerprint>,
        outcomes: &HashMap<String, TaskOutcome>,
        opts: &RunOptions,
    ) -> bool {
        if opts.no_cache {
            return false;
        }

        let Some(fingerprint) = fingerprint else {
            // No declared inputs: nothing provable, always stale
            return false;
        };

        let deps_skipped = task.depends_on.iter().all(|dep| {
            matches!(outcomes.get(dep), Some(TaskOutcome::Skipped) | None)
        });

        deps_skipped && !self.cache.is_stale(&task.name, fingerprint)
    }

    fn record(
        &self,
        report: &mut RunReport,
        outcomes: &mut HashMap<String, TaskOutcome>,
        name: &str,
        outcome: TaskOutcome,
        cause: Option<String>,
    ) {
        outcomes.insert(name.to_string(), outcome.clone());
        report.results.push(TaskResult {
            name: name.to_string(),
            outcome,
            duration: Duration::ZERO,
            cause,
        });
    }
}

/// Run a single task action under the worker pool
#[allow(clippy::too_many_arguments)]
async fn run_one(
    root: &PathBuf,
    cache: &CacheStore,
    cancel: &watch::Receiver<bool>,
    semaphore: &Arc<Semaphore>,
    running: &AtomicUsize,
    peak: &AtomicUsize,
    no_cache: bool,
    task: &Task,
    fingerprint: Option<Fingerprint>,
) -> TaskResult {
    if *cancel.borrow() {
        return TaskResult {
            name: task.name.clone(),
            outcome: TaskOutcome::Cancelled,
            duration: Duration::ZERO,
            cause: None,
        };
    }

    let permit = semaphore
        .clone()
        .acquire_owned()
        .await
        .expect("worker semaphore is never closed");

    let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
    peak.fetch_max(now_running, Ordering::SeqCst);

    info!("Executing task '{}'", task.name);
    let start = std::time::Instant::now();

    let ctx = ActionContext {
        task_name: task.name.clone(),
        root: root.clone(),
        inputs: resolve_patterns(root, &task.inputs),
        outputs: task.outputs.clone(),
        cancel: cancel.clone(),
        timeout_secs: task.timeout.unwrap_or(300),
    };

    let action = ShellAction::new(task.run.clone());
    let outcome = action.run(&ctx).await;

    running.fetch_sub(1, Ordering::SeqCst);
    drop(permit);

    let duration = start.elapsed();

    match outcome {
        Ok(result) if result.success => {
            if !no_cache {
                if let Some(fp) = &fingerprint {
                    if let Err(e) = cache.record_success(&task.name, fp) {
                        warn!("Could not record fingerprint for '{}': {}", task.name, e);
                    }
                }
            }
            info!("Task '{}' ok in {:?}", task.name, duration);
            TaskResult {
                name: task.name.clone(),
                outcome: TaskOutcome::Ok,
                duration,
                cause: None,
            }
        }
        Ok(result) => {
            let cause = format!(
                "command exited with code {:?}",
                result.exit_code
            );
            error!("Task '{}' failed: {}", task.name, cause);
            if !result.stderr.is_empty() {
                error!("Task '{}' stderr: {}", task.name, result.stderr.trim_end());
            }
            TaskResult {
                name: task.name.clone(),
                outcome: TaskOutcome::Failed,
                duration,
                cause: Some(cause),
            }
        }
        Err(e) => {
            let outcome = if *cancel.borrow() {
                TaskOutcome::Cancelled
            } else {
                TaskOutcome::Failed
            };
            if outcome == TaskOutcome::Failed {
                error!("Task '{}' failed: {}", task.name, e);
            }
            TaskResult {
                name: task.name.clone(),
                outcome,
                duration,
                cause: Some(e.to_string()),
            }
        }
    }
}

/// Partition a stage's runnable tasks into serial groups.
///
/// All `exclusive` tasks share one group; any two tasks with overlapping
/// declared output patterns are merged into the same group. Remaining
/// parallel-safe tasks each get their own group. Group members keep
/// registration order, which the stage already carries.
fn partition_serial_groups(
    tasks: Vec<(Task, Option<Fingerprint>)>,
) -> Vec<Vec<(Task, Option<Fingerprint>)>> {
    let n = tasks.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let root = find(parent, parent[i]);
            parent[i] = root;
        }
        parent[i]
    }

    fn union(parent: &mut Vec<usize>, a: usize, b: usize) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra != rb {
            parent[rb] = ra;
        }
    }

    let mut first_exclusive: Option<usize> = None;
    for (i, (task, _)) in tasks.iter().enumerate() {
        if task.mode == ConcurrencyMode::Exclusive {
            match first_exclusive {
                Some(first) => union(&mut parent, first, i),
                None => first_exclusive = Some(i),
            }
        }
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if outputs_overlap(&tasks[i].0, &tasks[j].0) {
                union(&mut parent, i, j);
            }
        }
    }

    let mut group_of: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<(Task, Option<Fingerprint>)>> = Vec::new();

    for (i, entry) in tasks.into_iter().enumerate() {
        let root = find(&mut parent, i);
        let index = *group_of.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[index].push(entry);
    }

    groups
}

/// Conservative write-conflict test over declared output patterns
fn outputs_overlap(a: &Task, b: &Task) -> bool {
    a.outputs
        .iter()
        .any(|pa| b.outputs.iter().any(|pb| patterns_overlap(pa, pb)))
}

/// Two glob patterns may match a common path if the literal prefix of one
/// (up to the first metacharacter) prefixes the other's. False positives
/// only serialize; they never break correctness.
fn patterns_overlap(a: &str, b: &str) -> bool {
    let pa = literal_prefix(a);
    let pb = literal_prefix(b);
    pa.starts_with(pb) || pb.starts_with(pa)
}

fn literal_prefix(pattern: &str) -> &str {
    let end = pattern
        .find(|c| matches!(c, '*' | '?' | '['))
        .unwrap_or(pattern.len());
    &pattern[..end]
}
