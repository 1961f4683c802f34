//! Watch mode: re-run affected subgraphs on filesystem changes
//!
//! The trigger moves through `idle -> debouncing -> triggering -> idle`.
//! Raw filesystem events are coalesced by a debouncer over a quiet window;
//! debounced paths are matched against watch bindings (input patterns per
//! task); the affected subgraph is the bound tasks plus everything
//! transitively depending on them, restricted to the requested root
//! closure. Trigger requests arriving while a run is active are drained and
//! unioned into exactly one follow-up run, so two passes never overlap.
//! The watcher shares no mutable state with the engine; they communicate
//! only through the request channel.

use crate::engine::{Engine, RunOptions};
use crate::error::{Result, StagehandError};
use crate::models::RunReport;
use crate::plan::{ExecutionPlan, TaskGraph};
use crate::registry::TaskRegistry;
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Association between input path patterns and the task to re-trigger
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pub task: String,
    patterns: Vec<glob::Pattern>,
}

impl WatchBinding {
    fn matches(&self, relative: &Path) -> bool {
        self.patterns.iter().any(|p| p.matches_path(relative))
    }
}

/// Trigger state, logged as the watcher moves through its machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Idle,
    Triggering,
}

/// Watch trigger for one pipeline and root task set
pub struct WatchTrigger<'a> {
    registry: &'a TaskRegistry,
    graph: TaskGraph,
    closure: HashSet<String>,
    bindings: Vec<WatchBinding>,
    root: PathBuf,
    debounce: Duration,
}

impl<'a> WatchTrigger<'a> {
    /// Build the trigger: validates the graph, computes the root closure,
    /// and derives a watch binding from every reachable task with inputs.
    pub fn new(
        registry: &'a TaskRegistry,
        root: PathBuf,
        roots: &[String],
        debounce: Duration,
    ) -> Result<Self> {
        let graph = TaskGraph::build(registry)?;
        let closure = graph.dependency_closure(roots)?;

        let mut bindings = Vec::new();
        for task in registry.tasks() {
            if !closure.contains(&task.name) || task.inputs.is_empty() {
                continue;
            }

            let mut patterns = Vec::new();
            for input in &task.inputs {
                let mut forms = vec![input.clone()];
                if let Some(collapsed) = crate::fingerprint::zero_depth_variant(input) {
                    forms.push(collapsed);
                }
                for form in forms {
                    match glob::Pattern::new(&form) {
                        Ok(pattern) => patterns.push(pattern),
                        Err(e) => warn!(
                            "Task '{}' input pattern '{}' is not watchable: {}",
                            task.name, input, e
                        ),
                    }
                }
            }

            if !patterns.is_empty() {
                bindings.push(WatchBinding {
                    task: task.name.clone(),
                    patterns,
                });
            }
        }

        Ok(Self {
            registry,
            graph,
            closure,
            bindings,
            root,
            debounce,
        })
    }

    /// Number of tasks with active watch bindings
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Tasks to re-run for a set of changed paths: every bound task whose
    /// pattern matches a path, plus its transitive dependents, restricted
    /// to the root closure.
    pub fn affected_tasks(&self, changed: &[PathBuf]) -> HashSet<String> {
        let mut seeds = HashSet::new();

        for path in changed {
            if should_ignore_path(path) {
                continue;
            }
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            for binding in &self.bindings {
                if binding.matches(relative) {
                    seeds.insert(binding.task.clone());
                }
            }
        }

        if seeds.is_empty() {
            return seeds;
        }

        let mut affected = self.graph.dependents_closure(&seeds);
        affected.retain(|name| self.closure.contains(name));
        affected
    }

    /// Run the watch loop until the shutdown signal (ctrl-c).
    ///
    /// `on_cycle` is invoked with the report of every completed trigger
    /// cycle, so the caller can print per-task status lines.
    pub async fn run(
        &self,
        engine: &Engine,
        opts: &RunOptions,
        mut on_cycle: impl FnMut(&RunReport),
    ) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<Vec<PathBuf>>(64);

        // The debouncer reports into a std channel; a bridge thread forwards
        // debounced path batches into the async loop.
        let (fs_tx, fs_rx) = std_mpsc::channel();
        let mut debouncer = new_debouncer(self.debounce, fs_tx)
            .map_err(|e| StagehandError::Other(format!("failed to start watcher: {e}")))?;
        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| StagehandError::Other(format!("failed to watch '{}': {e}", self.root.display())))?;

        std::thread::spawn(move || {
            while let Ok(result) = fs_rx.recv() {
                match result {
                    Ok(events) => {
                        let paths: Vec<PathBuf> =
                            events.into_iter().map(|e| e.path).collect();
                        if event_tx.blocking_send(paths).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Watch error: {e}"),
                }
            }
        });

        info!(
            "Watching '{}' ({} bound tasks, {}ms debounce)",
            self.root.display(),
            self.bindings.len(),
            self.debounce.as_millis()
        );

        let mut state = WatchState::Idle;
        debug!("Watch state: {state:?}");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping watch mode");
                    engine.cancel();
                    break;
                }
                batch = event_rx.recv() => {
                    let Some(mut paths) = batch else { break };

                    // Events that queued while the previous run was active
                    // coalesce into this one follow-up cycle.
                    while let Ok(more) = event_rx.try_recv() {
                        paths.extend(more);
                    }

                    let affected = self.affected_tasks(&paths);
                    if affected.is_empty() {
                        debug!("Change batch matched no watch bindings");
                        continue;
                    }

                    state = WatchState::Triggering;
                    debug!("Watch state: {state:?}, {} affected tasks", affected.len());

                    let plan = ExecutionPlan::build_restricted(self.registry, &affected)?;
                    info!(
                        "Change detected, re-running {} task(s) in {} stage(s)",
                        plan.task_count(),
                        plan.stages().len()
                    );

                    let report = engine.execute(self.registry, &plan, opts).await?;
                    on_cycle(&report);

                    state = WatchState::Idle;
                    debug!("Watch state: {state:?}");
                }
            }
        }

        Ok(())
    }
}

/// Paths the watcher never reacts to: the fingerprint store and its
/// sqlite side files would otherwise re-trigger every run.
fn should_ignore_path(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == ".stagehand" || c.as_os_str() == ".git")
}
