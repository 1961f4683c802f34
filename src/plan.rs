//! Dependency resolution: task graph validation and staged execution plans
//!
//! The plan is an ordered partition of tasks into stages. Stage *i* holds
//! every reachable task whose dependencies are all satisfied by stages
//! `0..i-1`; tasks in the same stage have no edges between them and may run
//! concurrently. Ties within a stage break by registration order.

use crate::error::{Result, StagehandError};
use crate::registry::TaskRegistry;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Validated dependency graph over a task registry
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<String, ()>,
    node_of: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Build the dependency graph for every registered task.
    ///
    /// Fails with `UnknownDependency` if any edge references an unregistered
    /// task, or `CycleDetected` (naming every member) if the graph is not a
    /// DAG. Structural errors abort here; nothing executes on a broken graph.
    pub fn build(registry: &TaskRegistry) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut node_of = HashMap::new();

        for task in registry.tasks() {
            let index = graph.add_node(task.name.clone());
            node_of.insert(task.name.clone(), index);
        }

        for task in registry.tasks() {
            let task_index = node_of[&task.name];
            for dep in &task.depends_on {
                let dep_index =
                    *node_of
                        .get(dep)
                        .ok_or_else(|| StagehandError::UnknownDependency {
                            task: task.name.clone(),
                            dependency: dep.clone(),
                        })?;
                // Edge from dependency to dependent: dep must complete first
                graph.add_edge(dep_index, task_index, ());
            }
        }

        let built = Self { graph, node_of };

        if is_cyclic_directed(&built.graph) {
            let members = built.find_cycle().unwrap_or_default();
            return Err(StagehandError::CycleDetected(members));
        }

        Ok(built)
    }

    /// Extract the members of one cycle for error reporting
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut in_path: HashMap<NodeIndex, bool> = HashMap::new();
        let mut path: Vec<NodeIndex> = Vec::new();

        for start in self.graph.node_indices() {
            if !in_path.contains_key(&start) {
                if let Some(cycle) = self.dfs_cycle(start, &mut in_path, &mut path) {
                    return Some(cycle);
                }
            }
        }

        None
    }

    fn dfs_cycle(
        &self,
        node: NodeIndex,
        in_path: &mut HashMap<NodeIndex, bool>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<String>> {
        if let Some(&active) = in_path.get(&node) {
            if active {
                // Closed a loop: the cycle is the path suffix starting here
                let pos = path.iter().position(|&n| n == node)?;
                return Some(path[pos..].iter().map(|&n| self.graph[n].clone()).collect());
            }
            return None;
        }

        in_path.insert(node, true);
        path.push(node);

        for next in self.graph.neighbors(node) {
            if let Some(cycle) = self.dfs_cycle(next, in_path, path) {
                return Some(cycle);
            }
        }

        path.pop();
        in_path.insert(node, false);
        None
    }

    /// The requested roots plus everything they transitively depend on.
    /// Only this closure is ever scheduled; unrelated tasks never run.
    pub fn dependency_closure(&self, roots: &[String]) -> Result<HashSet<String>> {
        let mut closure = HashSet::new();
        let mut pending = Vec::new();

        for root in roots {
            let index = *self
                .node_of
                .get(root)
                .ok_or_else(|| StagehandError::TaskNotFound(root.clone()))?;
            pending.push(index);
        }

        while let Some(node) = pending.pop() {
            if !closure.insert(self.graph[node].clone()) {
                continue;
            }
            for dep in self.graph.neighbors_directed(node, Direction::Incoming) {
                pending.push(dep);
            }
        }

        Ok(closure)
    }

    /// The seed tasks plus everything that transitively depends on them.
    /// Used by the watcher to compute the minimal re-run subgraph.
    pub fn dependents_closure(&self, seeds: &HashSet<String>) -> HashSet<String> {
        let mut closure = HashSet::new();
        let mut pending: Vec<NodeIndex> = seeds
            .iter()
            .filter_map(|name| self.node_of.get(name).copied())
            .collect();

        while let Some(node) = pending.pop() {
            if !closure.insert(self.graph[node].clone()) {
                continue;
            }
            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                pending.push(dependent);
            }
        }

        closure
    }
}

/// Staged execution plan over a subset of the task graph
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    stages: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Build the plan for the dependency closure of the requested roots
    pub fn build(registry: &TaskRegistry, roots: &[String]) -> Result<Self> {
        let graph = TaskGraph::build(registry)?;
        let closure = graph.dependency_closure(roots)?;
        Self::build_restricted(registry, &closure)
    }

    /// Build the plan for an explicit task subset.
    ///
    /// Dependencies outside the subset are treated as already satisfied;
    /// the watcher relies on this when re-running an affected subgraph.
    pub fn build_restricted(registry: &TaskRegistry, subset: &HashSet<String>) -> Result<Self> {
        // Whole-graph validation first so a broken pipeline never half-runs
        TaskGraph::build(registry)?;

        let mut level_of: HashMap<&str, usize> = HashMap::new();
        let mut ordered: Vec<&str> = subset.iter().map(|s| s.as_str()).collect();
        ordered.sort_by_key(|name| registry.position(name));

        // Tasks are leveled by longest dependency path within the subset.
        // Iterate until fixpoint; bounded by subset size since the graph is
        // acyclic.
        let mut changed = true;
        while changed {
            changed = false;
            for name in &ordered {
                let task = registry.lookup(name)?;
                let level = task
                    .depends_on
                    .iter()
                    .filter(|d| subset.contains(d.as_str()))
                    .map(|d| level_of.get(d.as_str()).map(|l| l + 1).unwrap_or(usize::MAX))
                    .max()
                    .unwrap_or(0);

                if level != usize::MAX && level_of.get(name).copied() != Some(level) {
                    level_of.insert(name, level);
                    changed = true;
                }
            }
        }

        let mut stages: Vec<Vec<String>> = Vec::new();
        for name in &ordered {
            let level = level_of[name];
            while stages.len() <= level {
                stages.push(Vec::new());
            }
            stages[level].push(name.to_string());
        }

        Ok(Self { stages })
    }

    /// Stages in execution order
    pub fn stages(&self) -> &[Vec<String>] {
        &self.stages
    }

    /// Every task in the plan, in stage order
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().flatten().map(|s| s.as_str())
    }

    pub fn task_count(&self) -> usize {
        self.stages.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommandSpec, Task};

    fn task(name: &str, deps: &[&str]) -> Task {
        Task {
            name: name.to_string(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            mode: Default::default(),
            inputs: vec![],
            outputs: vec![],
            run: CommandSpec {
                command: "/bin/true".to_string(),
                args: vec![],
                workdir: None,
                env: None,
            },
            timeout: None,
        }
    }

    fn registry(tasks: Vec<Task>) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for t in tasks {
            registry.register(t).unwrap();
        }
        registry
    }

    #[test]
    fn test_linear_chain_plan() {
        let registry = registry(vec![
            task("lint", &[]),
            task("compile", &["lint"]),
            task("bundle", &["compile"]),
            task("minify", &["bundle"]),
        ]);

        let plan = ExecutionPlan::build(&registry, &["minify".to_string()]).unwrap();
        let stages: Vec<Vec<String>> = plan.stages().to_vec();

        assert_eq!(
            stages,
            vec![
                vec!["lint".to_string()],
                vec!["compile".to_string()],
                vec!["bundle".to_string()],
                vec!["minify".to_string()],
            ]
        );
    }

    #[test]
    fn test_diamond_plan() {
        let registry = registry(vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ]);

        let plan = ExecutionPlan::build(&registry, &["d".to_string()]).unwrap();
        let stages = plan.stages();

        assert_eq!(stages.len(), 3);
        assert_eq!(stages[0], vec!["a"]);
        assert_eq!(stages[1], vec!["b", "c"]);
        assert_eq!(stages[2], vec!["d"]);
    }

    #[test]
    fn test_stage_tie_break_is_registration_order() {
        let registry = registry(vec![
            task("zeta", &[]),
            task("alpha", &[]),
            task("mid", &[]),
            task("top", &["zeta", "alpha", "mid"]),
        ]);

        let plan = ExecutionPlan::build(&registry, &["top".to_string()]).unwrap();
        // Not alphabetical: declared order wins
        assert_eq!(plan.stages()[0], vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_only_reachable_tasks_planned() {
        let registry = registry(vec![
            task("lint", &[]),
            task("compile", &["lint"]),
            task("docs", &[]), // unrelated branch
        ]);

        let plan = ExecutionPlan::build(&registry, &["compile".to_string()]).unwrap();
        let names: Vec<&str> = plan.task_names().collect();

        assert_eq!(names, vec!["lint", "compile"]);
        assert!(!names.contains(&"docs"));
    }

    #[test]
    fn test_cycle_names_every_member() {
        let registry = registry(vec![
            task("a", &["c"]),
            task("b", &["a"]),
            task("c", &["b"]),
        ]);

        let result = ExecutionPlan::build(&registry, &["a".to_string()]);
        match result {
            Err(StagehandError::CycleDetected(members)) => {
                assert_eq!(members.len(), 3);
                for name in ["a", "b", "c"] {
                    assert!(members.contains(&name.to_string()), "missing {name}");
                }
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_excludes_tasks_outside_loop() {
        let registry = registry(vec![
            task("entry", &[]),
            task("a", &["entry", "b"]),
            task("b", &["a"]),
        ]);

        let result = ExecutionPlan::build(&registry, &["b".to_string()]);
        match result {
            Err(StagehandError::CycleDetected(members)) => {
                assert_eq!(members.len(), 2);
                assert!(!members.contains(&"entry".to_string()));
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_dependency_aborts_plan() {
        let registry = registry(vec![task("minify", &["bundle"])]);

        let result = ExecutionPlan::build(&registry, &["minify".to_string()]);
        assert!(matches!(
            result,
            Err(StagehandError::UnknownDependency { task, dependency })
                if task == "minify" && dependency == "bundle"
        ));
    }

    #[test]
    fn test_unknown_root_fails() {
        let registry = registry(vec![task("lint", &[])]);

        let result = ExecutionPlan::build(&registry, &["missing".to_string()]);
        assert!(matches!(result, Err(StagehandError::TaskNotFound(_))));
    }

    #[test]
    fn test_dependents_closure() {
        let registry = registry(vec![
            task("lint", &[]),
            task("compile", &["lint"]),
            task("bundle", &["compile"]),
            task("docs", &[]),
        ]);

        let graph = TaskGraph::build(&registry).unwrap();
        let seeds: HashSet<String> = ["compile".to_string()].into();
        let closure = graph.dependents_closure(&seeds);

        assert!(closure.contains("compile"));
        assert!(closure.contains("bundle"));
        assert!(!closure.contains("lint"));
        assert!(!closure.contains("docs"));
    }

    #[test]
    fn test_restricted_plan_treats_outside_deps_satisfied() {
        let registry = registry(vec![
            task("lint", &[]),
            task("compile", &["lint"]),
            task("bundle", &["compile"]),
        ]);

        // Re-run only compile and bundle: lint is outside and assumed done
        let subset: HashSet<String> = ["compile".to_string(), "bundle".to_string()].into();
        let plan = ExecutionPlan::build_restricted(&registry, &subset).unwrap();

        assert_eq!(plan.stages().len(), 2);
        assert_eq!(plan.stages()[0], vec!["compile"]);
        assert_eq!(plan.stages()[1], vec!["bundle"]);
    }

    #[test]
    fn test_multiple_roots() {
        let registry = registry(vec![
            task("lint", &[]),
            task("compile", &["lint"]),
            task("docs", &[]),
        ]);

        let plan =
            ExecutionPlan::build(&registry, &["compile".to_string(), "docs".to_string()]).unwrap();
        let names: Vec<&str> = plan.task_names().collect();

        assert!(names.contains(&"docs"));
        assert!(names.contains(&"compile"));
        assert!(names.contains(&"lint"));
    }
}
