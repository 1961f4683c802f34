//! Task registry: holds registered tasks in registration order
//!
//! Registration fails fast on duplicate names and self-dependencies.
//! Forward references to not-yet-registered dependencies are accepted;
//! they are checked during plan construction so that pipeline files may
//! declare tasks in any order.

use crate::error::{Result, StagehandError};
use crate::models::Task;
use std::collections::HashMap;

/// Registry of build tasks
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task.
    ///
    /// Fails with `DuplicateTask` if the name is taken, or `CycleDetected`
    /// if the task names itself as a dependency.
    pub fn register(&mut self, task: Task) -> Result<()> {
        if self.index.contains_key(&task.name) {
            return Err(StagehandError::DuplicateTask(task.name));
        }

        if task.depends_on.iter().any(|d| *d == task.name) {
            return Err(StagehandError::CycleDetected(vec![task.name]));
        }

        self.index.insert(task.name.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    /// Look up a task by name
    pub fn lookup(&self, name: &str) -> Result<&Task> {
        self.index
            .get(name)
            .map(|&i| &self.tasks[i])
            .ok_or_else(|| StagehandError::TaskNotFound(name.to_string()))
    }

    /// Registration index of a task, used for deterministic stage ordering
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Tasks in registration order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommandSpec;

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

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TaskRegistry::new();
        registry.register(task("lint", &[])).unwrap();
        registry.register(task("compile", &["lint"])).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("lint").unwrap().name, "lint");
        assert_eq!(registry.lookup("compile").unwrap().depends_on, vec!["lint"]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = TaskRegistry::new();
        registry.register(task("lint", &[])).unwrap();

        let result = registry.register(task("lint", &[]));
        assert!(matches!(result, Err(StagehandError::DuplicateTask(name)) if name == "lint"));
    }

    #[test]
    fn test_self_dependency_fails_fast() {
        let mut registry = TaskRegistry::new();
        let result = registry.register(task("loop", &["loop"]));
        assert!(matches!(result, Err(StagehandError::CycleDetected(members)) if members == vec!["loop"]));
    }

    #[test]
    fn test_lookup_unknown_fails() {
        let registry = TaskRegistry::new();
        let result = registry.lookup("missing");
        assert!(matches!(result, Err(StagehandError::TaskNotFound(name)) if name == "missing"));
    }

    #[test]
    fn test_forward_reference_accepted() {
        let mut registry = TaskRegistry::new();
        // "bundle" is not registered yet; accepted here, checked at plan time
        registry.register(task("minify", &["bundle"])).unwrap();
        registry.register(task("bundle", &[])).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut registry = TaskRegistry::new();
        registry.register(task("c", &[])).unwrap();
        registry.register(task("a", &[])).unwrap();
        registry.register(task("b", &[])).unwrap();

        let names: Vec<_> = registry.tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(registry.position("a"), Some(1));
    }
}
