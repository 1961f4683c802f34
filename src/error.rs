//! Error types for stagehand

use thiserror::Error;

/// Stagehand error types
#[derive(Error, Debug)]
pub enum StagehandError {
    /// YAML parsing errors
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// Pipeline file exceeded the size limit
    #[error("Pipeline YAML exceeds 1MB limit (size: {0} bytes)")]
    YamlSizeExceeded(usize),

    /// Task count exceeded limit
    #[error("Task count {count} exceeds limit of {limit}")]
    TaskCountExceeded { count: usize, limit: usize },

    /// Task name validation error
    #[error("Task name '{name}' exceeds {max} characters")]
    TaskNameTooLong { name: String, max: usize },

    /// Invalid task name format
    #[error("Invalid task name '{name}': only alphanumeric, underscore, and dash allowed")]
    InvalidTaskName { name: String },

    /// Registering a task whose name is already taken
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    /// A dependency reference that no registered task satisfies
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    /// Lookup of a task name that was never registered
    #[error("No task named '{0}'")]
    TaskNotFound(String),

    /// Dependency edges form a cycle; carries every member of the cycle
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// A task action ran and reported failure
    #[error("Task '{task}' failed: {cause}")]
    TaskExecution { task: String, cause: String },

    /// Task action exceeded its timeout
    #[error("Task '{task}' timed out after {timeout} seconds")]
    TaskTimeout { task: String, timeout: u64 },

    /// Fingerprint store is unreadable; treated as cache-miss, never fatal
    #[error("Cache store corrupted or unreadable: {0}")]
    CacheCorruption(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias using StagehandError
pub type Result<T> = std::result::Result<T, StagehandError>;
