//! Pipeline YAML parser with validation
//!
//! Loads a pipeline file, enforces resource and naming limits, applies
//! global defaults, and feeds the task registry. Dependency references are
//! not resolved here; the resolver checks them when a plan is built, so
//! tasks may be declared in any order.

use crate::error::{Result, StagehandError};
use crate::models::*;
use crate::registry::TaskRegistry;
use std::fs;
use std::path::Path;

/// Parse a pipeline configuration from a YAML file.
///
/// Enforces the validation limits:
/// - file size <= 1MB
/// - task count <= 1,000
/// - task names alphanumeric + underscore/dash, <= 64 chars
/// - command specs within argument limits, no `..` traversal in workdirs
///
/// # Example
///
/// ```no_run
/// use stagehand::parser::parse_pipeline_file;
///
/// let config = parse_pipeline_file("stagehand.yaml")?;
/// println!("Loaded pipeline: {}", config.name);
/// # Ok::<(), stagehand::error::StagehandError>(())
/// ```
pub fn parse_pipeline_file<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let content = fs::read_to_string(path)?;
    parse_pipeline_yaml(&content)
}

/// Parse a pipeline configuration from a YAML string.
///
/// Prefer [`parse_pipeline_file`] for loading from disk.
pub fn parse_pipeline_yaml(content: &str) -> Result<PipelineConfig> {
    if content.len() > MAX_YAML_SIZE {
        return Err(StagehandError::YamlSizeExceeded(content.len()));
    }

    let mut config: PipelineConfig = serde_yaml::from_str(content)?;

    if config.tasks.len() > MAX_TASK_COUNT {
        return Err(StagehandError::TaskCountExceeded {
            count: config.tasks.len(),
            limit: MAX_TASK_COUNT,
        });
    }

    for task in &config.tasks {
        validate_task_name(&task.name)?;
        validate_command_spec(&task.run)?;
    }

    if config.config.max_workers == 0 {
        return Err(StagehandError::Validation(
            "max_workers must be at least 1 to avoid deadlock".to_string(),
        ));
    }
    if config.config.max_workers > 256 {
        return Err(StagehandError::Validation(
            "max_workers must be at most 256 to prevent resource exhaustion".to_string(),
        ));
    }

    apply_defaults(&mut config);

    Ok(config)
}

/// Register every task from a parsed pipeline.
///
/// Duplicate names and self-dependencies surface here; unknown dependency
/// references surface at plan construction.
pub fn build_registry(config: &PipelineConfig) -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    for task in &config.tasks {
        registry.register(task.clone())?;
    }
    Ok(registry)
}

/// Validate task name format and length
fn validate_task_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StagehandError::InvalidTaskName {
            name: name.to_string(),
        });
    }

    if name.len() > MAX_TASK_NAME_LEN {
        return Err(StagehandError::TaskNameTooLong {
            name: name.to_string(),
            max: MAX_TASK_NAME_LEN,
        });
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(StagehandError::InvalidTaskName {
            name: name.to_string(),
        });
    }

    Ok(())
}

/// Validate a command spec before execution.
///
/// Commands must be absolute paths (no PATH lookup, no shell interpolation);
/// argument counts and sizes are capped; workdirs may be relative to the
/// pipeline root but must not traverse upward.
pub fn validate_command_spec(spec: &CommandSpec) -> Result<()> {
    if !spec.command.starts_with('/') {
        return Err(StagehandError::Validation(format!(
            "Command '{}' must be an absolute path",
            spec.command
        )));
    }

    if spec.args.len() > MAX_ARG_COUNT {
        return Err(StagehandError::Validation(format!(
            "Argument count {} exceeds limit of {}",
            spec.args.len(),
            MAX_ARG_COUNT
        )));
    }

    for arg in &spec.args {
        if arg.len() > MAX_ARG_LEN {
            return Err(StagehandError::Validation(format!(
                "Argument exceeds {} bytes",
                MAX_ARG_LEN
            )));
        }
    }

    if let Some(workdir) = &spec.workdir {
        if workdir.split('/').any(|part| part == "..") {
            return Err(StagehandError::Validation(format!(
                "Workdir '{}' must not traverse outside the pipeline root",
                workdir
            )));
        }
    }

    Ok(())
}

/// Apply global defaults to task configurations
fn apply_defaults(config: &mut PipelineConfig) {
    for task in &mut config.tasks {
        if task.timeout.is_none() {
            task.timeout = Some(config.config.timeout_default);
        }
    }
}
