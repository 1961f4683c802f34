//! Shell command action
//!
//! Runs the task's command as a direct argv exec (no shell interpolation),
//! captures output, and enforces the task timeout and run cancellation.

use crate::actions::{
    rollback_new_outputs, snapshot_outputs, truncate_output_bytes, Action, ActionContext,
};
use crate::error::{Result, StagehandError};
use crate::models::{ActionResult, CommandSpec};
use crate::parser::validate_command_spec;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Action that executes a local command
#[derive(Debug, Clone)]
pub struct ShellAction {
    spec: CommandSpec,
}

impl ShellAction {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

/// Resolves once the cancellation signal fires; never resolves if the
/// sender side is gone (cancellation can no longer be requested).
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Action for ShellAction {
    async fn run(&self, ctx: &ActionContext) -> Result<ActionResult> {
        validate_command_spec(&self.spec)?;

        info!("Running command for task '{}': {}", ctx.task_name, self.spec.command);
        debug!("Command args: {:?}", self.spec.args);

        let before = snapshot_outputs(&ctx.root, &ctx.outputs);
        let start = std::time::Instant::now();

        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args);

        // Relative workdirs resolve against the pipeline root
        match &self.spec.workdir {
            Some(workdir) => cmd.current_dir(ctx.root.join(workdir)),
            None => cmd.current_dir(&ctx.root),
        };

        if let Some(env) = &self.spec.env {
            for (key, value) in env {
                cmd.env(key, value);
            }
        }

        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        // Kill the child when the future is dropped (timeout or cancel);
        // otherwise interrupted commands linger as orphans.
        cmd.kill_on_drop(true);

        let output_result = tokio::select! {
            out = tokio::time::timeout(Duration::from_secs(ctx.timeout_secs), cmd.output()) => out,
            _ = cancelled(ctx.cancel.clone()) => {
                error!("Task '{}' cancelled, rolling back new outputs", ctx.task_name);
                rollback_new_outputs(&ctx.root, &ctx.outputs, &before);
                return Err(StagehandError::TaskExecution {
                    task: ctx.task_name.clone(),
                    cause: "cancelled".to_string(),
                });
            }
        };

        let duration = start.elapsed();

        match output_result {
            Ok(Ok(output)) => {
                let (stdout, stdout_truncated) = truncate_output_bytes(&output.stdout);
                let (stderr, stderr_truncated) = truncate_output_bytes(&output.stderr);

                let success = output.status.success();
                if !success {
                    // Failed commands may have written partial outputs too
                    rollback_new_outputs(&ctx.root, &ctx.outputs, &before);
                }

                info!(
                    "Task '{}' command exited with code {:?} in {:?}",
                    ctx.task_name,
                    output.status.code(),
                    duration
                );

                Ok(ActionResult {
                    success,
                    exit_code: output.status.code(),
                    stdout,
                    stderr,
                    duration,
                    output_truncated: stdout_truncated || stderr_truncated,
                })
            }
            Ok(Err(e)) => {
                error!("Task '{}' could not launch command: {}", ctx.task_name, e);
                Err(StagehandError::Io(e))
            }
            Err(_) => {
                error!(
                    "Task '{}' timed out after {} seconds",
                    ctx.task_name, ctx.timeout_secs
                );
                rollback_new_outputs(&ctx.root, &ctx.outputs, &before);
                Err(StagehandError::TaskTimeout {
                    task: ctx.task_name.clone(),
                    timeout: ctx.timeout_secs,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn ctx(root: PathBuf, outputs: Vec<String>, timeout_secs: u64) -> ActionContext {
        // Sender dropped immediately: must never read as cancellation
        let (_tx, rx) = watch::channel(false);
        ActionContext {
            task_name: "test".to_string(),
            root,
            inputs: vec![],
            outputs,
            cancel: rx,
            timeout_secs,
        }
    }

    #[tokio::test]
    async fn test_shell_action_success() {
        let dir = TempDir::new().unwrap();
        let action = ShellAction::new(CommandSpec {
            command: "/bin/echo".to_string(),
            args: vec!["hello".to_string()],
            workdir: None,
            env: None,
        });

        let result = action.run(&ctx(dir.path().to_path_buf(), vec![], 10)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_shell_action_failure() {
        let dir = TempDir::new().unwrap();
        let action = ShellAction::new(CommandSpec {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "exit 1".to_string()],
            workdir: None,
            env: None,
        });

        let result = action.run(&ctx(dir.path().to_path_buf(), vec![], 10)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_shell_action_env() {
        let dir = TempDir::new().unwrap();
        let mut env = HashMap::new();
        env.insert("BUILD_MODE".to_string(), "release".to_string());

        let action = ShellAction::new(CommandSpec {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "echo $BUILD_MODE".to_string()],
            workdir: None,
            env: Some(env),
        });

        let result = action.run(&ctx(dir.path().to_path_buf(), vec![], 10)).await.unwrap();
        assert!(result.success);
        assert!(result.stdout.contains("release"));
    }

    #[tokio::test]
    async fn test_shell_action_runs_in_root_by_default() {
        let dir = TempDir::new().unwrap();
        let action = ShellAction::new(CommandSpec {
            command: "/bin/pwd".to_string(),
            args: vec![],
            workdir: None,
            env: None,
        });

        let result = action.run(&ctx(dir.path().to_path_buf(), vec![], 10)).await.unwrap();
        let reported = PathBuf::from(result.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_shell_action_timeout() {
        let dir = TempDir::new().unwrap();
        let action = ShellAction::new(CommandSpec {
            command: "/bin/sleep".to_string(),
            args: vec!["10".to_string()],
            workdir: None,
            env: None,
        });

        let result = action.run(&ctx(dir.path().to_path_buf(), vec![], 1)).await;
        assert!(matches!(result, Err(StagehandError::TaskTimeout { .. })));
    }

    #[tokio::test]
    async fn test_shell_action_cancellation_rolls_back_outputs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("dist")).unwrap();

        let (tx, rx) = watch::channel(false);
        let context = ActionContext {
            task_name: "slow".to_string(),
            root: root.clone(),
            inputs: vec![],
            outputs: vec!["dist/*.js".to_string()],
            cancel: rx,
            timeout_secs: 30,
        };

        let action = ShellAction::new(CommandSpec {
            command: "/bin/sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo partial > dist/out.js && sleep 10".to_string(),
            ],
            workdir: None,
            env: None,
        });

        let handle = tokio::spawn(async move { action.run(&context).await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(StagehandError::TaskExecution { cause, .. }) if cause == "cancelled"
        ));
        assert!(!root.join("dist/out.js").exists());
    }

    #[tokio::test]
    async fn test_failed_command_rolls_back_new_outputs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("dist")).unwrap();

        let action = ShellAction::new(CommandSpec {
            command: "/bin/sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo partial > dist/broken.js && exit 1".to_string(),
            ],
            workdir: None,
            env: None,
        });

        let result = action
            .run(&ctx(root.clone(), vec!["dist/*.js".to_string()], 10))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(!root.join("dist/broken.js").exists());
    }

    #[tokio::test]
    async fn test_invalid_command() {
        let dir = TempDir::new().unwrap();
        let action = ShellAction::new(CommandSpec {
            command: "/nonexistent/command".to_string(),
            args: vec![],
            workdir: None,
            env: None,
        });

        let result = action.run(&ctx(dir.path().to_path_buf(), vec![], 10)).await;
        assert!(result.is_err());
    }
}
