//! CLI interface for stagehand

use crate::cache::CacheStore;
use crate::engine::{Engine, RunOptions};
use crate::logging::{init_logging, parse_level, LogConfig, LogFormat};
use crate::models::{PipelineConfig, RunReport, TaskOutcome};
use crate::parser::{build_registry, parse_pipeline_file};
use crate::plan::ExecutionPlan;
use crate::registry::TaskRegistry;
use crate::templates;
use crate::watcher::WatchTrigger;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// stagehand - build task scheduler with dependency staging, incremental
/// caching and watch mode
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build task scheduler with dependency staging, incremental caching and watch mode", long_about = None)]
pub struct Cli {
    /// Path to the pipeline YAML file
    #[arg(short, long, default_value = "stagehand.yaml", global = true)]
    pub pipeline: PathBuf,

    /// Path to the fingerprint cache database, relative to the pipeline root
    #[arg(long, default_value = ".stagehand/cache.db", global = true)]
    pub cache_path: PathBuf,

    /// Worker pool size override (defaults to the pipeline's max_workers)
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    /// Treat every task as stale for this invocation
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Log format (pretty or json)
    #[arg(long, default_value = "pretty", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one or more tasks and their dependencies
    Run {
        /// Target task names
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// Run tasks, then re-run affected subgraphs on file changes
    Watch {
        /// Target task names
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// List registered tasks and their dependencies
    List,

    /// Validate the pipeline file and print the full execution plan
    Validate,

    /// Write a starter pipeline file
    Init {
        /// Template to write (omit to list available templates)
        #[arg(short = 't', long = "template")]
        template: Option<TemplateKind>,

        /// Overwrite an existing pipeline file
        #[arg(long)]
        force: bool,
    },
}

/// Available templates for the `init` subcommand.
#[derive(Debug, Clone, ValueEnum)]
pub enum TemplateKind {
    /// Single task, no dependencies or caching
    Minimal,
    /// Lint, compile, bundle, minify chain plus a dev server task
    Build,
}

impl TemplateKind {
    fn name(&self) -> &'static str {
        match self {
            TemplateKind::Minimal => "minimal",
            TemplateKind::Build => "build",
        }
    }
}

impl Cli {
    /// Initialize logging based on CLI arguments
    pub fn init_logging(&self) -> anyhow::Result<()> {
        let config = LogConfig {
            level: parse_level(&self.log_level)?,
            format: self.log_format.parse::<LogFormat>()?,
        };
        init_logging(&config)
    }

    /// Execute the CLI command
    pub async fn execute(&self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Run { tasks } => self.run_tasks(tasks).await?,
            Commands::Watch { tasks } => self.watch_tasks(tasks).await?,
            Commands::List => self.list_tasks()?,
            Commands::Validate => self.validate_pipeline()?,
            Commands::Init { template, force } => self.init_pipeline(template.as_ref(), *force)?,
        }
        Ok(())
    }

    /// Pipeline root directory: the directory holding the pipeline file
    fn pipeline_root(&self) -> anyhow::Result<PathBuf> {
        let parent = match self.pipeline.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        Ok(parent.canonicalize()?)
    }

    fn load(&self) -> anyhow::Result<(PipelineConfig, TaskRegistry)> {
        info!("Loading pipeline from: {:?}", self.pipeline);
        let config = parse_pipeline_file(&self.pipeline)?;
        let registry = build_registry(&config)?;
        info!(
            "Pipeline '{}' loaded with {} tasks",
            config.name,
            registry.len()
        );
        Ok((config, registry))
    }

    fn open_cache(&self, root: &Path) -> CacheStore {
        let path = if self.cache_path.is_absolute() {
            self.cache_path.clone()
        } else {
            root.join(&self.cache_path)
        };
        CacheStore::open_or_degrade(path)
    }

    fn run_options(&self, config: &PipelineConfig) -> RunOptions {
        RunOptions {
            max_workers: self.jobs.unwrap_or(config.config.max_workers),
            no_cache: self.no_cache,
        }
    }

    /// Run the requested tasks once
    async fn run_tasks(&self, tasks: &[String]) -> anyhow::Result<()> {
        let (config, registry) = self.load()?;
        let root = self.pipeline_root()?;

        let plan = ExecutionPlan::build(&registry, tasks)?;
        info!(
            "Plan: {} task(s) in {} stage(s)",
            plan.task_count(),
            plan.stages().len()
        );

        let engine = Engine::new(root.clone(), self.open_cache(&root));
        let opts = self.run_options(&config);

        let run_fut = engine.execute(&registry, &plan, &opts);
        tokio::pin!(run_fut);

        let report = tokio::select! {
            report = &mut run_fut => report?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, cancelling run");
                engine.cancel();
                (&mut run_fut).await?
            }
        };

        print_report(&report);

        if report.is_green() {
            Ok(())
        } else {
            let failed = report.failed().len();
            error!("Run failed ({} failed task(s))", failed);
            // Exit code carries the failed count; a cancelled-only run still
            // exits non-zero. Clamped to stay meaningful in the 8-bit range.
            std::process::exit(failed.clamp(1, 101) as i32);
        }
    }

    /// Run the requested tasks, then keep re-running affected subgraphs on
    /// file changes until interrupted
    async fn watch_tasks(&self, tasks: &[String]) -> anyhow::Result<()> {
        let (config, registry) = self.load()?;
        let root = self.pipeline_root()?;

        let plan = ExecutionPlan::build(&registry, tasks)?;
        let engine = Engine::new(root.clone(), self.open_cache(&root));
        let opts = self.run_options(&config);

        // Initial full run before watching
        let report = engine.execute(&registry, &plan, &opts).await?;
        print_report(&report);

        let trigger = WatchTrigger::new(
            &registry,
            root,
            tasks,
            Duration::from_millis(config.config.debounce_ms),
        )?;

        if trigger.binding_count() == 0 {
            println!("Note: no task in this plan declares inputs; nothing will re-trigger");
        }
        println!("Watching for changes (ctrl-c to stop)");

        trigger.run(&engine, &opts, print_report).await?;
        Ok(())
    }

    /// List registered task identifiers with mode and dependencies
    fn list_tasks(&self) -> anyhow::Result<()> {
        let (_, registry) = self.load()?;

        println!(
            "{:<24} {:<14} {}",
            "TASK", "MODE", "DEPENDS ON"
        );
        println!("{}", "-".repeat(70));

        for task in registry.tasks() {
            let mode = match task.mode {
                crate::models::ConcurrencyMode::ParallelSafe => "parallel-safe",
                crate::models::ConcurrencyMode::Exclusive => "exclusive",
            };
            let deps = if task.depends_on.is_empty() {
                "-".to_string()
            } else {
                task.depends_on.join(", ")
            };
            println!("{:<24} {:<14} {}", task.name, mode, deps);
        }

        Ok(())
    }

    /// Validate the pipeline without executing anything
    fn validate_pipeline(&self) -> anyhow::Result<()> {
        let (config, registry) = self.load()?;

        let roots: Vec<String> = registry.tasks().iter().map(|t| t.name.clone()).collect();
        let plan = ExecutionPlan::build(&registry, &roots)?;

        println!("Pipeline '{}' is valid", config.name);
        println!("Tasks: {}", registry.len());
        for (i, stage) in plan.stages().iter().enumerate() {
            println!("Stage {}: {}", i, stage.join(", "));
        }

        Ok(())
    }

    /// Write a starter pipeline file
    fn init_pipeline(&self, template: Option<&TemplateKind>, force: bool) -> anyhow::Result<()> {
        let Some(template) = template else {
            println!("Available templates:\n");
            println!("{:<12} {}", "TEMPLATE", "DESCRIPTION");
            println!("{}", "-".repeat(70));
            for info in templates::list_templates() {
                println!("{:<12} {}", info.name, info.description);
            }
            println!();
            println!("Usage: stagehand init --template <TEMPLATE>");
            return Ok(());
        };

        let content = templates::get_template(template.name())
            .ok_or_else(|| anyhow::anyhow!("Unknown template: {}", template.name()))?;

        if self.pipeline.exists() && !force {
            anyhow::bail!(
                "'{}' already exists. Pass --force to overwrite it.",
                self.pipeline.display()
            );
        }

        std::fs::write(&self.pipeline, content)?;
        println!("Wrote {} template to {}", template.name(), self.pipeline.display());
        Ok(())
    }
}

/// Print per-task status lines and a final summary
fn print_report(report: &RunReport) {
    println!();
    println!("{:<24} {:<28} {}", "TASK", "STATUS", "DURATION");
    println!("{}", "-".repeat(64));

    let mut counts = [0usize; 5];
    for result in &report.results {
        let duration = format_duration(result.duration);
        match &result.cause {
            Some(cause) => println!(
                "{:<24} {:<28} {:<10} ({})",
                result.name,
                result.outcome.to_string(),
                duration,
                cause
            ),
            None => println!(
                "{:<24} {:<28} {}",
                result.name,
                result.outcome.to_string(),
                duration
            ),
        }

        let slot = match result.outcome {
            TaskOutcome::Ok => 0,
            TaskOutcome::Skipped => 1,
            TaskOutcome::Failed => 2,
            TaskOutcome::SkippedDependencyFailed => 3,
            TaskOutcome::Cancelled => 4,
        };
        counts[slot] += 1;
    }

    println!();
    let verdict = if report.is_green() { "green" } else { "failed" };
    println!(
        "Run {}: {} ok, {} skipped, {} failed, {} skipped-dependency-failed, {} cancelled",
        verdict, counts[0], counts[1], counts[2], counts[3], counts[4]
    );
}

/// Format a duration as a compact human-readable string
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{}m {:.0}s", (secs / 60.0) as u64, secs % 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_command() {
        let cli = Cli::parse_from(["stagehand", "run", "minify"]);
        assert!(matches!(cli.command, Commands::Run { .. }));
    }

    #[test]
    fn test_cli_run_multiple_tasks() {
        let cli = Cli::parse_from(["stagehand", "run", "lint", "docs"]);
        if let Commands::Run { tasks } = &cli.command {
            assert_eq!(tasks, &vec!["lint".to_string(), "docs".to_string()]);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_run_requires_task() {
        assert!(Cli::try_parse_from(["stagehand", "run"]).is_err());
    }

    #[test]
    fn test_cli_watch_command() {
        let cli = Cli::parse_from(["stagehand", "watch", "minify"]);
        assert!(matches!(cli.command, Commands::Watch { .. }));
    }

    #[test]
    fn test_cli_list_command() {
        let cli = Cli::parse_from(["stagehand", "list"]);
        assert!(matches!(cli.command, Commands::List));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "stagehand",
            "--pipeline",
            "build/pipeline.yaml",
            "--jobs",
            "8",
            "--no-cache",
            "run",
            "minify",
        ]);
        assert_eq!(cli.pipeline, PathBuf::from("build/pipeline.yaml"));
        assert_eq!(cli.jobs, Some(8));
        assert!(cli.no_cache);
    }

    #[test]
    fn test_cli_init_defaults_to_listing() {
        let cli = Cli::parse_from(["stagehand", "init"]);
        assert!(matches!(
            cli.command,
            Commands::Init {
                template: None,
                force: false,
            }
        ));
    }

    #[test]
    fn test_cli_init_with_template() {
        let cli = Cli::parse_from(["stagehand", "init", "--template", "build"]);
        if let Commands::Init { template, .. } = &cli.command {
            assert!(matches!(template, Some(TemplateKind::Build)));
        } else {
            panic!("Expected Init command");
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(2)), "2.0s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
    }
}
