//! Starter pipeline templates for `stagehand init`

/// Metadata for a template type.
#[derive(Debug, Clone)]
pub struct TemplateInfo {
    /// Template name (matches the CLI `--template` value).
    pub name: &'static str,
    /// Short description shown in the listing table.
    pub description: &'static str,
}

/// Returns metadata for every available template.
pub fn list_templates() -> Vec<TemplateInfo> {
    vec![
        TemplateInfo {
            name: "minimal",
            description: "Single task, no dependencies or caching",
        },
        TemplateInfo {
            name: "build",
            description: "Lint, compile, bundle, minify chain plus a dev server task",
        },
    ]
}

/// Returns the YAML content for a given template type.
pub fn get_template(template_type: &str) -> Option<&'static str> {
    match template_type {
        "minimal" => Some(TEMPLATE_MINIMAL),
        "build" => Some(TEMPLATE_BUILD),
        _ => None,
    }
}

/// Bare-minimum pipeline: one task, nothing declared.
const TEMPLATE_MINIMAL: &str = r#"# stagehand pipeline — minimal example
# A single task with no dependencies. Without declared inputs the task is
# never cache-skipped.
name: minimal

tasks:
  - name: hello
    run:
      command: "/bin/echo"
      args: ["hello from stagehand"]
"#;

/// Typical library build: a linear tool chain with incremental caching and
/// a long-running dev server kept separate from the build graph.
const TEMPLATE_BUILD: &str = r#"# stagehand pipeline — library build
# A lint -> compile -> bundle -> minify chain. Declared inputs make each
# step incremental: `stagehand run minify` twice in a row skips everything
# the second time, and `stagehand watch minify` re-runs only the steps
# downstream of what changed.
name: library-build
description: "Compile, bundle and minify a TypeScript library"

config:
  max_workers: 4
  timeout_default: 300
  debounce_ms: 300

tasks:
  - name: lint
    inputs: ["src/**/*.ts", "tslint.json"]
    run:
      command: "/usr/local/bin/tslint"
      args: ["-p", "."]

  - name: compile
    depends_on: [lint]
    inputs: ["src/**/*.ts", "tsconfig.json"]
    outputs: ["dist/**/*.js", "dist/**/*.d.ts"]
    run:
      command: "/usr/local/bin/tsc"
      args: ["-p", "."]

  - name: bundle
    depends_on: [compile]
    inputs: ["dist/**/*.js"]
    outputs: ["bundles/lib.umd.js"]
    run:
      command: "/usr/local/bin/rollup"
      args: ["dist/index.js", "--file", "bundles/lib.umd.js", "--format", "umd"]

  - name: minify
    depends_on: [bundle]
    mode: exclusive
    inputs: ["bundles/lib.umd.js"]
    outputs: ["bundles/lib.umd.min.js"]
    run:
      command: "/usr/local/bin/uglifyjs"
      args: ["bundles/lib.umd.js", "-o", "bundles/lib.umd.min.js"]

  # The dev server is an ordinary task, not part of the build chain; run it
  # directly with `stagehand run serve` when needed.
  - name: serve
    timeout: 86400
    run:
      command: "/usr/local/bin/webpack-dev-server"
      args: ["--port", "9000"]
"#;
