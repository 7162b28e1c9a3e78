//! Gantry - build orchestration CLI
//!
//! The `gantry` command drives the project's target graph and CI
//! pipeline for mixed Python/Rust wheel projects.
//!
//! ## Commands
//!
//! - `run <target>`: execute one target and its prerequisites
//!   (`setup`, `format`, `format.check`, `lints`, `lints.<tool>`,
//!   `lints.ci`, `test.unit`, `test.integration`, `test.clean`,
//!   `build.wheel`, `leak_scan`)
//! - `pipeline`: run the full gated pipeline for the current revision
//! - `targets`: list the target surface with prerequisites
//! - `matrix`: show the release matrix cells and wheel names

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use gantry_ci::{PipelineDriver, TargetExecutor, TargetRegistry};
use gantry_core::{init_tracing, PipelineConfig, ProjectManifest};

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build orchestration for mixed Python/Rust wheel projects", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project workspace root
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Downgrade a missing tool-version manager to a warning
    /// (for CI images without one); version mismatches stay fatal
    #[arg(long, global = true)]
    lenient: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one target and its prerequisite closure
    Run {
        /// Dotted target name, e.g. `lints.mypy`
        target: String,
    },

    /// Run the full gated pipeline: leak scan, bootstrap, quality
    /// gates, unit tests, release matrix
    Pipeline,

    /// List every target with its prerequisites
    Targets,

    /// Show the release matrix cells
    Matrix,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let mut config = PipelineConfig::for_workspace(&cli.workspace);
    if cli.lenient {
        config = config.lenient();
    }

    match cli.command {
        Commands::Run { target } => run_target(config, &target).await,
        Commands::Pipeline => run_pipeline(config).await,
        Commands::Targets => list_targets(config),
        Commands::Matrix => show_matrix(config),
    }
}

async fn run_target(config: PipelineConfig, target: &str) -> Result<()> {
    let registry = TargetRegistry::standard(&config)?;
    let executor = TargetExecutor::new(config);

    let report = registry
        .execute(&executor, target)
        .await
        .with_context(|| format!("target {target} failed to execute"))?;

    for result in &report.results {
        let marker = match result.status {
            gantry_ci::TargetStatus::Passed => "ok",
            gantry_ci::TargetStatus::Failed => "FAILED",
            gantry_ci::TargetStatus::Skipped => "skipped",
        };
        if result.detail.is_empty() {
            println!("{:<24} {marker}", result.name);
        } else {
            println!("{:<24} {marker}  ({})", result.name, result.detail);
        }
    }

    if !report.success() {
        // Propagate the first non-zero exit code a child produced.
        std::process::exit(report.first_nonzero_exit().unwrap_or(1));
    }
    Ok(())
}

async fn run_pipeline(config: PipelineConfig) -> Result<()> {
    let report = PipelineDriver::new(config).run().await?;

    println!("run {} [{}]", report.run.run_id, report.run.state.name());
    for stage in &report.run.stages {
        let marker = if stage.success { "ok" } else { "FAILED" };
        println!("  {:<24} {marker}  {}ms", stage.stage, stage.duration_ms);
    }
    if let Some(path) = &report.trace_path {
        println!("trace: {}", path.display());
    }

    if !report.success() {
        if let Some(stage) = report.run.first_failed_stage() {
            eprintln!("pipeline failed at stage: {stage}");
        }
        std::process::exit(report.run.first_nonzero_exit().unwrap_or(1));
    }
    Ok(())
}

fn list_targets(config: PipelineConfig) -> Result<()> {
    let registry = TargetRegistry::standard(&config)?;
    for name in registry.graph().target_names() {
        let target = registry.graph().get(name).expect("listed target exists");
        let prereqs: Vec<&str> = registry
            .graph()
            .prerequisites_of(name)?
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        if prereqs.is_empty() {
            println!("{:<20} {}", target.name, target.description);
        } else {
            println!(
                "{:<20} {}  (requires: {})",
                target.name,
                target.description,
                prereqs.join(", ")
            );
        }
    }
    Ok(())
}

fn show_matrix(config: PipelineConfig) -> Result<()> {
    let manifest = ProjectManifest::load(&config.manifest_path).ok();
    for cell in config.matrix.expand() {
        match &manifest {
            Some(m) => println!(
                "{:<16} {:<28} {}",
                cell.label(),
                cell.target_triple(),
                cell.wheel_filename(&m.project.name, &m.project.version, &config.interpreter_tag)
            ),
            None => println!("{:<16} {:<28} {}", cell.label(), cell.target_triple(), cell.platform_tag()),
        }
    }
    Ok(())
}
