//! The pipeline driver: one gated run per revision.
//!
//! Stage order is fixed: leak scan, bootstrap, quality gates, unit
//! tests, release matrix. The leak scan runs exactly once and blocks
//! every matrix worker — a leaked credential halts the run before any
//! expensive build starts. Each stage's outcome is recorded on the
//! [`PipelineRun`]; a failure finalises the run as `Failed` but leaves
//! the reports of completed stages in place.
//!
//! Re-entrant by construction: every invocation creates a fresh
//! [`PipelineRun`], and nothing here mutates shared state between runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use gantry_core::{
    capture_head_sha, PipelineConfig, PipelineRun, PipelineState, ProjectManifest, StageOutcome,
    ToolchainSpec,
};
use gantry_env::{Bootstrapper, CommandRunner, ProcessRunner};

use crate::leak_scan::LeakScanner;
use crate::quality::{ci_stages, GateStage, QualityGateRunner};
use crate::release::{BuildCommandFactory, HostSysdeps, PlatformPrep, ReleaseBuilder};
use crate::runner::CommandSpec;
use crate::testing::{TestRunner, TestSuite};
use crate::trace::{write_run_trace, RunTrace};

/// Result of one driver invocation.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// The finalised run, stage outcomes included.
    pub run: PipelineRun,
    /// Where the trace was persisted, when writing succeeded.
    pub trace_path: Option<PathBuf>,
}

impl PipelineReport {
    /// True iff the run reached `Built` with every stage passing.
    pub fn success(&self) -> bool {
        self.run.state == PipelineState::Built
    }
}

/// Sequences the pipeline stages for one revision.
pub struct PipelineDriver {
    config: PipelineConfig,
    scanner: LeakScanner,
    env_runner: Arc<dyn CommandRunner>,
    lint_stages: Vec<GateStage>,
    test_command: Option<CommandSpec>,
    build_factory: Option<BuildCommandFactory>,
    prep: Arc<dyn PlatformPrep>,
}

impl PipelineDriver {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            scanner: LeakScanner::new(),
            env_runner: Arc::new(ProcessRunner::new()),
            lint_stages: ci_stages(),
            test_command: None,
            build_factory: None,
            prep: Arc::new(HostSysdeps),
            config,
        }
    }

    /// Override the command runner toolchain probes go through.
    pub fn with_env_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.env_runner = runner;
        self
    }

    /// Override the quality-gate stages.
    pub fn with_lint_stages(mut self, stages: Vec<GateStage>) -> Self {
        self.lint_stages = stages;
        self
    }

    /// Override the unit-test command.
    pub fn with_test_command(mut self, spec: CommandSpec) -> Self {
        self.test_command = Some(spec);
        self
    }

    /// Override the per-cell build command.
    pub fn with_build_factory(mut self, factory: BuildCommandFactory) -> Self {
        self.build_factory = Some(factory);
        self
    }

    /// Override the per-cell platform prep.
    pub fn with_prep(mut self, prep: Arc<dyn PlatformPrep>) -> Self {
        self.prep = prep;
        self
    }

    /// Execute the full pipeline for the workspace's current revision.
    pub async fn run(&self) -> anyhow::Result<PipelineReport> {
        let git_sha = capture_head_sha(&self.config.workspace)
            .unwrap_or_else(|_| "untracked".to_string());
        let toolchain_digest = ToolchainSpec::load(&self.config.pin_file)
            .map(|s| s.digest())
            .unwrap_or_else(|_| "unknown".to_string());

        let mut run = PipelineRun::new(git_sha, toolchain_digest);
        info!(run_id = %run.run_id, sha = %run.git_sha, "pipeline started");

        // -- Leak scan: first, once per revision, gates everything. ----
        let start = Instant::now();
        let scan = self.scanner.scan(&self.config.workspace)?;
        let scan_outcome = StageOutcome {
            stage: "leak_scan".to_string(),
            success: scan.clean(),
            exit_code: None,
            duration_ms: start.elapsed().as_millis() as u64,
            detail: if scan.clean() {
                format!("{} files scanned, clean", scan.files_scanned)
            } else {
                format!(
                    "{} finding(s), first at {}:{}",
                    scan.findings.len(),
                    scan.findings[0].path.display(),
                    scan.findings[0].line
                )
            },
        };
        let clean = scan.clean();
        run.record(scan_outcome);
        if !clean {
            return self.finalise_failed(run, "leak_scan");
        }
        run.advance(PipelineState::Scanned)?;

        // -- Bootstrap: toolchain pins. --------------------------------
        let start = Instant::now();
        let bootstrap_result = self.bootstrap().await;
        let (success, detail) = match &bootstrap_result {
            Ok(summary) => (true, summary.clone()),
            Err(e) => (false, e.to_string()),
        };
        run.record(StageOutcome {
            stage: "bootstrap".to_string(),
            success,
            exit_code: None,
            duration_ms: start.elapsed().as_millis() as u64,
            detail,
        });
        if !success {
            return self.finalise_failed(run, "bootstrap");
        }
        run.advance(PipelineState::Bootstrapped)?;

        // -- Quality gates: all of them, full report persisted. --------
        let gate_runner = QualityGateRunner::new(
            Some(self.config.workspace.clone()),
            self.config.stage_timeout_secs,
        );
        let gate_report = gate_runner
            .run_all_with_report(&self.lint_stages, &self.config.report_paths().lints_txt)
            .await?;
        for gate in &gate_report.outcomes {
            run.record(StageOutcome {
                stage: gate.stage.name.clone(),
                success: gate.passed(),
                exit_code: Some(gate.outcome.exit_code),
                duration_ms: gate.outcome.duration_ms,
                detail: String::new(),
            });
        }
        if !gate_report.passed() {
            return self.finalise_failed(run, "lints");
        }
        run.advance(PipelineState::Linted)?;

        // -- Unit tests. -----------------------------------------------
        let test_runner = TestRunner::new(self.config.clone());
        let test_outcome = match &self.test_command {
            Some(spec) => test_runner.run_with_command(spec).await?,
            None => test_runner.run(TestSuite::Unit).await?,
        };
        let passed = test_outcome.passed();
        run.record(StageOutcome {
            stage: "test.unit".to_string(),
            success: passed,
            exit_code: Some(test_outcome.exit_code),
            duration_ms: test_outcome.duration_ms,
            detail: String::new(),
        });
        if !passed {
            return self.finalise_failed(run, "test.unit");
        }
        run.advance(PipelineState::Tested)?;

        // -- Release matrix: concurrent isolated cells. ----------------
        let manifest = ProjectManifest::load(&self.config.manifest_path)?;
        let mut builder = ReleaseBuilder::new(
            self.config.clone(),
            manifest.project.name,
            manifest.project.version,
            run.git_sha.clone(),
        )
        .with_prep(Arc::clone(&self.prep));
        if let Some(factory) = &self.build_factory {
            builder = builder.with_command_factory(Arc::clone(factory));
        }

        let matrix_report = builder.build_all().await;
        for cell in &matrix_report.cells {
            run.record(StageOutcome {
                stage: format!("build.{}", cell.cell.label()),
                success: cell.passed(),
                exit_code: cell.build.as_ref().map(|b| b.exit_code),
                duration_ms: cell.build.as_ref().map(|b| b.duration_ms).unwrap_or(0),
                detail: cell.error.clone().unwrap_or_default(),
            });
        }
        if !matrix_report.all_passed() {
            return self.finalise_failed(run, "build");
        }
        run.advance(PipelineState::Built)?;
        run.complete()?;

        info!(run_id = %run.run_id, "pipeline completed");
        let trace_path = self.persist(&run);
        Ok(PipelineReport { run, trace_path })
    }

    async fn bootstrap(&self) -> anyhow::Result<String> {
        let spec = ToolchainSpec::load(&self.config.pin_file)?;
        let bootstrapper = Bootstrapper::new(
            spec,
            Arc::clone(&self.env_runner),
            self.config.strict,
        );
        let report = bootstrapper.verify().await?;
        Ok(format!(
            "{} tools verified, {} warnings",
            report.checks.len(),
            report.warnings.len()
        ))
    }

    fn finalise_failed(
        &self,
        mut run: PipelineRun,
        stage: &str,
    ) -> anyhow::Result<PipelineReport> {
        error!(run_id = %run.run_id, stage, "pipeline failed");
        run.fail()?;
        let trace_path = self.persist(&run);
        Ok(PipelineReport { run, trace_path })
    }

    fn persist(&self, run: &PipelineRun) -> Option<PathBuf> {
        RunTrace::from_run(run.clone())
            .and_then(|trace| write_run_trace(&trace, &self.config.runs_dir))
            .map_err(|e| error!(error = %e, "failed to write run trace"))
            .ok()
    }
}
