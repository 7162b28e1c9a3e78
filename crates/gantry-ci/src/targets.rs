//! The declarative target surface: name → {action, prerequisites}.
//!
//! The Makefile this engine replaces encoded its pipeline as recipes
//! with ad-hoc shell; here the same surface is data — a
//! [`TargetRegistry`] mapping dotted names to [`Action`]s over a
//! [`TargetGraph`] — plus one topological executor.
//!
//! Execution semantics: a failed target skips its dependents but never
//! aborts independent subtrees, so sibling sub-targets always run to
//! completion. Aggregator targets fan in over their prerequisites and
//! report the full failure set.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use gantry_core::{
    capture_head_sha, PipelineConfig, ProjectManifest, Result, StageOutcome, Target, TargetGraph,
    ToolchainSpec,
};
use gantry_env::{Bootstrapper, CommandRunner, ProcessRunner};

use crate::leak_scan::LeakScanner;
use crate::quality::{
    ci_stages, format_check_stages, format_stages, GateMode, GateStage, QualityGateRunner,
    QualityTool,
};
use crate::release::ReleaseBuilder;
use crate::runner::{CommandSpec, StageRunner};
use crate::testing::{TestRunner, TestSuite};

/// What a target does when it runs.
#[derive(Debug, Clone)]
pub enum Action {
    /// Run one external command.
    Command(CommandSpec),
    /// Run quality-gate stages to completion; optionally persist the
    /// combined output as a report file.
    Gates {
        stages: Vec<GateStage>,
        report: Option<PathBuf>,
    },
    /// Verify the toolchain pin file against the active environment.
    Bootstrap,
    /// Ensure the virtualenv exists, then install project dependencies.
    ProjectEnv,
    /// Run a test suite.
    Test(TestSuite),
    /// Remove test caches and reports.
    TestClean,
    /// Scan the tree for leaked secrets.
    LeakScan,
    /// Build and validate the full release matrix.
    BuildMatrix,
}

/// Result status of one target in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Passed,
    Failed,
    /// Not run because a prerequisite failed.
    Skipped,
}

/// Result of one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    pub name: String,
    pub status: TargetStatus,
    pub exit_code: Option<i32>,
    pub detail: String,
}

/// Results of executing one goal and its prerequisite closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRunReport {
    pub goal: String,
    pub results: Vec<TargetResult>,
}

impl TargetRunReport {
    /// True iff every planned target passed.
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.status == TargetStatus::Passed)
    }

    /// Failed targets, in execution order.
    pub fn failures(&self) -> Vec<&TargetResult> {
        self.results
            .iter()
            .filter(|r| r.status == TargetStatus::Failed)
            .collect()
    }

    /// First non-zero exit code observed, for propagation to the shell.
    pub fn first_nonzero_exit(&self) -> Option<i32> {
        self.results
            .iter()
            .filter_map(|r| r.exit_code)
            .find(|&c| c != 0)
    }
}

/// The target surface: graph plus per-target actions.
pub struct TargetRegistry {
    graph: TargetGraph,
    actions: HashMap<String, Action>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self {
            graph: TargetGraph::new(),
            actions: HashMap::new(),
        }
    }

    /// Register a target with its action and prerequisite names.
    /// Prerequisites must already be registered.
    pub fn register(
        &mut self,
        target: Target,
        action: Option<Action>,
        requires: &[&str],
    ) -> Result<()> {
        let name = target.name.clone();
        self.graph.add_target(target)?;
        for prerequisite in requires {
            self.graph.add_prerequisite(&name, prerequisite)?;
        }
        if let Some(action) = action {
            self.actions.insert(name, action);
        }
        Ok(())
    }

    /// The underlying graph (for `gantry graph` style listings).
    pub fn graph(&self) -> &TargetGraph {
        &self.graph
    }

    /// The stable CLI target surface, wired to the standard actions.
    ///
    /// Quality-gate and test targets require `setup.python` so the
    /// pinned-toolchain invariant holds no matter which target is
    /// invoked; the release build requires the full `setup`.
    pub fn standard(config: &PipelineConfig) -> Result<Self> {
        let mut registry = Self::new();
        let reports = config.report_paths();

        registry.register(
            Target::new("setup.sysdeps", "install system libraries"),
            Some(Action::Command(
                CommandSpec::new("setup.sysdeps", sysdeps_argv())
                    .with_timeout(config.stage_timeout_secs),
            )),
            &[],
        )?;
        registry.register(
            Target::new("setup.python", "verify toolchain pins"),
            Some(Action::Bootstrap),
            &[],
        )?;
        registry.register(
            Target::new("setup.project", "create venv and install dependencies"),
            Some(Action::ProjectEnv),
            &["setup.python"],
        )?;
        registry.register(
            Target::aggregator("setup", "bootstrap the environment"),
            None,
            &["setup.sysdeps", "setup.python", "setup.project"],
        )?;

        registry.register(
            Target::new("format", "apply formatters"),
            Some(Action::Gates {
                stages: format_stages(),
                report: None,
            }),
            &["setup.python"],
        )?;
        registry.register(
            Target::new("format.check", "assert formatting"),
            Some(Action::Gates {
                stages: format_check_stages(),
                report: None,
            }),
            &["setup.python"],
        )?;

        let mut linter_targets = Vec::new();
        for tool in QualityTool::LINTERS {
            let name = tool.target_name();
            registry.register(
                Target::new(name.clone(), format!("run {}", tool.name())),
                Some(Action::Gates {
                    stages: vec![GateStage::from_tool(tool, GateMode::Check).unwrap()],
                    report: None,
                }),
                &["setup.python"],
            )?;
            linter_targets.push(name);
        }
        let linter_refs: Vec<&str> = linter_targets.iter().map(String::as_str).collect();
        registry.register(
            Target::aggregator("lints", "all linters and the type checker"),
            None,
            &linter_refs,
        )?;
        registry.register(
            Target::new("lints.ci", "all checks, persisted to the lint report"),
            Some(Action::Gates {
                stages: ci_stages(),
                report: Some(reports.lints_txt.clone()),
            }),
            &["setup.python"],
        )?;

        registry.register(
            Target::new("test.unit", "unit tests with coverage"),
            Some(Action::Test(TestSuite::Unit)),
            &["setup.python"],
        )?;
        registry.register(
            Target::new("test.integration", "integration tests"),
            Some(Action::Test(TestSuite::Integration)),
            &["setup.python"],
        )?;
        registry.register(
            Target::new("test.clean", "remove test caches and reports"),
            Some(Action::TestClean),
            &[],
        )?;

        registry.register(
            Target::new("leak_scan", "scan the tree for secrets"),
            Some(Action::LeakScan),
            &[],
        )?;
        registry.register(
            Target::new("build.wheel", "build and validate the release matrix"),
            Some(Action::BuildMatrix),
            &["setup"],
        )?;

        Ok(registry)
    }

    /// Execute `goal` and its prerequisite closure in plan order.
    pub async fn execute(
        &self,
        executor: &TargetExecutor,
        goal: &str,
    ) -> Result<TargetRunReport> {
        let plan = self.graph.plan(goal)?;
        let mut statuses: HashMap<String, TargetStatus> = HashMap::new();
        let mut results = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            let name = step.target.name.as_str();
            let bad_requires: Vec<&str> = step
                .requires
                .iter()
                .filter(|r| statuses.get(*r) != Some(&TargetStatus::Passed))
                .map(String::as_str)
                .collect();

            let result = if step.target.aggregate {
                // Aggregators fan in: report every failed child, exit
                // non-zero if any failed. The children always ran —
                // they are plan steps with no edges between them.
                if bad_requires.is_empty() {
                    TargetResult {
                        name: name.to_string(),
                        status: TargetStatus::Passed,
                        exit_code: None,
                        detail: format!("{} prerequisites passed", step.requires.len()),
                    }
                } else {
                    TargetResult {
                        name: name.to_string(),
                        status: TargetStatus::Failed,
                        exit_code: Some(1),
                        detail: format!("failed: {}", bad_requires.join(", ")),
                    }
                }
            } else if !bad_requires.is_empty() {
                warn!(target = name, requires = ?bad_requires, "skipping: prerequisite failed");
                TargetResult {
                    name: name.to_string(),
                    status: TargetStatus::Skipped,
                    exit_code: None,
                    detail: format!("prerequisite failed: {}", bad_requires.join(", ")),
                }
            } else {
                match self.actions.get(name) {
                    Some(action) => {
                        let outcome = executor.run_action(name, action).await;
                        TargetResult {
                            name: name.to_string(),
                            status: if outcome.success {
                                TargetStatus::Passed
                            } else {
                                TargetStatus::Failed
                            },
                            exit_code: outcome.exit_code,
                            detail: outcome.detail,
                        }
                    }
                    // A registered target without an action is a no-op.
                    None => TargetResult {
                        name: name.to_string(),
                        status: TargetStatus::Passed,
                        exit_code: None,
                        detail: String::new(),
                    },
                }
            };

            info!(target = name, status = ?result.status, "target finished");
            statuses.insert(name.to_string(), result.status);
            results.push(result);
        }

        Ok(TargetRunReport {
            goal: goal.to_string(),
            results,
        })
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn sysdeps_argv() -> Vec<String> {
    // Host prep for local development; CI images branch in the release
    // builder's per-cell prep instead.
    ["apt-get", "install", "-y", "libssl-dev", "libatomic1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Runs [`Action`]s against one pipeline configuration.
pub struct TargetExecutor {
    config: PipelineConfig,
    env_runner: Arc<dyn CommandRunner>,
}

impl TargetExecutor {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            env_runner: Arc::new(ProcessRunner::new()),
        }
    }

    /// Override the command runner the bootstrap action probes with.
    pub fn with_env_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.env_runner = runner;
        self
    }

    async fn run_action(&self, name: &str, action: &Action) -> StageOutcome {
        let start = Instant::now();
        let (success, exit_code, detail) = match self.dispatch(action).await {
            Ok((exit_code, detail)) => (exit_code.unwrap_or(0) == 0, exit_code, detail),
            Err(e) => (false, None, e.to_string()),
        };
        StageOutcome {
            stage: name.to_string(),
            success,
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
            detail,
        }
    }

    async fn dispatch(&self, action: &Action) -> anyhow::Result<(Option<i32>, String)> {
        match action {
            Action::Command(spec) => {
                let outcome = StageRunner::execute(spec).await?;
                Ok((Some(outcome.exit_code), outcome.combined_output()))
            }

            Action::Gates { stages, report } => {
                let runner = QualityGateRunner::new(
                    Some(self.config.workspace.clone()),
                    self.config.stage_timeout_secs,
                );
                let gate_report = match report {
                    Some(path) => runner.run_all_with_report(stages, path).await?,
                    None => runner.run_all(stages).await?,
                };
                let detail = gate_report
                    .failures()
                    .iter()
                    .map(|f| f.stage.name.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok((
                    Some(gate_report.first_nonzero_exit().unwrap_or(0)),
                    if detail.is_empty() {
                        "all gates passed".to_string()
                    } else {
                        format!("failed: {detail}")
                    },
                ))
            }

            Action::Bootstrap => {
                let spec = ToolchainSpec::load(&self.config.pin_file)?;
                let bootstrapper = Bootstrapper::new(
                    spec,
                    Arc::clone(&self.env_runner),
                    self.config.strict,
                );
                let report = bootstrapper.verify().await?;
                Ok((
                    None,
                    format!(
                        "{} tools verified, {} warnings",
                        report.checks.len(),
                        report.warnings.len()
                    ),
                ))
            }

            Action::ProjectEnv => {
                let spec = ToolchainSpec::load(&self.config.pin_file)?;
                let bootstrapper = Bootstrapper::new(
                    spec,
                    Arc::clone(&self.env_runner),
                    self.config.strict,
                );
                let status = bootstrapper
                    .ensure_venv(&self.config.venv_dir, &self.config.interpreter)
                    .await?;
                let install = CommandSpec::new(
                    "setup.project",
                    vec!["poetry".to_string(), "install".to_string()],
                )
                .in_dir(&self.config.workspace)
                .with_timeout(self.config.stage_timeout_secs);
                let outcome = StageRunner::execute(&install).await?;
                Ok((
                    Some(outcome.exit_code),
                    format!("venv {status:?}, dependencies installed"),
                ))
            }

            Action::Test(suite) => {
                let runner = TestRunner::new(self.config.clone());
                let outcome = runner.run(*suite).await?;
                Ok((Some(outcome.exit_code), outcome.combined_output()))
            }

            Action::TestClean => {
                TestRunner::new(self.config.clone()).clean()?;
                Ok((None, "caches removed".to_string()))
            }

            Action::LeakScan => {
                let report = LeakScanner::new().scan(&self.config.workspace)?;
                if report.clean() {
                    Ok((None, format!("{} files scanned", report.files_scanned)))
                } else {
                    let first = &report.findings[0];
                    Err(anyhow::Error::new(gantry_core::GantryError::SecretLeak {
                        findings: report.findings.len(),
                    })
                    .context(format!(
                        "first finding at {}:{}",
                        first.path.display(),
                        first.line
                    )))
                }
            }

            Action::BuildMatrix => {
                // Stale wheels from another revision must never sit next
                // to (or get promoted with) this revision's artifacts.
                gantry_core::assert_clean_output_dir(&self.config.dist_dir)?;
                let manifest = ProjectManifest::load(&self.config.manifest_path)?;
                let sha = capture_head_sha(&self.config.workspace)
                    .unwrap_or_else(|_| "untracked".to_string());
                let builder = ReleaseBuilder::new(
                    self.config.clone(),
                    manifest.project.name,
                    manifest.project.version,
                    sha,
                );
                let report = builder.build_all().await;
                if report.all_passed() {
                    Ok((
                        Some(0),
                        format!("{} artifacts validated", report.validated_artifacts().len()),
                    ))
                } else {
                    Ok((
                        Some(report.first_nonzero_exit().unwrap_or(1)),
                        format!("failed cells: {}", report.failed_cells().join(", ")),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn command(name: &str, argv: &[&str]) -> Action {
        Action::Command(CommandSpec::new(
            name,
            argv.iter().map(|s| s.to_string()).collect(),
        ))
    }

    fn registry_with_lints() -> TargetRegistry {
        // lints aggregates four sub-tools: two fail, two pass.
        let mut registry = TargetRegistry::new();
        for (name, ok) in [
            ("lints.ruff", false),
            ("lints.flake8", true),
            ("lints.pylint", false),
            ("lints.mypy", true),
        ] {
            let argv: &[&str] = if ok { &["echo", "ok"] } else { &["false"] };
            registry
                .register(Target::new(name, name), Some(command(name, argv)), &[])
                .unwrap();
        }
        registry
            .register(
                Target::aggregator("lints", "all linters"),
                None,
                &["lints.ruff", "lints.flake8", "lints.pylint", "lints.mypy"],
            )
            .unwrap();
        registry
    }

    fn executor() -> (tempfile::TempDir, TargetExecutor) {
        let dir = tempdir().unwrap();
        let executor = TargetExecutor::new(PipelineConfig::for_workspace(dir.path()));
        (dir, executor)
    }

    #[tokio::test]
    async fn test_aggregate_runs_all_children_and_reports_all_failures() {
        let registry = registry_with_lints();
        let (_dir, executor) = executor();
        let report = registry.execute(&executor, "lints").await.unwrap();

        // All four children ran despite two failures (plan order is
        // alphabetical among independent siblings).
        assert_eq!(report.results.len(), 5);
        let failures: Vec<&str> = report.failures().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failures, vec!["lints.pylint", "lints.ruff", "lints"]);

        let aggregate = report.results.last().unwrap();
        assert_eq!(aggregate.status, TargetStatus::Failed);
        assert!(aggregate.detail.contains("lints.ruff"));
        assert!(aggregate.detail.contains("lints.pylint"));
        assert!(report.first_nonzero_exit().is_some());
        assert!(!report.success());
    }

    #[tokio::test]
    async fn test_failed_prerequisite_skips_dependents() {
        let mut registry = TargetRegistry::new();
        registry
            .register(
                Target::new("setup", "setup"),
                Some(command("setup", &["false"])),
                &[],
            )
            .unwrap();
        registry
            .register(
                Target::new("test_unit", "tests"),
                Some(command("test_unit", &["echo", "never runs"])),
                &["setup"],
            )
            .unwrap();

        let (_dir, executor) = executor();
        let report = registry.execute(&executor, "test_unit").await.unwrap();
        assert_eq!(report.results[0].status, TargetStatus::Failed);
        assert_eq!(report.results[1].status, TargetStatus::Skipped);
        assert!(report.results[1].detail.contains("setup"));
        assert!(!report.success());
    }

    #[tokio::test]
    async fn test_independent_subtree_still_runs_after_failure() {
        let mut registry = TargetRegistry::new();
        registry
            .register(
                Target::new("bad", "bad"),
                Some(command("bad", &["false"])),
                &[],
            )
            .unwrap();
        registry
            .register(
                Target::new("good", "good"),
                Some(command("good", &["echo", "ok"])),
                &[],
            )
            .unwrap();
        registry
            .register(Target::aggregator("all", "all"), None, &["bad", "good"])
            .unwrap();

        let (_dir, executor) = executor();
        let report = registry.execute(&executor, "all").await.unwrap();
        let good = report.results.iter().find(|r| r.name == "good").unwrap();
        assert_eq!(good.status, TargetStatus::Passed);
    }

    #[tokio::test]
    async fn test_all_passing_goal_succeeds() {
        let mut registry = TargetRegistry::new();
        registry
            .register(
                Target::new("one", "one"),
                Some(command("one", &["echo", "1"])),
                &[],
            )
            .unwrap();
        registry
            .register(
                Target::new("two", "two"),
                Some(command("two", &["echo", "2"])),
                &["one"],
            )
            .unwrap();

        let (_dir, executor) = executor();
        let report = registry.execute(&executor, "two").await.unwrap();
        assert!(report.success());
        assert_eq!(report.first_nonzero_exit(), None);
    }

    #[test]
    fn test_standard_surface_has_the_stable_target_names() {
        let config = PipelineConfig::for_workspace("/work/acme");
        let registry = TargetRegistry::standard(&config).unwrap();
        let names = registry.graph().target_names();

        for expected in [
            "setup",
            "setup.sysdeps",
            "setup.python",
            "setup.project",
            "format",
            "format.check",
            "lints",
            "lints.ruff",
            "lints.flake8",
            "lints.pylint",
            "lints.mypy",
            "lints.ci",
            "test.unit",
            "test.integration",
            "test.clean",
            "build.wheel",
        ] {
            assert!(names.contains(&expected), "missing target {expected}");
        }
    }

    #[test]
    fn test_standard_quality_targets_require_the_version_gate() {
        let config = PipelineConfig::for_workspace("/work/acme");
        let registry = TargetRegistry::standard(&config).unwrap();

        for target in ["format", "lints.mypy", "test.unit", "test.integration"] {
            let prereqs: Vec<&str> = registry
                .graph()
                .prerequisites_of(target)
                .unwrap()
                .iter()
                .map(|t| t.name.as_str())
                .collect();
            assert!(
                prereqs.contains(&"setup.python"),
                "{target} must be gated on the toolchain check"
            );
        }
    }
}
