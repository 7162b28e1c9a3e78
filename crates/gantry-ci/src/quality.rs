//! Quality gates: formatters and static analyzers.
//!
//! Every tool runs in one of two modes: `Apply` mutates the tree into
//! conformance, `Check` exits non-zero on violations without touching
//! anything. Tools run in a fixed order — import sorting, then code
//! formatting, then the static linters and the type checker.
//!
//! The umbrella gate runs *every* stage to completion and reports the
//! full failure set; a single invocation surfaces every violation
//! instead of stopping at the first bad tool.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::runner::{CommandOutcome, CommandSpec, StageRunner};

/// Builtin quality tools, in canonical execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QualityTool {
    /// Import sorting (formatter).
    Isort,
    /// Code formatting (formatter).
    Black,
    /// Fast linter.
    Ruff,
    /// Style linter.
    Flake8,
    /// Deep linter.
    Pylint,
    /// Type checker.
    Mypy,
}

impl QualityTool {
    /// All tools in canonical order.
    pub const ALL: [QualityTool; 6] = [
        QualityTool::Isort,
        QualityTool::Black,
        QualityTool::Ruff,
        QualityTool::Flake8,
        QualityTool::Pylint,
        QualityTool::Mypy,
    ];

    /// The formatters, in apply order.
    pub const FORMATTERS: [QualityTool; 2] = [QualityTool::Isort, QualityTool::Black];

    /// The check-only linters and type checker, in order.
    pub const LINTERS: [QualityTool; 4] = [
        QualityTool::Ruff,
        QualityTool::Flake8,
        QualityTool::Pylint,
        QualityTool::Mypy,
    ];

    /// Tool name as invoked.
    pub fn name(&self) -> &'static str {
        match self {
            QualityTool::Isort => "isort",
            QualityTool::Black => "black",
            QualityTool::Ruff => "ruff",
            QualityTool::Flake8 => "flake8",
            QualityTool::Pylint => "pylint",
            QualityTool::Mypy => "mypy",
        }
    }

    /// Dotted target name (`lints.mypy`).
    pub fn target_name(&self) -> String {
        format!("lints.{}", self.name())
    }

    /// True for tools that can mutate the tree.
    pub fn is_formatter(&self) -> bool {
        matches!(self, QualityTool::Isort | QualityTool::Black)
    }

    /// Command line for `Apply` mode. `None` for check-only tools.
    pub fn apply_argv(&self) -> Option<Vec<String>> {
        match self {
            QualityTool::Isort => Some(vec!["isort".into(), ".".into()]),
            QualityTool::Black => Some(vec!["black".into(), ".".into()]),
            _ => None,
        }
    }

    /// Command line for `Check` mode.
    pub fn check_argv(&self) -> Vec<String> {
        match self {
            QualityTool::Isort => vec!["isort".into(), "--check-only".into(), ".".into()],
            QualityTool::Black => vec!["black".into(), "--check".into(), ".".into()],
            QualityTool::Ruff => vec!["ruff".into(), "check".into(), ".".into()],
            QualityTool::Flake8 => vec!["flake8".into(), ".".into()],
            QualityTool::Pylint => vec!["pylint".into(), ".".into()],
            QualityTool::Mypy => vec!["mypy".into(), ".".into()],
        }
    }
}

/// Gate execution mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Mutate the tree into conformance (formatters only).
    Apply,
    /// Assert conformance without mutating.
    Check,
}

/// One configured gate stage: a tool in a mode, resolved to a command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateStage {
    /// Stage name (`lints.mypy`, `format.black`).
    pub name: String,
    /// Resolved command line.
    pub argv: Vec<String>,
    /// Mode the stage runs in.
    pub mode: GateMode,
}

impl GateStage {
    /// Build a stage for a builtin tool. Returns `None` when `Apply` is
    /// requested for a check-only tool.
    pub fn from_tool(tool: QualityTool, mode: GateMode) -> Option<Self> {
        let (name, argv) = match mode {
            GateMode::Apply => (format!("format.{}", tool.name()), tool.apply_argv()?),
            GateMode::Check => (tool.target_name(), tool.check_argv()),
        };
        Some(Self { name, argv, mode })
    }

    /// A stage with an explicit command (tests, project-local tools).
    pub fn custom(name: impl Into<String>, argv: Vec<String>, mode: GateMode) -> Self {
        Self {
            name: name.into(),
            argv,
            mode,
        }
    }
}

/// The `format` target: formatters in apply order.
pub fn format_stages() -> Vec<GateStage> {
    QualityTool::FORMATTERS
        .iter()
        .filter_map(|&t| GateStage::from_tool(t, GateMode::Apply))
        .collect()
}

/// The `format.check` target: formatters in check mode, same order.
pub fn format_check_stages() -> Vec<GateStage> {
    QualityTool::FORMATTERS
        .iter()
        .filter_map(|&t| GateStage::from_tool(t, GateMode::Check))
        .collect()
}

/// The `lints` target: linters and type checker in check mode.
pub fn lint_stages() -> Vec<GateStage> {
    QualityTool::LINTERS
        .iter()
        .filter_map(|&t| GateStage::from_tool(t, GateMode::Check))
        .collect()
}

/// The `lints.ci` target: `format.check` plus every linter.
pub fn ci_stages() -> Vec<GateStage> {
    let mut stages = format_check_stages();
    stages.extend(lint_stages());
    stages
}

/// Result of one gate stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateOutcome {
    pub stage: GateStage,
    pub outcome: CommandOutcome,
}

impl GateOutcome {
    pub fn passed(&self) -> bool {
        self.outcome.passed()
    }
}

/// Aggregated result of a gate run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub outcomes: Vec<GateOutcome>,
}

impl GateReport {
    /// True iff every stage passed.
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(GateOutcome::passed)
    }

    /// The failed stages, in execution order.
    pub fn failures(&self) -> Vec<&GateOutcome> {
        self.outcomes.iter().filter(|o| !o.passed()).collect()
    }

    /// First non-zero exit code across stages, for propagation.
    pub fn first_nonzero_exit(&self) -> Option<i32> {
        self.outcomes
            .iter()
            .map(|o| o.outcome.exit_code)
            .find(|&c| c != 0)
    }

    /// Render the combined tool output as a plain-text report.
    pub fn render_text(&self) -> String {
        let mut text = String::new();
        for gate in &self.outcomes {
            text.push_str(&format!(
                "==== {} (exit {}) ====\n",
                gate.stage.name, gate.outcome.exit_code
            ));
            let output = gate.outcome.combined_output();
            if !output.is_empty() {
                text.push_str(&output);
                if !output.ends_with('\n') {
                    text.push('\n');
                }
            }
        }
        text
    }
}

/// Runs gate stages in order, to completion, without short-circuiting.
#[derive(Debug, Clone, Default)]
pub struct QualityGateRunner {
    /// Working directory for every tool (inherit when `None`).
    pub cwd: Option<PathBuf>,
    /// Per-stage timeout in seconds (0 = none).
    pub timeout_secs: u64,
}

impl QualityGateRunner {
    pub fn new(cwd: Option<PathBuf>, timeout_secs: u64) -> Self {
        Self { cwd, timeout_secs }
    }

    /// Run every stage in order. All stages execute even when earlier
    /// ones fail; the report carries the full failure set.
    pub async fn run_all(&self, stages: &[GateStage]) -> anyhow::Result<GateReport> {
        let mut outcomes = Vec::with_capacity(stages.len());

        for stage in stages {
            let mut spec = CommandSpec::new(stage.name.clone(), stage.argv.clone())
                .with_timeout(self.timeout_secs);
            if let Some(cwd) = &self.cwd {
                spec = spec.in_dir(cwd);
            }

            let outcome = StageRunner::execute(&spec).await?;
            if outcome.passed() {
                info!(stage = %stage.name, "gate passed");
            } else {
                warn!(stage = %stage.name, exit_code = outcome.exit_code, "gate failed");
            }
            outcomes.push(GateOutcome {
                stage: stage.clone(),
                outcome,
            });
        }

        Ok(GateReport { outcomes })
    }

    /// `lints.ci`: run all stages, then persist the combined output to
    /// `report_path` regardless of pass/fail.
    pub async fn run_all_with_report(
        &self,
        stages: &[GateStage],
        report_path: &Path,
    ) -> anyhow::Result<GateReport> {
        let report = self.run_all(stages).await?;
        if let Some(parent) = report_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(report_path, report.render_text())?;
        info!(path = %report_path.display(), "lint report written");
        Ok(report)
    }
}
