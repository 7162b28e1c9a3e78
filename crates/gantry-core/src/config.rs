//! Pipeline configuration.
//!
//! The Makefile the orchestrator replaces passed state between steps as
//! exported shell variables. Here that state is one explicit
//! [`PipelineConfig`] threaded through every stage invocation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::matrix::BuildMatrix;

/// Locations of the machine-readable reports the runners emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPaths {
    /// Coverage report (Cobertura-style XML).
    pub coverage_xml: PathBuf,
    /// Test results (JUnit-style XML).
    pub junit_xml: PathBuf,
    /// Combined linter output (plain text), written by `lints.ci`.
    pub lints_txt: PathBuf,
}

impl ReportPaths {
    /// Conventional layout under a reports directory.
    pub fn under(dir: &Path) -> Self {
        Self {
            coverage_xml: dir.join("coverage.xml"),
            junit_xml: dir.join("junit.xml"),
            lints_txt: dir.join("lints.txt"),
        }
    }
}

/// Explicit configuration threaded through every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Project workspace root; every relative path below resolves here.
    pub workspace: PathBuf,
    /// Tool-version pin file.
    pub pin_file: PathBuf,
    /// Project manifest (pyproject-style).
    pub manifest_path: PathBuf,
    /// Virtual environment directory.
    pub venv_dir: PathBuf,
    /// Reports directory.
    pub reports_dir: PathBuf,
    /// Wheel output directory.
    pub dist_dir: PathBuf,
    /// Run trace output directory.
    pub runs_dir: PathBuf,
    /// Integration test directory, excluded from `test.unit`.
    pub integration_dir: PathBuf,
    /// Target interpreter for release builds (e.g. `python3.11`).
    pub interpreter: String,
    /// Interpreter wheel tag (e.g. `cp311`).
    pub interpreter_tag: String,
    /// Fail fast on bootstrap problems (local) vs degrade missing tool
    /// managers to warnings (CI).
    pub strict: bool,
    /// Force single-worker test execution when fixtures are not safe for
    /// concurrent access.
    pub single_worker_tests: bool,
    /// Per-stage timeout in seconds (0 = no timeout).
    pub stage_timeout_secs: u64,
    /// The release matrix. Declared last so the TOML form keeps scalar
    /// keys ahead of the matrix table.
    pub matrix: BuildMatrix,
}

impl PipelineConfig {
    /// Conventional configuration rooted at `workspace`.
    pub fn for_workspace(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            pin_file: workspace.join(".tool-versions"),
            manifest_path: workspace.join("pyproject.toml"),
            venv_dir: workspace.join(".venv"),
            reports_dir: workspace.join("reports"),
            dist_dir: workspace.join("dist"),
            runs_dir: workspace.join(".gantry").join("runs"),
            integration_dir: workspace.join("tests").join("integration"),
            interpreter: "python3.11".to_string(),
            interpreter_tag: "cp311".to_string(),
            matrix: BuildMatrix::default(),
            strict: true,
            single_worker_tests: true,
            stage_timeout_secs: 1800,
            workspace,
        }
    }

    /// Report file locations for this configuration.
    pub fn report_paths(&self) -> ReportPaths {
        ReportPaths::under(&self.reports_dir)
    }

    /// Non-strict variant for CI contexts.
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Load a persisted pipeline definition.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
