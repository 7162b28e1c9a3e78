//! Test suite execution: unit vs integration, coverage, reports.
//!
//! Unit and integration suites stay isolated — integration tests assume
//! externally provisioned services (containers) that this runner never
//! starts. Unit runs collect coverage and emit two machine-readable
//! reports (coverage XML, JUnit XML) plus a terminal summary.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use gantry_core::PipelineConfig;

use crate::runner::{CommandOutcome, CommandSpec, StageRunner};

/// Which suite to run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestSuite {
    Unit,
    Integration,
}

impl TestSuite {
    pub fn target_name(&self) -> &'static str {
        match self {
            TestSuite::Unit => "test.unit",
            TestSuite::Integration => "test.integration",
        }
    }
}

/// Builds and runs pytest invocations from the pipeline configuration.
#[derive(Debug, Clone)]
pub struct TestRunner {
    config: PipelineConfig,
}

impl TestRunner {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Argv for the unit suite: everything except the integration
    /// directory, with coverage collection and both report files.
    pub fn unit_argv(&self) -> Vec<String> {
        let reports = self.config.report_paths();
        let mut argv = vec![
            "pytest".to_string(),
            "tests".to_string(),
            format!("--ignore={}", self.config.integration_dir.display()),
            "--cov".to_string(),
            format!("--cov-report=xml:{}", reports.coverage_xml.display()),
            "--cov-report=term".to_string(),
            format!("--junitxml={}", reports.junit_xml.display()),
        ];
        if self.config.single_worker_tests {
            // The project's fixtures are not safe for concurrent access;
            // run everything on one worker.
            argv.push("--numprocesses=0".to_string());
        }
        argv
    }

    /// Argv for the integration suite: only the integration directory,
    /// no coverage, its own JUnit report.
    pub fn integration_argv(&self) -> Vec<String> {
        let junit = self
            .config
            .reports_dir
            .join("junit-integration.xml");
        vec![
            "pytest".to_string(),
            self.config.integration_dir.display().to_string(),
            format!("--junitxml={}", junit.display()),
        ]
    }

    /// The resolved command for a suite.
    pub fn command(&self, suite: TestSuite) -> CommandSpec {
        let argv = match suite {
            TestSuite::Unit => self.unit_argv(),
            TestSuite::Integration => self.integration_argv(),
        };
        CommandSpec::new(suite.target_name(), argv)
            .in_dir(&self.config.workspace)
            .with_timeout(self.config.stage_timeout_secs)
    }

    /// Run a suite. The reports directory is created up front so report
    /// files survive even a failing run.
    pub async fn run(&self, suite: TestSuite) -> anyhow::Result<CommandOutcome> {
        std::fs::create_dir_all(&self.config.reports_dir)?;
        let spec = self.command(suite);
        info!(suite = suite.target_name(), "running test suite");
        StageRunner::execute(&spec).await
    }

    /// Run a suite with an explicit command (tests, wrapper scripts).
    pub async fn run_with_command(&self, spec: &CommandSpec) -> anyhow::Result<CommandOutcome> {
        std::fs::create_dir_all(&self.config.reports_dir)?;
        StageRunner::execute(spec).await
    }

    /// `test.clean`: drop pytest/coverage caches and the reports dir.
    pub fn clean(&self) -> std::io::Result<()> {
        for relative in [".pytest_cache", ".coverage"] {
            remove_if_present(&self.config.workspace.join(relative))?;
        }
        remove_if_present(&self.config.reports_dir)?;
        info!("test caches and reports removed");
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(workspace: &Path) -> PipelineConfig {
        PipelineConfig::for_workspace(workspace)
    }

    #[test]
    fn test_unit_argv_excludes_integration_dir() {
        let config = config(Path::new("/work/acme"));
        let runner = TestRunner::new(config.clone());
        let argv = runner.unit_argv();

        let ignore = format!("--ignore={}", config.integration_dir.display());
        assert!(argv.contains(&ignore), "unit must ignore the integration dir");
        assert!(
            !argv.iter().any(|a| a == &config.integration_dir.display().to_string()),
            "unit must not select the integration dir"
        );
    }

    #[test]
    fn test_integration_argv_selects_only_integration_dir() {
        let config = config(Path::new("/work/acme"));
        let runner = TestRunner::new(config.clone());
        let argv = runner.integration_argv();

        assert_eq!(argv[1], config.integration_dir.display().to_string());
        assert!(
            !argv.iter().any(|a| a.starts_with("--ignore")),
            "integration selects by path, not by exclusion"
        );
        assert!(
            !argv.iter().any(|a| a.starts_with("--cov")),
            "integration does not collect coverage"
        );
    }

    #[test]
    fn test_unit_reports_are_configured() {
        let config = config(Path::new("/work/acme"));
        let runner = TestRunner::new(config);
        let argv = runner.unit_argv();
        assert!(argv
            .iter()
            .any(|a| a.starts_with("--cov-report=xml:") && a.ends_with("coverage.xml")));
        assert!(argv.iter().any(|a| a == "--cov-report=term"));
        assert!(argv
            .iter()
            .any(|a| a.starts_with("--junitxml=") && a.ends_with("junit.xml")));
    }

    #[test]
    fn test_single_worker_forced_when_fixtures_unsafe() {
        let mut cfg = config(Path::new("/work/acme"));
        cfg.single_worker_tests = true;
        assert!(TestRunner::new(cfg.clone())
            .unit_argv()
            .contains(&"--numprocesses=0".to_string()));

        cfg.single_worker_tests = false;
        assert!(!TestRunner::new(cfg)
            .unit_argv()
            .iter()
            .any(|a| a.starts_with("--numprocesses")));
    }

    #[tokio::test]
    async fn test_run_creates_reports_dir_before_suite() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let runner = TestRunner::new(cfg.clone());

        let spec = CommandSpec::new("test.unit", vec!["echo".into(), "1 passed".into()]);
        let outcome = runner.run_with_command(&spec).await.unwrap();
        assert!(outcome.passed());
        assert!(cfg.reports_dir.is_dir(), "reports dir must exist for report files");
    }

    #[test]
    fn test_clean_removes_caches_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        std::fs::create_dir_all(cfg.workspace.join(".pytest_cache")).unwrap();
        std::fs::write(cfg.workspace.join(".coverage"), b"data").unwrap();
        std::fs::create_dir_all(&cfg.reports_dir).unwrap();
        std::fs::write(cfg.reports_dir.join("junit.xml"), b"<xml/>").unwrap();

        TestRunner::new(cfg.clone()).clean().unwrap();
        assert!(!cfg.workspace.join(".pytest_cache").exists());
        assert!(!cfg.workspace.join(".coverage").exists());
        assert!(!cfg.reports_dir.exists());

        // Idempotent on an already-clean tree.
        TestRunner::new(cfg).clean().unwrap();
    }
}
