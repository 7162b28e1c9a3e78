//! Stage command execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// A fully resolved stage command: argv plus the execution context the
/// pipeline configuration dictates. No stage reads ambient shell state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandSpec {
    /// Stage name this command runs under (`lints.mypy`, `build.linux-x86_64`).
    pub stage: String,

    /// Command line; first element is the executable.
    pub argv: Vec<String>,

    /// Working directory (inherit when `None`).
    pub cwd: Option<PathBuf>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,

    /// Timeout in seconds (0 = no timeout).
    pub timeout_secs: u64,
}

impl CommandSpec {
    /// Create a command with no cwd/env overrides and no timeout.
    pub fn new(stage: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            stage: stage.into(),
            argv,
            cwd: None,
            env: Vec::new(),
            timeout_secs: 0,
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Captured result of a stage command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandOutcome {
    /// Stage name.
    pub stage: String,

    /// Exit code (0 = success, -1 = killed/no code).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutcome {
    /// Whether the command exited zero.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined for reports.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (true, true) => String::new(),
        }
    }
}

/// Executes stage commands.
pub struct StageRunner;

impl StageRunner {
    /// Execute one stage command and capture its result.
    ///
    /// A non-zero exit is a normal [`CommandOutcome`]; only spawn
    /// failures and timeouts are errors.
    pub async fn execute(spec: &CommandSpec) -> anyhow::Result<CommandOutcome> {
        let start = Instant::now();

        if spec.argv.is_empty() {
            anyhow::bail!("Stage {} has empty command", spec.stage);
        }

        let mut command = Command::new(&spec.argv[0]);
        command
            .args(&spec.argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let child = command.spawn()?;

        let output = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Stage {} timed out after {} seconds",
                    spec.stage,
                    spec.timeout_secs
                )
            })??
        } else {
            child.wait_with_output().await?
        };

        Ok(CommandOutcome {
            stage: spec.stage.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_simple_command() {
        let spec = CommandSpec::new("echo_test", vec!["echo".into(), "hello".into()]);
        let outcome = StageRunner::execute(&spec).await.expect("execute failed");
        assert!(outcome.passed());
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let spec = CommandSpec::new("false_test", vec!["false".into()]);
        let outcome = StageRunner::execute(&spec).await.expect("execute failed");
        assert!(!outcome.passed());
        assert_ne!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn test_env_and_cwd_are_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("pwd_test", vec!["pwd".into()])
            .in_dir(dir.path())
            .with_env("GANTRY_STAGE", "pwd_test");
        let outcome = StageRunner::execute(&spec).await.expect("execute failed");
        assert!(outcome.passed());
        let printed = outcome.stdout.trim();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            PathBuf::from(printed).canonicalize().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_empty_command_is_an_error() {
        let spec = CommandSpec::new("empty", vec![]);
        assert!(StageRunner::execute(&spec).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_kills_stage() {
        let spec =
            CommandSpec::new("sleep_test", vec!["sleep".into(), "5".into()]).with_timeout(1);
        let err = StageRunner::execute(&spec).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
