//! Command execution seam for the bootstrapper.
//!
//! Version probes and plugin installs go through the [`CommandRunner`]
//! trait so the bootstrap logic can be exercised against scripted fakes
//! (see [`crate::fakes`]) without any tools on the host.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;

use crate::error::{EnvError, Result};

/// Captured output of one probe or install command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (0 = success).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, for version extraction — some tools
    /// print their version banner on stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes probe/install commands for the bootstrapper.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, capturing output.
    ///
    /// Returns [`EnvError::ToolNotFound`] when the program cannot be
    /// spawned at all; a non-zero exit is returned as output, not error.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Real process execution via tokio.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Working directory for spawned commands (inherit when `None`).
    pub cwd: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let mut command = tokio::process::Command::new(program);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let output = command.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EnvError::ToolNotFound {
                    tool: program.to_string(),
                }
            } else {
                EnvError::Io(e)
            }
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
