//! Toolchain bootstrap: pin verification, plugin installs, virtualenvs.
//!
//! The bootstrapper is the first gate of every pipeline run. Given a
//! [`ToolchainSpec`], it probes each pinned tool's active version and
//! refuses to let later stages run on a mismatch. Missing tools get one
//! retry through the tool-version manager (plugin update + reinstall).
//!
//! Strictness is an explicit flag, not inferred from the environment:
//! `strict = true` (local) makes every failure fatal; `strict = false`
//! (CI) downgrades an unavailable tool-version manager to a warning.
//! A version mismatch is fatal in both modes.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gantry_core::ToolchainSpec;

use crate::error::{EnvError, Result};
use crate::runner::CommandRunner;

/// Result of probing one pinned tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCheck {
    pub tool: String,
    pub pinned: String,
    pub active: String,
}

/// Outcome of a full bootstrap verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapReport {
    /// Tools whose active version matched the pin.
    pub checks: Vec<ToolCheck>,
    /// Non-fatal problems (lenient mode only).
    pub warnings: Vec<String>,
}

/// Whether `ensure_venv` created a fresh environment or reused one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenvStatus {
    Created,
    Reused,
}

/// Verifies and repairs the toolchain environment against a pin set.
pub struct Bootstrapper {
    spec: ToolchainSpec,
    runner: Arc<dyn CommandRunner>,
    /// Tool-version manager binary (`asdf` by convention).
    manager: String,
    strict: bool,
}

impl Bootstrapper {
    pub fn new(spec: ToolchainSpec, runner: Arc<dyn CommandRunner>, strict: bool) -> Self {
        Self {
            spec,
            runner,
            manager: "asdf".to_string(),
            strict,
        }
    }

    /// Override the tool-version manager binary.
    pub fn with_manager(mut self, manager: impl Into<String>) -> Self {
        self.manager = manager.into();
        self
    }

    /// Verify every pinned tool resolves to exactly its pinned version.
    ///
    /// Missing tools are installed through the manager once; a tool that
    /// still cannot be probed afterwards is fatal in strict mode and a
    /// warning otherwise. A version mismatch is always fatal.
    pub async fn verify(&self) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::default();

        for (tool, pinned) in self.spec.iter() {
            let active = match self.probe(tool).await {
                Ok(version) => version,
                Err(EnvError::ToolNotFound { .. }) => {
                    match self.install_via_manager(tool, pinned).await {
                        Ok(()) => self.probe(tool).await?,
                        Err(e) if self.strict => return Err(e),
                        Err(e) => {
                            warn!(tool = %tool, error = %e, "skipping unavailable tool");
                            report.warnings.push(format!("{tool}: {e}"));
                            continue;
                        }
                    }
                }
                Err(e) => return Err(e),
            };

            if active != pinned {
                return Err(EnvError::VersionMismatch {
                    tool: tool.to_string(),
                    pinned: pinned.to_string(),
                    active,
                });
            }

            debug!(tool = %tool, version = %active, "toolchain pin satisfied");
            report.checks.push(ToolCheck {
                tool: tool.to_string(),
                pinned: pinned.to_string(),
                active,
            });
        }

        info!(
            tools = report.checks.len(),
            warnings = report.warnings.len(),
            "toolchain verified"
        );
        Ok(report)
    }

    /// Probe the active version of `tool` via `<tool> --version`.
    async fn probe(&self, tool: &str) -> Result<String> {
        let output = self.runner.run(tool, &["--version"]).await?;
        if !output.success() {
            return Err(EnvError::VersionUnreadable {
                tool: tool.to_string(),
                output: output.combined(),
            });
        }
        extract_version(&output.combined()).ok_or_else(|| EnvError::VersionUnreadable {
            tool: tool.to_string(),
            output: output.combined(),
        })
    }

    /// One-shot repair path: update the manager's plugin for `tool`, then
    /// install the pinned version.
    async fn install_via_manager(&self, tool: &str, version: &str) -> Result<()> {
        info!(tool = %tool, version = %version, "tool missing, installing via manager");

        let update = self
            .runner
            .run(&self.manager, &["plugin", "update", tool])
            .await
            .map_err(|e| match e {
                EnvError::ToolNotFound { .. } => EnvError::ManagerUnavailable,
                other => other,
            })?;
        if !update.success() {
            return Err(EnvError::InstallFailed {
                tool: tool.to_string(),
                version: version.to_string(),
                detail: update.stderr,
            });
        }

        let install = self
            .runner
            .run(&self.manager, &["install", tool, version])
            .await
            .map_err(|e| match e {
                EnvError::ToolNotFound { .. } => EnvError::ManagerUnavailable,
                other => other,
            })?;
        if !install.success() {
            return Err(EnvError::InstallFailed {
                tool: tool.to_string(),
                version: version.to_string(),
                detail: install.stderr,
            });
        }

        Ok(())
    }

    /// Create the project virtual environment when absent, reuse it when
    /// present.
    pub async fn ensure_venv(&self, venv_dir: &Path, interpreter: &str) -> Result<VenvStatus> {
        if venv_dir.join("pyvenv.cfg").exists() {
            debug!(venv = %venv_dir.display(), "reusing existing virtualenv");
            return Ok(VenvStatus::Reused);
        }

        let dir = venv_dir.to_string_lossy();
        let output = self.runner.run(interpreter, &["-m", "venv", &dir]).await?;
        if !output.success() {
            return Err(EnvError::VenvFailed(output.stderr));
        }

        info!(venv = %venv_dir.display(), "created virtualenv");
        Ok(VenvStatus::Created)
    }
}

/// Pull the first version-shaped token (`N.N[.N...]`) out of a version
/// banner, tolerating prefixes like `v` and surrounding punctuation.
///
/// `"Python 3.11.4"` → `"3.11.4"`, `"Poetry (version 1.5.1)"` → `"1.5.1"`.
pub fn extract_version(banner: &str) -> Option<String> {
    for token in banner.split_whitespace() {
        let trimmed = token
            .trim_matches(|c: char| !c.is_ascii_digit())
            .trim_start_matches('v');
        if trimmed.is_empty() {
            continue;
        }
        let version_like = trimmed.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_digit())
        });
        if version_like && trimmed.contains('.') {
            return Some(trimmed.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedRunner;
    use crate::runner::CommandOutput;

    fn spec(pins: &[(&str, &str)]) -> ToolchainSpec {
        ToolchainSpec::from_pins(
            pins.iter()
                .map(|(t, v)| (t.to_string(), v.to_string())),
        )
    }

    #[test]
    fn test_extract_version_from_banners() {
        assert_eq!(extract_version("Python 3.11.4"), Some("3.11.4".into()));
        assert_eq!(
            extract_version("Poetry (version 1.5.1)"),
            Some("1.5.1".into())
        );
        assert_eq!(extract_version("maturin v1.2.3"), Some("1.2.3".into()));
        assert_eq!(extract_version("no version here"), None);
    }

    #[tokio::test]
    async fn test_verify_passes_on_exact_pins() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("python --version", CommandOutput::ok("Python 3.11.4"));
        runner.script("poetry --version", CommandOutput::ok("Poetry (version 1.5.1)"));

        let boot = Bootstrapper::new(
            spec(&[("python", "3.11.4"), ("poetry", "1.5.1")]),
            runner,
            true,
        );
        let report = boot.verify().await.unwrap();
        assert_eq!(report.checks.len(), 2);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_patch_drift_fails_naming_both_versions() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("python --version", CommandOutput::ok("Python 3.11.5"));

        let boot = Bootstrapper::new(spec(&[("python", "3.11.4")]), runner, true);
        let err = boot.verify().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("3.11.4"), "must name the pinned version: {msg}");
        assert!(msg.contains("3.11.5"), "must name the active version: {msg}");
    }

    #[tokio::test]
    async fn test_mismatch_is_fatal_even_in_lenient_mode() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("python --version", CommandOutput::ok("Python 3.12.0"));

        let boot = Bootstrapper::new(spec(&[("python", "3.11.4")]), runner, false);
        assert!(matches!(
            boot.verify().await,
            Err(EnvError::VersionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_tool_installed_via_manager_once() {
        let runner = Arc::new(ScriptedRunner::new());
        // First probe: binary missing. After the manager install, the
        // probe resolves to the pinned version.
        runner.script_missing("maturin --version");
        runner.script("maturin --version", CommandOutput::ok("maturin 1.2.3"));
        runner.script("asdf plugin update maturin", CommandOutput::ok(""));
        runner.script("asdf install maturin 1.2.3", CommandOutput::ok(""));

        let boot = Bootstrapper::new(spec(&[("maturin", "1.2.3")]), runner.clone(), true);
        let report = boot.verify().await.unwrap();
        assert_eq!(report.checks.len(), 1);
        assert_eq!(report.checks[0].active, "1.2.3");
        assert_eq!(runner.count("asdf plugin update maturin"), 1);
        assert_eq!(runner.count("asdf install maturin 1.2.3"), 1);
        assert_eq!(runner.count("maturin --version"), 2);
    }

    #[tokio::test]
    async fn test_missing_manager_fatal_in_strict_mode() {
        // Nothing scripted: every probe and the manager itself are
        // missing binaries.
        let runner = Arc::new(ScriptedRunner::new());
        let boot = Bootstrapper::new(spec(&[("python", "3.11.4")]), runner, true);
        assert!(matches!(
            boot.verify().await,
            Err(EnvError::ManagerUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_missing_manager_warns_in_lenient_mode() {
        let runner = Arc::new(ScriptedRunner::new());
        let boot = Bootstrapper::new(spec(&[("python", "3.11.4")]), runner, false);
        let report = boot.verify().await.unwrap();
        assert!(report.checks.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("python"));
    }

    #[tokio::test]
    async fn test_failed_install_retries_exactly_once() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("asdf plugin update python", CommandOutput::ok(""));
        runner.script(
            "asdf install python 3.11.4",
            CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "mirror unreachable".into(),
            },
        );

        let boot = Bootstrapper::new(spec(&[("python", "3.11.4")]), runner.clone(), true);
        let err = boot.verify().await.unwrap_err();
        assert!(matches!(err, EnvError::InstallFailed { .. }));
        // One update + one install; no second attempt.
        assert_eq!(runner.count("asdf plugin update python"), 1);
        assert_eq!(runner.count("asdf install python 3.11.4"), 1);
    }

    #[tokio::test]
    async fn test_ensure_venv_creates_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let venv = dir.path().join(".venv");
        let venv_arg = venv.to_string_lossy().to_string();

        let runner = Arc::new(ScriptedRunner::new());
        runner.script(
            &format!("python3.11 -m venv {venv_arg}"),
            CommandOutput::ok(""),
        );

        let boot = Bootstrapper::new(spec(&[("python", "3.11.4")]), runner.clone(), true);
        let status = boot.ensure_venv(&venv, "python3.11").await.unwrap();
        assert_eq!(status, VenvStatus::Created);

        // A real venv leaves pyvenv.cfg behind; simulate that, then the
        // second call must not spawn anything.
        std::fs::create_dir_all(&venv).unwrap();
        std::fs::write(venv.join("pyvenv.cfg"), "home = /usr/bin\n").unwrap();
        let status = boot.ensure_venv(&venv, "python3.11").await.unwrap();
        assert_eq!(status, VenvStatus::Reused);
        assert_eq!(runner.count(&format!("python3.11 -m venv {venv_arg}")), 1);
    }
}
