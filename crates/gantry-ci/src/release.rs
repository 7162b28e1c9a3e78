//! Release builder: one wheel per build-matrix cell.
//!
//! Cells are independent workers. Each runs its platform prep hook, the
//! native-extension build, and the post-build artifact gate in its own
//! tokio task; one cell failing neither cancels nor corrupts its
//! siblings. All cells complete before the revision's artifacts are
//! considered for publish (publishing itself is out of scope).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use gantry_core::{Artifact, ArtifactRuleSet, ArtifactState, BuildMatrixCell, PipelineConfig, TargetArch, TargetOs};

use crate::runner::{CommandOutcome, CommandSpec, StageRunner};

/// Produces the build command for a cell.
pub type BuildCommandFactory = Arc<dyn Fn(&BuildMatrixCell) -> CommandSpec + Send + Sync>;

/// Per-platform pre-build preparation, keyed by the cell's OS so new
/// platforms are additions rather than edits to the builder.
#[async_trait]
pub trait PlatformPrep: Send + Sync {
    async fn prepare(&self, cell: &BuildMatrixCell) -> anyhow::Result<()>;
}

/// No preparation (tests, pre-provisioned hosts).
pub struct NoopPrep;

#[async_trait]
impl PlatformPrep for NoopPrep {
    async fn prepare(&self, _cell: &BuildMatrixCell) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Host system-library preparation.
///
/// Linux cells need SSL and atomic libraries present before the build;
/// which install command applies depends on the package manager the
/// host carries. aarch64 images sometimes ship `libatomic.so.1.2.0`
/// without the `.so.1` link the linker resolves, so that link is
/// repaired here. Non-Linux cells need nothing.
pub struct HostSysdeps;

#[async_trait]
impl PlatformPrep for HostSysdeps {
    async fn prepare(&self, cell: &BuildMatrixCell) -> anyhow::Result<()> {
        if cell.os != TargetOs::Linux {
            return Ok(());
        }

        let argv: Vec<String> = if binary_available("apt-get").await {
            ["apt-get", "install", "-y", "libssl-dev", "libatomic1"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else if binary_available("yum").await {
            ["yum", "install", "-y", "openssl-devel", "libatomic"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            anyhow::bail!("no supported package manager (apt-get or yum) on build host");
        };

        let spec = CommandSpec::new(format!("sysdeps.{}", cell.label()), argv);
        let outcome = StageRunner::execute(&spec).await?;
        if !outcome.passed() {
            anyhow::bail!(
                "system dependency install failed (exit {}): {}",
                outcome.exit_code,
                outcome.stderr
            );
        }

        if cell.arch == TargetArch::Aarch64 {
            repair_libatomic_link(Path::new("/usr/lib/aarch64-linux-gnu"))?;
        }

        Ok(())
    }
}

async fn binary_available(name: &str) -> bool {
    let spec = CommandSpec::new("which", vec!["which".to_string(), name.to_string()]);
    matches!(StageRunner::execute(&spec).await, Ok(o) if o.passed())
}

/// Link `libatomic.so.1` to the versioned library when only the latter
/// exists.
#[cfg(unix)]
fn repair_libatomic_link(lib_dir: &Path) -> anyhow::Result<()> {
    let link = lib_dir.join("libatomic.so.1");
    let versioned = lib_dir.join("libatomic.so.1.2.0");
    if !link.exists() && versioned.exists() {
        std::os::unix::fs::symlink(&versioned, &link)?;
        info!(link = %link.display(), "repaired libatomic symlink");
    }
    Ok(())
}

#[cfg(not(unix))]
fn repair_libatomic_link(_lib_dir: &Path) -> anyhow::Result<()> {
    Ok(())
}

/// Result of one cell's build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellReport {
    pub cell: BuildMatrixCell,
    /// Build command result, when the build ran.
    pub build: Option<CommandOutcome>,
    /// The produced artifact (validated or rejected), when one exists.
    pub artifact: Option<Artifact>,
    /// Prep/spawn/validation error text, when the cell died outside the
    /// build command itself.
    pub error: Option<String>,
}

impl CellReport {
    /// The cell passed: build exited zero and the artifact validated.
    pub fn passed(&self) -> bool {
        self.build.as_ref().map(CommandOutcome::passed).unwrap_or(false)
            && self
                .artifact
                .as_ref()
                .map(|a| a.state == ArtifactState::Validated)
                .unwrap_or(false)
            && self.error.is_none()
    }

    fn failed(cell: BuildMatrixCell, error: impl Into<String>) -> Self {
        Self {
            cell,
            build: None,
            artifact: None,
            error: Some(error.into()),
        }
    }
}

/// Results for the whole matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixReport {
    pub cells: Vec<CellReport>,
}

impl MatrixReport {
    /// True iff every cell passed.
    pub fn all_passed(&self) -> bool {
        self.cells.iter().all(CellReport::passed)
    }

    /// Validated artifacts, one per passing cell.
    pub fn validated_artifacts(&self) -> Vec<&Artifact> {
        self.cells
            .iter()
            .filter_map(|c| c.artifact.as_ref())
            .filter(|a| a.state == ArtifactState::Validated)
            .collect()
    }

    /// Labels of failed cells.
    pub fn failed_cells(&self) -> Vec<String> {
        self.cells
            .iter()
            .filter(|c| !c.passed())
            .map(|c| c.cell.label())
            .collect()
    }

    /// First non-zero build exit code across cells.
    pub fn first_nonzero_exit(&self) -> Option<i32> {
        self.cells
            .iter()
            .filter_map(|c| c.build.as_ref())
            .map(|b| b.exit_code)
            .find(|&c| c != 0)
    }
}

/// Builds the full release matrix for one revision.
pub struct ReleaseBuilder {
    config: PipelineConfig,
    package: String,
    version: String,
    source_sha: String,
    factory: BuildCommandFactory,
    prep: Arc<dyn PlatformPrep>,
}

impl ReleaseBuilder {
    pub fn new(
        config: PipelineConfig,
        package: impl Into<String>,
        version: impl Into<String>,
        source_sha: impl Into<String>,
    ) -> Self {
        let factory_config = config.clone();
        Self {
            package: package.into(),
            version: version.into(),
            source_sha: source_sha.into(),
            factory: Arc::new(move |cell| maturin_spec(&factory_config, cell)),
            prep: Arc::new(HostSysdeps),
            config,
        }
    }

    /// Override the build command per cell (tests, alternate backends).
    pub fn with_command_factory(mut self, factory: BuildCommandFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Override the pre-build platform prep.
    pub fn with_prep(mut self, prep: Arc<dyn PlatformPrep>) -> Self {
        self.prep = prep;
        self
    }

    /// Build every cell of the configured matrix concurrently.
    ///
    /// Always waits for every cell; failures are collected, never
    /// propagated early.
    pub async fn build_all(&self) -> MatrixReport {
        let cells = self.config.matrix.expand();
        std::fs::create_dir_all(&self.config.dist_dir).ok();
        info!(cells = cells.len(), "building release matrix");

        let tasks: Vec<_> = cells
            .into_iter()
            .map(|cell| {
                let factory = Arc::clone(&self.factory);
                let prep = Arc::clone(&self.prep);
                let config = self.config.clone();
                let package = self.package.clone();
                let version = self.version.clone();
                let source_sha = self.source_sha.clone();
                tokio::spawn(async move {
                    build_cell(cell, config, package, version, source_sha, factory, prep).await
                })
            })
            .collect();

        let mut reports = Vec::new();
        for (task, cell) in join_all(tasks)
            .await
            .into_iter()
            .zip(self.config.matrix.expand())
        {
            match task {
                Ok(report) => reports.push(report),
                // A panicked cell task is that cell's failure, nothing more.
                Err(e) => reports.push(CellReport::failed(cell, format!("cell task died: {e}"))),
            }
        }

        let failed = reports.iter().filter(|r| !r.passed()).count();
        if failed > 0 {
            warn!(failed, "matrix completed with failed cells");
        } else {
            info!("matrix completed, all cells passed");
        }
        MatrixReport { cells: reports }
    }
}

/// Native-extension build command for one cell: release optimisation,
/// stripped symbols, fixed interpreter, per-cell triple and
/// compatibility tag.
pub fn maturin_spec(config: &PipelineConfig, cell: &BuildMatrixCell) -> CommandSpec {
    let argv = vec![
        "maturin".to_string(),
        "build".to_string(),
        "--release".to_string(),
        "--strip".to_string(),
        "--interpreter".to_string(),
        config.interpreter.clone(),
        "--target".to_string(),
        cell.target_triple().to_string(),
        "--compatibility".to_string(),
        cell.platform_tag(),
        "--out".to_string(),
        config.dist_dir.display().to_string(),
    ];
    CommandSpec::new(format!("build.{}", cell.label()), argv)
        .in_dir(&config.workspace)
        .with_timeout(config.stage_timeout_secs)
}

async fn build_cell(
    cell: BuildMatrixCell,
    config: PipelineConfig,
    package: String,
    version: String,
    source_sha: String,
    factory: BuildCommandFactory,
    prep: Arc<dyn PlatformPrep>,
) -> CellReport {
    if let Err(e) = prep.prepare(&cell).await {
        return CellReport::failed(cell, format!("platform prep failed: {e}"));
    }

    let spec = factory(&cell);
    let build = match StageRunner::execute(&spec).await {
        Ok(outcome) => outcome,
        Err(e) => return CellReport::failed(cell, format!("build spawn failed: {e}")),
    };

    if !build.passed() {
        warn!(cell = %cell, exit_code = build.exit_code, "cell build failed");
        return CellReport {
            cell,
            build: Some(build),
            artifact: None,
            error: None,
        };
    }

    let wheel_path = config
        .dist_dir
        .join(cell.wheel_filename(&package, &version, &config.interpreter_tag));
    let mut artifact =
        match Artifact::from_build(package, version, cell, source_sha, wheel_path.clone()) {
            Ok(a) => a,
            Err(e) => {
                return CellReport {
                    cell,
                    build: Some(build),
                    artifact: None,
                    error: Some(format!(
                        "build succeeded but wheel {} is unreadable: {e}",
                        wheel_path.display()
                    )),
                }
            }
        };

    let gate = ArtifactRuleSet::standard(config.interpreter_tag.clone());
    match gate.apply(&mut artifact) {
        Ok(verdict) if verdict.passed => {
            info!(cell = %cell, wheel = %artifact.filename(), "cell artifact validated");
        }
        Ok(_) => {
            warn!(cell = %cell, reason = ?artifact.rejection_reason, "cell artifact rejected");
        }
        Err(e) => {
            return CellReport {
                cell,
                build: Some(build),
                artifact: Some(artifact),
                error: Some(format!("artifact gate error: {e}")),
            }
        }
    }

    CellReport {
        cell,
        build: Some(build),
        artifact: Some(artifact),
        error: None,
    }
}
