//! Gantry Core Library
//!
//! Domain logic for the Gantry build orchestrator: the declarative
//! target graph, toolchain pin verification, the OS x arch release
//! matrix, artifact lifecycle and gating, and the pipeline-run state
//! machine.

pub mod artifact;
pub mod config;
pub mod error;
pub mod git;
pub mod manifest;
pub mod matrix;
pub mod run;
pub mod target;
pub mod telemetry;
pub mod toolchain;

pub use artifact::{
    assert_clean_output_dir, Artifact, ArtifactRule, ArtifactRuleSet, ArtifactState,
    ArtifactVerdict,
};
pub use config::{PipelineConfig, ReportPaths};
pub use error::{GantryError, ParseError, Result};
pub use git::{capture_head_sha, is_git_repo};
pub use manifest::{BuildSystem, ProjectManifest, ProjectTable};
pub use matrix::{BuildMatrix, BuildMatrixCell, TargetArch, TargetOs};
pub use run::{PipelineRun, PipelineState, RunStatus, StageOutcome};
pub use target::{validate_target_name, ExecutionPlan, PlanStep, Target, TargetGraph};
pub use telemetry::init_tracing;
pub use toolchain::ToolchainSpec;

/// Gantry version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
