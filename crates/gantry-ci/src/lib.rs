//! Gantry stage execution.
//!
//! Everything that runs: the stage command runner, quality gates, test
//! suites, the secret leak scan, the release matrix builder, the
//! declarative target surface, and the pipeline driver that sequences
//! them per revision.

pub mod leak_scan;
pub mod pipeline;
pub mod quality;
pub mod release;
pub mod runner;
pub mod targets;
pub mod testing;
pub mod trace;

pub use leak_scan::{LeakFinding, LeakScanReport, LeakScanner};
pub use pipeline::{PipelineDriver, PipelineReport};
pub use quality::{
    ci_stages, format_check_stages, format_stages, lint_stages, GateMode, GateOutcome, GateReport,
    GateStage, QualityGateRunner, QualityTool,
};
pub use release::{
    maturin_spec, BuildCommandFactory, CellReport, HostSysdeps, MatrixReport, NoopPrep,
    PlatformPrep, ReleaseBuilder,
};
pub use runner::{CommandOutcome, CommandSpec, StageRunner};
pub use targets::{
    Action, TargetExecutor, TargetRegistry, TargetResult, TargetRunReport, TargetStatus,
};
pub use testing::{TestRunner, TestSuite};
pub use trace::{read_run_trace, write_run_trace, RunTrace};
