//! Pipeline run records and the gated stage state machine.
//!
//! One [`PipelineRun`] exists per driver execution per revision.
//! Transitions are strictly forward:
//!
//! `Pending → Scanned → Bootstrapped → Linted → Tested → Built → Published`
//!
//! with a terminal `Failed` reachable from any non-terminal state. A
//! stage is only entered once every prior stage in the chain has
//! succeeded; retried pipelines are new runs starting from `Pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GantryError, Result};

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Gated pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Run created; nothing executed yet.
    Pending,
    /// Leak scan passed. Gates everything else.
    Scanned,
    /// Toolchain verified against the pin file.
    Bootstrapped,
    /// Quality gates passed.
    Linted,
    /// Test suites passed.
    Tested,
    /// All matrix cells completed with validated artifacts.
    Built,
    /// Artifacts promoted (outside the driver's scope).
    Published,
    /// Terminal failure state.
    Failed,
}

impl PipelineState {
    /// The next state in the forward chain, if any.
    pub fn successor(&self) -> Option<PipelineState> {
        use PipelineState::*;
        match self {
            Pending => Some(Scanned),
            Scanned => Some(Bootstrapped),
            Bootstrapped => Some(Linted),
            Linted => Some(Tested),
            Tested => Some(Built),
            Built => Some(Published),
            Published | Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Published | PipelineState::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Pending => "pending",
            PipelineState::Scanned => "scanned",
            PipelineState::Bootstrapped => "bootstrapped",
            PipelineState::Linted => "linted",
            PipelineState::Tested => "tested",
            PipelineState::Built => "built",
            PipelineState::Published => "published",
            PipelineState::Failed => "failed",
        }
    }
}

/// Result of one executed stage within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageOutcome {
    /// Stage name (`leak_scan`, `bootstrap`, `lints`, `test.unit`,
    /// `build.linux-x86_64`, ...).
    pub stage: String,
    /// Whether the stage succeeded.
    pub success: bool,
    /// Exit code of the underlying command, when one ran.
    pub exit_code: Option<i32>,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Free-form detail (violation list, report paths, error text).
    pub detail: String,
}

/// One execution of the pipeline driver for one revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRun {
    /// Unique identifier for this run.
    pub run_id: Uuid,
    /// Git commit the run executed against.
    pub git_sha: String,
    /// Digest of the toolchain pin set in effect.
    pub toolchain_digest: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state (None while running).
    pub finished_at: Option<DateTime<Utc>>,
    /// Current pipeline state.
    pub state: PipelineState,
    /// Overall status.
    pub status: RunStatus,
    /// Ordered outcomes of executed stages.
    pub stages: Vec<StageOutcome>,
}

impl PipelineRun {
    /// Create a new run in `Pending`.
    pub fn new(git_sha: impl Into<String>, toolchain_digest: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            git_sha: git_sha.into(),
            toolchain_digest: toolchain_digest.into(),
            started_at: Utc::now(),
            finished_at: None,
            state: PipelineState::Pending,
            status: RunStatus::Running,
            stages: Vec::new(),
        }
    }

    /// Record a completed stage outcome.
    pub fn record(&mut self, outcome: StageOutcome) {
        self.stages.push(outcome);
    }

    /// Advance to `next`, enforcing the forward chain. Skipping a state
    /// or moving backwards is rejected.
    pub fn advance(&mut self, next: PipelineState) -> Result<()> {
        if self.state.successor() == Some(next) {
            self.state = next;
            if next == PipelineState::Published {
                self.finish(RunStatus::Completed);
            }
            Ok(())
        } else {
            Err(GantryError::InvalidTransition {
                from: self.state.name().to_string(),
                to: next.name().to_string(),
            })
        }
    }

    /// Mark the run completed. Legal once every driver-scoped stage has
    /// passed — at `Built` (publishing is outside the driver) or
    /// `Published`.
    pub fn complete(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Built | PipelineState::Published => {
                self.finish(RunStatus::Completed);
                Ok(())
            }
            other => Err(GantryError::InvalidTransition {
                from: other.name().to_string(),
                to: "completed".to_string(),
            }),
        }
    }

    /// Transition to `Failed` from any non-terminal state.
    pub fn fail(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(GantryError::InvalidTransition {
                from: self.state.name().to_string(),
                to: "failed".to_string(),
            });
        }
        self.state = PipelineState::Failed;
        self.finish(RunStatus::Failed);
        Ok(())
    }

    /// Name of the first failed stage, if any.
    pub fn first_failed_stage(&self) -> Option<&str> {
        self.stages
            .iter()
            .find(|s| !s.success)
            .map(|s| s.stage.as_str())
    }

    /// First non-zero exit code observed across stages.
    pub fn first_nonzero_exit(&self) -> Option<i32> {
        self.stages
            .iter()
            .filter_map(|s| s.exit_code)
            .find(|&c| c != 0)
    }

    fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(stage: &str, success: bool, exit_code: Option<i32>) -> StageOutcome {
        StageOutcome {
            stage: stage.to_string(),
            success,
            exit_code,
            duration_ms: 10,
            detail: String::new(),
        }
    }

    #[test]
    fn test_forward_chain_to_published() {
        let mut run = PipelineRun::new("abc123", "tcdigest");
        for next in [
            PipelineState::Scanned,
            PipelineState::Bootstrapped,
            PipelineState::Linted,
            PipelineState::Tested,
            PipelineState::Built,
            PipelineState::Published,
        ] {
            run.advance(next).unwrap();
        }
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_complete_at_built_but_not_earlier() {
        let mut run = PipelineRun::new("abc123", "tcdigest");
        for next in [
            PipelineState::Scanned,
            PipelineState::Bootstrapped,
            PipelineState::Linted,
        ] {
            run.advance(next).unwrap();
        }
        assert!(run.complete().is_err(), "cannot complete before Built");

        run.advance(PipelineState::Tested).unwrap();
        run.advance(PipelineState::Built).unwrap();
        run.complete().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_skipping_a_state_is_rejected() {
        let mut run = PipelineRun::new("abc123", "tcdigest");
        run.advance(PipelineState::Scanned).unwrap();
        // Bootstrapped has not happened; Linted is two steps ahead.
        assert!(run.advance(PipelineState::Linted).is_err());
        assert_eq!(run.state, PipelineState::Scanned);
    }

    #[test]
    fn test_backwards_transition_is_rejected() {
        let mut run = PipelineRun::new("abc123", "tcdigest");
        run.advance(PipelineState::Scanned).unwrap();
        run.advance(PipelineState::Bootstrapped).unwrap();
        assert!(run.advance(PipelineState::Scanned).is_err());
    }

    #[test]
    fn test_fail_reachable_from_any_non_terminal_state() {
        let mut run = PipelineRun::new("abc123", "tcdigest");
        run.advance(PipelineState::Scanned).unwrap();
        run.fail().unwrap();
        assert_eq!(run.state, PipelineState::Failed);
        assert_eq!(run.status, RunStatus::Failed);

        // Terminal: no way out.
        assert!(run.fail().is_err());
        assert!(run.advance(PipelineState::Bootstrapped).is_err());
    }

    #[test]
    fn test_first_failed_stage_and_exit_code() {
        let mut run = PipelineRun::new("abc123", "tcdigest");
        run.record(outcome("leak_scan", true, None));
        run.record(outcome("lints.ruff", true, Some(0)));
        run.record(outcome("lints.mypy", false, Some(2)));
        run.record(outcome("lints.pylint", false, Some(4)));
        assert_eq!(run.first_failed_stage(), Some("lints.mypy"));
        assert_eq!(run.first_nonzero_exit(), Some(2));
    }

    #[test]
    fn test_run_serde_roundtrip() {
        let mut run = PipelineRun::new("abc123", "tcdigest");
        run.record(outcome("bootstrap", true, None));
        let json = serde_json::to_string(&run).expect("serialize");
        let back: PipelineRun = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(run, back);
    }
}
