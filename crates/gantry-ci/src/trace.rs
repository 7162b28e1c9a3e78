//! Pipeline run trace persistence.
//!
//! Every driver run — pass or fail — leaves a self-contained,
//! integrity-checked record behind: `<runs-dir>/<run_id>/trace.json`
//! with a companion `trace.digest` holding a SHA-256 over the stage
//! outcomes for out-of-band verification.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use gantry_core::{GantryError, PipelineRun, Result};

/// On-disk form of a completed pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrace {
    /// The run record, stages included.
    pub run: PipelineRun,
    /// SHA-256 hex digest of `serde_json::to_vec(&run.stages)`.
    pub stages_digest: String,
}

impl RunTrace {
    /// Build a trace for a run, computing the stage digest.
    pub fn from_run(run: PipelineRun) -> Result<Self> {
        let stages_digest = digest_stages(&run)?;
        Ok(Self { run, stages_digest })
    }
}

fn digest_stages(run: &PipelineRun) -> Result<String> {
    let bytes = serde_json::to_vec(&run.stages)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Write a trace to `<dir>/<run_id>/trace.json` (+ `trace.digest`).
///
/// Returns the path to `trace.json`.
pub fn write_run_trace(trace: &RunTrace, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(trace.run.run_id.to_string());
    std::fs::create_dir_all(&run_dir)?;

    let trace_path = run_dir.join("trace.json");
    let digest_path = run_dir.join("trace.digest");

    let json = serde_json::to_vec_pretty(trace)?;
    std::fs::write(&trace_path, &json)?;
    std::fs::write(&digest_path, trace.stages_digest.as_bytes())?;

    Ok(trace_path)
}

/// Read and integrity-verify a trace from `<dir>/<run_id>/trace.json`.
///
/// Recomputes the stage digest and compares it to the stored value;
/// a mismatch is a [`GantryError::DigestMismatch`].
pub fn read_run_trace(run_id: &str, dir: &Path) -> Result<RunTrace> {
    let trace_path = dir.join(run_id).join("trace.json");
    let json = std::fs::read(&trace_path)?;
    let trace: RunTrace = serde_json::from_slice(&json)?;

    let actual = digest_stages(&trace.run)?;
    if actual != trace.stages_digest {
        return Err(GantryError::DigestMismatch {
            expected: trace.stages_digest.clone(),
            actual,
        });
    }

    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::StageOutcome;
    use tempfile::tempdir;

    fn run_with_stage() -> PipelineRun {
        let mut run = PipelineRun::new("abc123", "tcdigest");
        run.record(StageOutcome {
            stage: "leak_scan".to_string(),
            success: true,
            exit_code: None,
            duration_ms: 5,
            detail: "0 findings".to_string(),
        });
        run
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let run = run_with_stage();
        let run_id = run.run_id.to_string();

        let trace = RunTrace::from_run(run).unwrap();
        let path = write_run_trace(&trace, dir.path()).unwrap();
        assert!(path.ends_with("trace.json"));

        let back = read_run_trace(&run_id, dir.path()).unwrap();
        assert_eq!(back.run, trace.run);
        assert_eq!(back.stages_digest, trace.stages_digest);
    }

    #[test]
    fn test_tampered_trace_is_rejected() {
        let dir = tempdir().unwrap();
        let run = run_with_stage();
        let run_id = run.run_id.to_string();

        let trace = RunTrace::from_run(run).unwrap();
        let path = write_run_trace(&trace, dir.path()).unwrap();

        // Flip the recorded outcome on disk.
        let text = std::fs::read_to_string(&path)
            .unwrap()
            .replace("\"success\": true", "\"success\": false");
        std::fs::write(&path, text).unwrap();

        assert!(matches!(
            read_run_trace(&run_id, dir.path()),
            Err(GantryError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_trace_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            read_run_trace("no-such-run", dir.path()),
            Err(GantryError::Io(_))
        ));
    }
}
