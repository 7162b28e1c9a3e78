//! Domain-level error taxonomy for Gantry.

/// Errors produced by pin-file and manifest parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("pin file line {line} is malformed: {content:?}")]
    MalformedPinLine { line: usize, content: String },

    #[error("pin file declares no tools")]
    EmptyPinFile,

    #[error("manifest missing required field: {field}")]
    MissingManifestField { field: String },
}

/// Gantry domain errors.
#[derive(Debug, thiserror::Error)]
pub enum GantryError {
    #[error("unknown target: {0}")]
    TargetNotFound(String),

    #[error("invalid target name: {0}")]
    InvalidTargetName(String),

    #[error("target dependency cycle: {}", targets.join(" -> "))]
    DependencyCycle { targets: Vec<String> },

    #[error("toolchain mismatch for {tool}: pinned {pinned}, active {active}")]
    ToolchainMismatch {
        tool: String,
        pinned: String,
        active: String,
    },

    #[error("stage {stage} failed with exit code {code}")]
    StageFailed { stage: String, code: i32 },

    #[error("artifact {artifact} rejected: {reason}")]
    ArtifactRejected { artifact: String, reason: String },

    #[error("artifact filename collision in build matrix: {filename}")]
    FilenameCollision { filename: String },

    #[error("invalid pipeline transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("secret leak detected: {findings} finding(s)")]
    SecretLeak { findings: usize },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("git error: {0}")]
    GitError(String),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("manifest error: {0}")]
    Manifest(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Gantry domain operations.
pub type Result<T> = std::result::Result<T, GantryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toolchain_mismatch_names_both_versions() {
        let err = GantryError::ToolchainMismatch {
            tool: "python".to_string(),
            pinned: "3.11.4".to_string(),
            active: "3.11.5".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3.11.4"));
        assert!(msg.contains("3.11.5"));
        assert!(msg.contains("python"));
    }

    #[test]
    fn test_cycle_error_renders_path() {
        let err = GantryError::DependencyCycle {
            targets: vec!["lints".into(), "format".into(), "lints".into()],
        };
        assert!(err.to_string().contains("lints -> format -> lints"));
    }

    #[test]
    fn test_stage_failed_display() {
        let err = GantryError::StageFailed {
            stage: "lints.mypy".to_string(),
            code: 2,
        };
        assert!(err.to_string().contains("lints.mypy"));
        assert!(err.to_string().contains('2'));
    }
}
