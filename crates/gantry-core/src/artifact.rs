//! Built artifacts and the post-build metadata gate.
//!
//! An [`Artifact`] is one wheel produced by one build-matrix cell for one
//! source revision. Its lifecycle is strictly forward:
//! `Built → Validated` or `Built → Rejected`. A rejected artifact is
//! discarded, never repaired in place.
//!
//! The [`ArtifactRuleSet`] gate evaluates an artifact's metadata and
//! on-disk structure against a rule list, producing an
//! [`ArtifactVerdict`] with the full violation set.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{GantryError, Result};
use crate::matrix::BuildMatrixCell;

/// Lifecycle state of a built artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    /// Produced by the builder, not yet validated.
    Built,
    /// Passed the metadata gate; eligible for publish.
    Validated,
    /// Failed the metadata gate; discarded. Terminal.
    Rejected,
}

/// One wheel tied to one build-matrix cell and one source revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Package name as declared in the project manifest.
    pub package: String,
    /// Package version.
    pub version: String,
    /// The cell that produced this artifact.
    pub cell: BuildMatrixCell,
    /// Git SHA of the source revision.
    pub source_sha: String,
    /// Path of the wheel on disk.
    pub path: PathBuf,
    /// SHA-256 hex digest of the wheel contents, computed at creation.
    pub content_digest: String,
    /// When the builder produced the wheel.
    pub created_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: ArtifactState,
    /// Reason the gate rejected the artifact, when `state == Rejected`.
    pub rejection_reason: Option<String>,
}

impl Artifact {
    /// Record a freshly built wheel, hashing its contents from disk.
    pub fn from_build(
        package: impl Into<String>,
        version: impl Into<String>,
        cell: BuildMatrixCell,
        source_sha: impl Into<String>,
        path: PathBuf,
    ) -> Result<Self> {
        let bytes = std::fs::read(&path)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(Self {
            package: package.into(),
            version: version.into(),
            cell,
            source_sha: source_sha.into(),
            path,
            content_digest: hex::encode(hasher.finalize()),
            created_at: Utc::now(),
            state: ArtifactState::Built,
            rejection_reason: None,
        })
    }

    /// Wheel filename component of `path`.
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Mark the artifact validated. Only legal from `Built`.
    pub fn mark_validated(&mut self) -> Result<()> {
        match self.state {
            ArtifactState::Built => {
                self.state = ArtifactState::Validated;
                Ok(())
            }
            other => Err(GantryError::InvalidTransition {
                from: format!("{other:?}"),
                to: "Validated".to_string(),
            }),
        }
    }

    /// Mark the artifact rejected and record why. Only legal from `Built`.
    pub fn mark_rejected(&mut self, reason: impl Into<String>) -> Result<()> {
        match self.state {
            ArtifactState::Built => {
                self.state = ArtifactState::Rejected;
                self.rejection_reason = Some(reason.into());
                Ok(())
            }
            other => Err(GantryError::InvalidTransition {
                from: format!("{other:?}"),
                to: "Rejected".to_string(),
            }),
        }
    }
}

/// A single artifact-gate rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactRule {
    /// Filename must be `{pkg}-{version}-{tag}-{tag}-{platform}.whl` with
    /// the platform tag of the producing cell.
    FilenameEncodesCell { interpreter_tag: String },
    /// The wheel file must exist and be non-empty.
    NonEmptyFile,
    /// `source_sha` must be non-empty.
    RequireSourceSha,
    /// `version` must be non-empty.
    RequireVersion,
}

/// Gate verdict with the full violation set (the gate never
/// short-circuits unless `fail_fast` is requested).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactVerdict {
    pub passed: bool,
    pub violations: Vec<String>,
}

/// An ordered rule list with a fail-fast flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRuleSet {
    pub rules: Vec<ArtifactRule>,
    pub fail_fast: bool,
}

impl ArtifactRuleSet {
    /// Standard post-build gate: structural check plus full metadata set.
    pub fn standard(interpreter_tag: impl Into<String>) -> Self {
        Self {
            rules: vec![
                ArtifactRule::NonEmptyFile,
                ArtifactRule::FilenameEncodesCell {
                    interpreter_tag: interpreter_tag.into(),
                },
                ArtifactRule::RequireVersion,
                ArtifactRule::RequireSourceSha,
            ],
            fail_fast: false,
        }
    }

    /// Evaluate all rules against `artifact`.
    pub fn evaluate(&self, artifact: &Artifact) -> ArtifactVerdict {
        let mut violations = Vec::new();

        for rule in &self.rules {
            let violation = match rule {
                ArtifactRule::FilenameEncodesCell { interpreter_tag } => {
                    let expected = artifact.cell.wheel_filename(
                        &artifact.package,
                        &artifact.version,
                        interpreter_tag,
                    );
                    if artifact.filename() != expected {
                        Some(format!(
                            "filename {:?} does not encode cell {} (expected {:?})",
                            artifact.filename(),
                            artifact.cell,
                            expected
                        ))
                    } else {
                        None
                    }
                }
                ArtifactRule::NonEmptyFile => match std::fs::metadata(&artifact.path) {
                    Ok(meta) if meta.len() > 0 => None,
                    Ok(_) => Some(format!("wheel {:?} is empty", artifact.path)),
                    Err(e) => Some(format!("wheel {:?} unreadable: {e}", artifact.path)),
                },
                ArtifactRule::RequireSourceSha => {
                    if artifact.source_sha.is_empty() {
                        Some("artifact has no source revision".to_string())
                    } else {
                        None
                    }
                }
                ArtifactRule::RequireVersion => {
                    if artifact.version.is_empty() {
                        Some("artifact has no version".to_string())
                    } else {
                        None
                    }
                }
            };

            if let Some(v) = violation {
                violations.push(v);
                if self.fail_fast {
                    break;
                }
            }
        }

        ArtifactVerdict {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Evaluate and transition the artifact accordingly: `Validated` on a
    /// clean verdict, `Rejected` (with the joined violation list) otherwise.
    pub fn apply(&self, artifact: &mut Artifact) -> Result<ArtifactVerdict> {
        let verdict = self.evaluate(artifact);
        if verdict.passed {
            artifact.mark_validated()?;
        } else {
            artifact.mark_rejected(verdict.violations.join("; "))?;
        }
        Ok(verdict)
    }
}

/// Check a directory for leftover artifacts from other revisions.
///
/// The builder requires an empty output directory per cell so stale
/// wheels can never be promoted by accident.
pub fn assert_clean_output_dir(dir: &Path) -> Result<()> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => {
            if let Some(entry) = entries.next() {
                let entry = entry?;
                return Err(GantryError::ArtifactRejected {
                    artifact: entry.path().display().to_string(),
                    reason: "stale file in output directory".to_string(),
                });
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
