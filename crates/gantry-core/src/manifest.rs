//! Project manifest parsing.
//!
//! The orchestrator reads package identity from the pyproject-style
//! manifest's `[project]` table. Dependency resolution stays with the
//! package manager; only name, version, and the build backend matter
//! here.

use std::path::Path;

use serde::Deserialize;

use crate::error::{ParseError, Result};

/// The subset of the project manifest the orchestrator consumes.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProjectManifest {
    pub project: ProjectTable,
    #[serde(rename = "build-system", default)]
    pub build_system: Option<BuildSystem>,
}

/// `[project]` table fields.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProjectTable {
    pub name: String,
    pub version: String,
    #[serde(rename = "requires-python", default)]
    pub requires_python: Option<String>,
}

/// `[build-system]` table fields.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BuildSystem {
    #[serde(rename = "build-backend", default)]
    pub build_backend: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
}

impl ProjectManifest {
    /// Parse manifest content.
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: ProjectManifest = toml::from_str(content)?;
        if manifest.project.name.is_empty() {
            return Err(ParseError::MissingManifestField {
                field: "project.name".to_string(),
            }
            .into());
        }
        if manifest.project.version.is_empty() {
            return Err(ParseError::MissingManifestField {
                field: "project.version".to_string(),
            }
            .into());
        }
        Ok(manifest)
    }

    /// Load and parse the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// True when the declared build backend is a native-extension builder.
    pub fn uses_native_backend(&self) -> bool {
        self.build_system
            .as_ref()
            .and_then(|b| b.build_backend.as_deref())
            .map(|backend| backend.starts_with("maturin"))
            .unwrap_or(false)
    }
}
