//! Toolchain pin file parsing and version verification.
//!
//! The pin file is the single source of truth for required tool versions
//! (`.tool-versions` format: one `name version` pair per line, `#`
//! comments). The active environment must resolve to exactly the pinned
//! version before any quality-gate or test target may run.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{GantryError, ParseError, Result};

/// Required tool versions, keyed by tool name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainSpec {
    pins: BTreeMap<String, String>,
}

impl ToolchainSpec {
    /// Build a spec from explicit pins.
    pub fn from_pins(pins: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            pins: pins.into_iter().collect(),
        }
    }

    /// Parse the line-oriented pin file format.
    ///
    /// Blank lines and `#` comments are ignored. Every other line must be
    /// `name version`; anything else is a hard parse error.
    pub fn parse(content: &str) -> Result<Self> {
        let mut pins = BTreeMap::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(tool), Some(version), None) => {
                    pins.insert(tool.to_string(), version.to_string());
                }
                _ => {
                    return Err(ParseError::MalformedPinLine {
                        line: idx + 1,
                        content: raw.to_string(),
                    }
                    .into())
                }
            }
        }
        if pins.is_empty() {
            return Err(ParseError::EmptyPinFile.into());
        }
        Ok(Self { pins })
    }

    /// Load and parse the pin file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Pinned version for `tool`, if declared.
    pub fn pinned(&self, tool: &str) -> Option<&str> {
        self.pins.get(tool).map(String::as_str)
    }

    /// Iterate `(tool, version)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pins.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pinned tools.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// True when no tools are pinned.
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Assert the active version of `tool` equals its pin.
    ///
    /// Mismatch is a hard failure naming both versions. Unpinned tools
    /// always pass.
    pub fn check(&self, tool: &str, active: &str) -> Result<()> {
        match self.pins.get(tool) {
            Some(pinned) if pinned != active => Err(GantryError::ToolchainMismatch {
                tool: tool.to_string(),
                pinned: pinned.clone(),
                active: active.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Deterministic SHA-256 digest over the sorted pin set.
    ///
    /// Used to tag pipeline runs with the toolchain they executed under.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (tool, version) in &self.pins {
            hasher.update(tool.as_bytes());
            hasher.update(b"\0");
            hasher.update(version.as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}
