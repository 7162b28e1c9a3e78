//! Release build matrix: operating system x CPU architecture cells.
//!
//! Each cell derives its target triple and platform-compatibility tag and
//! owns exactly one artifact per revision. Expansion is the Cartesian
//! product of the configured OS and architecture lists; the wheel
//! filename encodes the cell so no two cells can collide.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GantryError, Result};

/// Operating systems the release builder targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOs {
    Linux,
    Macos,
    Windows,
}

impl TargetOs {
    pub fn name(&self) -> &'static str {
        match self {
            TargetOs::Linux => "linux",
            TargetOs::Macos => "macos",
            TargetOs::Windows => "windows",
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// CPU architectures the release builder targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetArch {
    X86_64,
    Aarch64,
}

impl TargetArch {
    pub fn name(&self) -> &'static str {
        match self {
            TargetArch::X86_64 => "x86_64",
            TargetArch::Aarch64 => "aarch64",
        }
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One build unit: an (OS, architecture) pair producing one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildMatrixCell {
    pub os: TargetOs,
    pub arch: TargetArch,
}

impl BuildMatrixCell {
    pub fn new(os: TargetOs, arch: TargetArch) -> Self {
        Self { os, arch }
    }

    /// Rust target triple for this cell.
    pub fn target_triple(&self) -> &'static str {
        match (self.os, self.arch) {
            (TargetOs::Linux, TargetArch::X86_64) => "x86_64-unknown-linux-gnu",
            (TargetOs::Linux, TargetArch::Aarch64) => "aarch64-unknown-linux-gnu",
            (TargetOs::Macos, TargetArch::X86_64) => "x86_64-apple-darwin",
            (TargetOs::Macos, TargetArch::Aarch64) => "aarch64-apple-darwin",
            (TargetOs::Windows, TargetArch::X86_64) => "x86_64-pc-windows-msvc",
            (TargetOs::Windows, TargetArch::Aarch64) => "aarch64-pc-windows-msvc",
        }
    }

    /// Wheel platform-compatibility tag for this cell (manylinux-style on
    /// Linux).
    pub fn platform_tag(&self) -> String {
        match (self.os, self.arch) {
            (TargetOs::Linux, arch) => format!("manylinux2014_{arch}"),
            (TargetOs::Macos, TargetArch::X86_64) => "macosx_10_12_x86_64".to_string(),
            (TargetOs::Macos, TargetArch::Aarch64) => "macosx_11_0_arm64".to_string(),
            (TargetOs::Windows, TargetArch::X86_64) => "win_amd64".to_string(),
            (TargetOs::Windows, TargetArch::Aarch64) => "win_arm64".to_string(),
        }
    }

    /// Short `os-arch` label for logs and stage names.
    pub fn label(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }

    /// Wheel filename for this cell. Encodes package, version, interpreter
    /// tag, and platform tag, so the cell is unambiguous from the name.
    pub fn wheel_filename(&self, package: &str, version: &str, interpreter_tag: &str) -> String {
        format!(
            "{}-{}-{}-{}-{}.whl",
            package.replace('-', "_"),
            version,
            interpreter_tag,
            interpreter_tag,
            self.platform_tag()
        )
    }
}

impl fmt::Display for BuildMatrixCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// The configured OS and architecture lists, expanded on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMatrix {
    pub oses: Vec<TargetOs>,
    pub arches: Vec<TargetArch>,
}

impl BuildMatrix {
    pub fn new(oses: Vec<TargetOs>, arches: Vec<TargetArch>) -> Self {
        Self { oses, arches }
    }

    /// Expand to the Cartesian product of OSes and architectures.
    pub fn expand(&self) -> Vec<BuildMatrixCell> {
        self.oses
            .iter()
            .flat_map(|&os| self.arches.iter().map(move |&arch| BuildMatrixCell::new(os, arch)))
            .collect()
    }

    /// Verify that no two cells produce colliding wheel filenames.
    pub fn verify_unique_filenames(
        &self,
        package: &str,
        version: &str,
        interpreter_tag: &str,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for cell in self.expand() {
            let name = cell.wheel_filename(package, version, interpreter_tag);
            if !seen.insert(name.clone()) {
                return Err(GantryError::FilenameCollision { filename: name });
            }
        }
        Ok(())
    }
}

impl Default for BuildMatrix {
    /// The release matrix the CI workflow ships: every supported OS
    /// crossed with x86_64 and aarch64.
    fn default() -> Self {
        Self {
            oses: vec![TargetOs::Linux, TargetOs::Macos, TargetOs::Windows],
            arches: vec![TargetArch::X86_64, TargetArch::Aarch64],
        }
    }
}
