//! Error types for the environment bootstrapper.

use thiserror::Error;

/// Errors that can occur while bootstrapping the toolchain environment.
#[derive(Error, Debug)]
pub enum EnvError {
    /// Tool not installed and not installable.
    #[error("{tool} is not installed or not in PATH")]
    ToolNotFound { tool: String },

    /// Active tool version differs from the pin.
    #[error(
        "{tool} version mismatch: pinned {pinned}, active {active} \
         (update the pin file or run `gantry run setup`)"
    )]
    VersionMismatch {
        tool: String,
        pinned: String,
        active: String,
    },

    /// Tool produced output no version could be read from.
    #[error("could not read a version from {tool} output: {output:?}")]
    VersionUnreadable { tool: String, output: String },

    /// The tool-version manager is unavailable.
    #[error("tool-version manager is not installed or not in PATH")]
    ManagerUnavailable,

    /// Plugin update + reinstall retry path failed.
    #[error("installing {tool} {version} failed: {detail}")]
    InstallFailed {
        tool: String,
        version: String,
        detail: String,
    },

    /// Virtual environment creation failed.
    #[error("virtualenv creation failed: {0}")]
    VenvFailed(String),

    /// Pin file problems (missing, malformed).
    #[error(transparent)]
    PinFile(#[from] gantry_core::GantryError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bootstrapper operations.
pub type Result<T> = std::result::Result<T, EnvError>;
