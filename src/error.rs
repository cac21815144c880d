//! Error kinds surfaced by the clicker core.
//!
//! Startup problems (`ConfigError`, `InvalidTemplateError`) and capture
//! failures are fatal and end the run with a non-zero status. `ActionError`
//! is recoverable: the hit is skipped and the next scan cycle retries.

use std::path::PathBuf;

use thiserror::Error;

/// The display could not be read (locked session, missing permission, no backend).
#[derive(Debug, Error)]
#[error("screen capture failed: {0}")]
pub struct CaptureError(pub String);

impl CaptureError {
    /// Wraps a backend error, keeping its context chain in the message.
    pub fn from_backend(err: anyhow::Error) -> Self {
        Self(format!("{:#}", err))
    }
}

/// A template that cannot be searched: unreadable, empty, or larger than its search area.
#[derive(Debug, Error)]
#[error("invalid template for target '{target}': {reason}")]
pub struct InvalidTemplateError {
    pub target: String,
    pub reason: String,
}

/// Pointer movement or click injection was rejected by the OS.
#[derive(Debug, Error)]
#[error("input injection failed: {0}")]
pub struct ActionError(pub String);

impl ActionError {
    pub fn from_backend(err: anyhow::Error) -> Self {
        Self(format!("{:#}", err))
    }
}

/// Malformed or missing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "target configuration not found: {0}. Create it based on targets.example.json"
    )]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no targets configured in {0}. Add entries to the JSON file before running")]
    NoTargets(PathBuf),

    #[error("{0}")]
    Invalid(String),
}

/// Fatal errors that end a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    InvalidTemplate(#[from] InvalidTemplateError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The pointer backend could not be opened at startup.
    #[error(transparent)]
    Input(#[from] ActionError),
}

impl RunError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) | RunError::InvalidTemplate(_) => 2,
            RunError::Capture(_) | RunError::Input(_) => 1,
        }
    }
}
