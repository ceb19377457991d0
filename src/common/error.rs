//! Error types for compose-suite
//!
//! Fatal errors (configuration, missing tooling, image preparation) abort the
//! whole run. Everything a single test can hit is wrapped by the runner into a
//! [`StepFailure`](crate::testing::StepFailure) instead.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for compose-suite
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid suite descriptor '{path}': {reason}")]
    ConfigParse { path: String, reason: String },

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Environment Errors ===
    #[error("Orchestration tool '{tool}' is not available: {reason}")]
    RuntimeUnavailable { tool: String, reason: String },

    #[error("Could not prepare host: {0}")]
    HostSetup(String),

    #[error("Could not prepare system: {0}")]
    Preparation(String),

    // === Runtime Errors ===
    #[error("Failed to spawn '{command}': {error}")]
    Spawn { command: String, error: String },

    #[error("Command '{command}' failed: {status}")]
    CommandFailed { command: String, status: String },

    #[error("Command '{0}' was cancelled")]
    Cancelled(String),

    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Service '{name}' is not defined in {system}")]
    UnknownService { name: String, system: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a descriptor parse error for `path`
    pub fn config_parse(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Self::ConfigParse {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a file read error for `path`
    pub fn file_read(path: impl AsRef<std::path::Path>, error: impl ToString) -> Self {
        Self::FileRead {
            path: path.as_ref().display().to_string(),
            error: error.to_string(),
        }
    }

    /// Create a failed-command error
    pub fn command_failed(command: &str, status: impl ToString) -> Self {
        Self::CommandFailed {
            command: command.to_string(),
            status: status.to_string(),
        }
    }

    /// Whether this error aborts the whole suite rather than a single test
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse { .. }
                | Error::FileRead { .. }
                | Error::RuntimeUnavailable { .. }
                | Error::HostSetup(_)
                | Error::Preparation(_)
        )
    }

    /// Process exit code for errors that escape the suite
    pub fn exit_code(&self) -> i32 {
        2
    }
}
