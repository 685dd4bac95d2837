//! Error types for salesetl.
//!
//! Library crates use [`PipelineError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// One or more mandatory raw files are absent after a download attempt.
    #[error("missing required source files: {}", files.join(", "))]
    MissingRequiredSource { files: Vec<String> },

    /// Required canonical columns are absent after normalization.
    /// Entries are formatted `table.Column`.
    #[error("schema validation failed, missing required columns: {}", missing.join(", "))]
    SchemaValidation { missing: Vec<String> },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during extraction.
    #[error("network error: {0}")]
    Network(String),

    /// CSV parsing error that no fallback tier could recover from.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Parquet/Arrow persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (unknown column, invalid shape, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
