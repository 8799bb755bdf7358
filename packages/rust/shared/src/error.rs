//! Error types for FilingDesk.
//!
//! Library crates use [`FilingDeskError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::metadata::MetadataIssue;

/// Top-level error type for all FilingDesk operations.
#[derive(Debug, thiserror::Error)]
pub enum FilingDeskError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to the object store.
    #[error("network error: {0}")]
    Network(String),

    /// PDF decoding or text extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad upload, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Upload metadata failed one or more schema rules.
    #[error("invalid upload metadata: {}", format_issues(.issues))]
    InvalidMetadata { issues: Vec<MetadataIssue> },

    /// No acting user was supplied for a user-scoped operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The acting user exhausted their submission budget.
    #[error("rate limited: retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A requested row does not exist or is not visible to the caller.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FilingDeskError>;

fn format_issues(issues: &[MetadataIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.field, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl FilingDeskError {
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

    /// HTTP status equivalent, used when reporting failures to API callers.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::InvalidMetadata { .. } | Self::Parse { .. } => 400,
            Self::Unauthorized(_) => 401,
            Self::NotFound(_) => 404,
            Self::RateLimited { .. } => 429,
            Self::Network(_) => 502,
            Self::Config { .. } | Self::Storage(_) | Self::Io { .. } => 500,
        }
    }
}
