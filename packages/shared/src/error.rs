//! Error types for recrawl.
//!
//! Library crates use [`RecrawlError`] via `thiserror`. The CLI wraps this
//! with `color-eyre` for rich diagnostics. Fetch-level failures are a
//! separate concern: they are classified into record statuses rather than
//! propagated, so they never appear here.

use std::path::PathBuf;

/// Top-level error type for recrawl infrastructure operations.
#[derive(Debug, thiserror::Error)]
pub enum RecrawlError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or cache layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Browser session launch or teardown error.
    #[error("browser error: {0}")]
    Browser(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad record shape, underivable URL, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Worker task failure (panic or cancellation).
    #[error("task error: {0}")]
    Task(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RecrawlError>;

impl RecrawlError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a storage error from any displayable message.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a browser error from any displayable message.
    pub fn browser(msg: impl Into<String>) -> Self {
        Self::Browser(msg.into())
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a task error from any displayable message.
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = RecrawlError::config("missing record store path");
        assert_eq!(err.to_string(), "config error: missing record store path");

        let err = RecrawlError::validation("record has no url field");
        assert!(err.to_string().contains("no url field"));
    }
}
