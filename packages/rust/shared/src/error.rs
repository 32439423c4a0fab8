//! Error types for Harvestline.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::LookupKind;

/// Top-level error type for all Harvestline operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A collector, collection type or status name has no matching row.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: LookupKind, name: String },

    /// Any failure reported by the storage driver.
    #[error("storage error: {0}")]
    Storage(String),

    /// A dependency could not be constructed.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad plan file, out-of-range value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A target filter combination with no defined semantics.
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a not-found error for a lookup name.
    pub fn not_found(kind: LookupKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
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

    /// Whether this error came from the storage driver.
    ///
    /// Read and report paths swallow these and fall back to a neutral value.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = HarvestError::config("batch_size must be positive");
        assert_eq!(err.to_string(), "config error: batch_size must be positive");

        let err = HarvestError::not_found(LookupKind::Collector, "wikipedia");
        assert_eq!(err.to_string(), "collector 'wikipedia' not found");

        let err = HarvestError::not_found(LookupKind::Status, "archived");
        assert!(err.to_string().contains("collection status 'archived'"));
    }

    #[test]
    fn only_storage_errors_are_transient() {
        assert!(HarvestError::Storage("disk I/O error".into()).is_transient());
        assert!(!HarvestError::not_found(LookupKind::Type, "article").is_transient());
        assert!(!HarvestError::validation("bad plan").is_transient());
        assert!(!HarvestError::UnsupportedFilter("ids".into()).is_transient());
    }
}
