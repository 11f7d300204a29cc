//! Error types for the tracking engine
//!
//! This module provides structured error definitions using thiserror, with
//! anyhow accepted at the edges for error propagation.

use thiserror::Error;

/// Main error type for tracking operations
#[derive(Error, Debug)]
pub enum TrackingError {
    /// Malformed request from a caller (bad date window, missing ids)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid argument passed to a key or date helper
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An id required for classification could not be resolved
    #[error("Lookup failed: {0}")]
    Lookup(String),

    /// Malformed event or mismatched update; a programming error in the caller
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Preallocation or increment failed for a tracker key.
    ///
    /// `applied` lists the keys whose increments were already committed
    /// by the same `record()` call.
    #[error("Storage error on tracker '{key}': {message}")]
    Storage {
        key: String,
        message: String,
        applied: Vec<String>,
    },

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl TrackingError {
    /// Build a storage error for a single key with nothing applied yet
    pub fn storage(key: impl Into<String>, message: impl Into<String>) -> Self {
        TrackingError::Storage {
            key: key.into(),
            message: message.into(),
            applied: Vec::new(),
        }
    }

    /// Whether the caller may retry the whole `record()` call
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TrackingError::Storage { .. } | TrackingError::Database(_)
        )
    }
}

/// Result type alias for tracking operations
pub type Result<T> = std::result::Result<T, TrackingError>;

impl From<libsql::Error> for TrackingError {
    fn from(err: libsql::Error) -> Self {
        TrackingError::Database(err.to_string())
    }
}

/// Convert anyhow::Error to TrackingError
impl From<anyhow::Error> for TrackingError {
    fn from(err: anyhow::Error) -> Self {
        TrackingError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackingError::Lookup("author of post p1".to_string());
        assert_eq!(err.to_string(), "Lookup failed: author of post p1");

        let err = TrackingError::storage("u12410", "tracker not preallocated");
        assert_eq!(
            err.to_string(),
            "Storage error on tracker 'u12410': tracker not preallocated"
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(TrackingError::storage("k", "boom").is_recoverable());
        assert!(TrackingError::Database("locked".into()).is_recoverable());
        assert!(!TrackingError::InvalidRequest("no start".into()).is_recoverable());
        assert!(!TrackingError::InvariantViolation("no parent".into()).is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json");
        let err: TrackingError = json_err.unwrap_err().into();
        assert!(matches!(err, TrackingError::Serialization(_)));

        let err: TrackingError = anyhow::anyhow!("context").into();
        assert!(matches!(err, TrackingError::Other(_)));
    }
}
