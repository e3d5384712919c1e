//! Error types for stockroom-core

use std::time::Duration;

use thiserror::Error;

/// Result type alias using stockroom-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stockroom-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Product input rejected before it reached the queue
    #[error("Invalid product: {0}")]
    Validation(String),

    /// Company lookup could not be found or created
    #[error("Lookup resolution failed: {0}")]
    LookupResolution(String),

    /// Image upload failed
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Single record create failed
    #[error("Submit failed: {0}")]
    Submit(String),

    /// Batch commit failed as a whole
    #[error("Batch commit failed: {0}")]
    Commit(String),

    /// Change stream dropped
    #[error("Change stream error: {0}")]
    Stream(String),

    /// Remote call exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this error belongs to the sync-time taxonomy that is reported
    /// as a notification instead of failing the caller.
    pub const fn is_sync_failure(&self) -> bool {
        matches!(
            self,
            Self::LookupResolution(_)
                | Self::Upload(_)
                | Self::Submit(_)
                | Self::Commit(_)
                | Self::Stream(_)
                | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_failures_are_classified() {
        assert!(Error::Submit("offline".to_string()).is_sync_failure());
        assert!(Error::Timeout {
            operation: "create_record",
            after: Duration::from_secs(1),
        }
        .is_sync_failure());
        assert!(!Error::Validation("name".to_string()).is_sync_failure());
        assert!(!Error::Database("locked".to_string()).is_sync_failure());
    }

    #[test]
    fn timeout_message_names_operation() {
        let error = Error::Timeout {
            operation: "upload_blob",
            after: Duration::from_secs(30),
        };
        assert_eq!(error.to_string(), "upload_blob timed out after 30s");
    }
}
