//! Error types for vod-dl
//!
//! This module provides the error hierarchy for the library:
//! - [`Error`], the top-level error returned by public operations
//! - [`DatabaseError`] for persistence failures
//! - [`CatalogError`] for catalog collaborator failures
//! - [`ProcessError`] for external fetch-tool supervision failures
//!
//! Policy exclusions and transient data faults are *not* errors: they are recorded on the
//! item as an [`OutcomeCode`](crate::types::OutcomeCode). Errors only describe failures of
//! the machinery itself.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for vod-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vod-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.save_dir")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Catalog collaborator failure
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// External process supervision failure
    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Item not found
    #[error("item not found: {0}")]
    NotFound(String),

    /// Item is already present in the operator queue or the store
    #[error("already queued: {0}")]
    AlreadyQueued(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// A scheduled run waited too long for a free download slot
    #[error("waited {waited_secs}s for a download slot for {content_id}, aborting run")]
    DispatchWaitTimeout {
        /// Content id of the item that was waiting
        content_id: String,
        /// Seconds elapsed since the run started
        waited_secs: u64,
    },

    /// External tool execution failed
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, missing collaborator, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Stored document could not be decoded
    #[error("corrupt row {id}: {reason}")]
    CorruptRow {
        /// Row id
        id: i64,
        /// What failed to decode
        reason: String,
    },
}

/// Errors reported by a [`CatalogApi`](crate::catalog::CatalogApi) implementation
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog could not be reached (timeouts, connection resets)
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    /// The catalog answered but refused the request
    #[error("catalog rejected request for {content_id}: {reason}")]
    Rejected {
        /// Content id the request was about
        content_id: String,
        /// Reason given by the catalog
        reason: String,
    },

    /// The catalog answered with a document that could not be understood
    #[error("malformed catalog document: {0}")]
    Malformed(String),
}

/// Errors raised while supervising an external process
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The binary could not be started
    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed {
        /// Program that failed to launch
        program: PathBuf,
        /// OS error text
        reason: String,
    },

    /// Reading the process output failed
    #[error("failed to read process output: {0}")]
    OutputRead(String),

    /// Waiting for or killing the process failed
    #[error("failed to reap process: {0}")]
    Wait(String),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_wait_timeout_message_names_the_item() {
        let err = Error::DispatchWaitTimeout {
            content_id: "S01_E0042".to_string(),
            waited_secs: 3600,
        };
        let msg = err.to_string();
        assert!(msg.contains("S01_E0042"), "message should name the item: {msg}");
        assert!(msg.contains("3600"), "message should include the wait: {msg}");
    }

    #[test]
    fn catalog_error_converts_into_error() {
        let err: Error = CatalogError::Unavailable("connection reset".to_string()).into();
        assert!(matches!(err, Error::Catalog(CatalogError::Unavailable(_))));
    }

    #[test]
    fn database_error_display_keeps_context() {
        let err = Error::Database(DatabaseError::QueryFailed(
            "Failed to list items: disk I/O error".to_string(),
        ));
        assert_eq!(
            err.to_string(),
            "database error: query failed: Failed to list items: disk I/O error"
        );
    }
}
