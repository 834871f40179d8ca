//! Error types for memento-gather
//!
//! This module provides the error handling used throughout the crate:
//! - [`Error`], the crate-wide error returned by store, substrate and dispatcher operations
//! - [`DatabaseError`], failures inside the Record Store
//!
//! Fetch failures reported by the archive collaborator live in
//! [`crate::archive::FetchError`]; they are classified by the worker rather than
//! propagated, so they never surface as an [`Error`].

use thiserror::Error;

/// Result type alias for memento-gather operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for memento-gather
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "dispatch.chunk_size")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// HTTP client could not be built
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error (work item wire format, config files)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The execution substrate lost track of submitted work
    #[error("execution substrate error: {0}")]
    Substrate(String),

    /// Shutdown in progress - not accepting new batches
    #[error("shutdown in progress: not accepting new batches")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Returns true if this error is a uniqueness or lifecycle constraint rejection
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::Database(DatabaseError::ConstraintViolation(_)))
    }
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

    /// Constraint violation (duplicate id, or a second terminal row for one record)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl DatabaseError {
    /// Map a sqlx error raised while writing, separating constraint rejections from other failures
    pub(crate) fn from_write(context: &str, e: sqlx::Error) -> Self {
        let is_constraint = e
            .as_database_error()
            .map(|db| db.is_unique_violation() || db.message().contains("lifecycle violation"))
            .unwrap_or(false);

        if is_constraint {
            DatabaseError::ConstraintViolation(format!("{}: {}", context, e))
        } else {
            DatabaseError::QueryFailed(format!("{}: {}", context, e))
        }
    }
}
