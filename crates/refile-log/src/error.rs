//! Error types for the operation log.

use std::path::PathBuf;

use refile_core::{OperationId, OperationStatus};
use thiserror::Error;

/// Errors that can occur while reading or writing the operation log.
#[derive(Debug, Error)]
pub enum LogError {
    /// Underlying SQLite failure.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory could not be created.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No row with this id exists.
    #[error("Operation {id} not found")]
    NotFound { id: OperationId },

    /// The requested status change is not allowed.
    #[error("Operation {id} cannot change from {from} to {to}")]
    InvalidTransition {
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    },

    /// A path cannot be stored without loss.
    #[error("Path is not valid UTF-8: {path}")]
    NonUtf8Path { path: PathBuf },

    /// Pagination parameters are out of range.
    #[error("Invalid history query: {message}")]
    InvalidQuery { message: String },

    /// The shared connection lock was poisoned by a panicking writer.
    #[error("Operation log connection is poisoned")]
    Poisoned,
}
