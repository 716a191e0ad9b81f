//! Error types for the operation engine.

use std::path::{Path, PathBuf};

use refile_core::{BatchId, OperationKind, ValidationError};
use refile_log::LogError;
use thiserror::Error;

/// Errors reported synchronously, before any background work starts.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The batch id is unknown or was already executed.
    #[error("Batch not found or already executed: {batch_id}")]
    BatchNotFound { batch_id: BatchId },

    /// Nothing was selected for execution.
    #[error("No items selected")]
    EmptySelection,

    /// The selection references items that are not in the batch.
    #[error("Unknown item ids: {ids:?}")]
    UnknownItems { ids: Vec<u32> },

    /// More proposals than a single batch may hold.
    #[error("Too many items: {count} (maximum {max})")]
    TooManyItems { count: usize, max: usize },

    /// The batch holds a different kind of operation.
    #[error("Batch {batch_id} holds {actual} operations, expected {expected}")]
    WrongBatchKind {
        batch_id: BatchId,
        expected: OperationKind,
        actual: OperationKind,
    },

    /// A confirmation names a file that was not part of the staged batch.
    #[error("File '{file_name}' ({path}) does not belong to batch {batch_id}")]
    NotInBatch {
        batch_id: BatchId,
        file_name: String,
        path: PathBuf,
    },

    /// A destination folder exists but is not a directory.
    #[error("Target is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// A job for this batch is still in progress.
    #[error("A job for batch {batch_id} is already running")]
    AlreadyRunning { batch_id: BatchId },

    /// The job queue cannot take more work right now.
    #[error("Job queue is full, try again later")]
    QueueFull,

    /// The job queue has shut down.
    #[error("Job queue is closed")]
    QueueClosed,

    /// Invalid path or filename.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Operation log failure.
    #[error(transparent)]
    Log(#[from] LogError),

    /// A blocking task could not complete.
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Failure of a single item inside a batch.
///
/// Rendered into the batch's error list; never aborts the batch.
#[derive(Debug, Error)]
pub enum ItemError {
    /// The recorded source path no longer exists.
    #[error("Source no longer present: {path}")]
    SourceMissing { path: PathBuf },

    /// The OS refused the move.
    #[error("Permission denied: {from} -> {to}")]
    PermissionDenied { from: PathBuf, to: PathBuf },

    /// The target lies inside the source directory.
    #[error("Cannot move {source_path} into itself ({target})")]
    IntoItself {
        source_path: PathBuf,
        target: PathBuf,
    },

    /// The destination directory could not be created.
    #[error("Could not create directory {path}: {message}")]
    CreateDir { path: PathBuf, message: String },

    /// Conflict resolution ran out of candidate names.
    #[error("Too many name conflicts for {path} ({attempts} attempts)")]
    TooManyConflicts { path: PathBuf, attempts: u32 },

    /// Any other OS-level failure.
    #[error("Error moving {name}: {message}")]
    Io { name: String, message: String },

    /// A cross-filesystem copy left an entry at `copy` next to the source.
    #[error("Error moving {name}: a copy was left at {copy}: {message}")]
    Partial {
        name: String,
        copy: PathBuf,
        message: String,
    },

    /// The blocking task running the item failed.
    #[error("Task failed: {0}")]
    Task(String),
}

impl ItemError {
    /// Where a partial move left its copy, if it left one.
    pub fn partial_copy(&self) -> Option<&Path> {
        match self {
            Self::Partial { copy, .. } => Some(copy.as_path()),
            _ => None,
        }
    }
}
