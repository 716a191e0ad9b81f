//! Reversal of logged operations.
//!
//! Every undo re-reads the log, runs the preflight checks, moves the file
//! from its recorded target back to its recorded source and then records
//! the new status. Batches are reversed newest row first.

use std::fs;
use std::path::{Path, PathBuf};

use refile_core::{mount_root, BatchId, OperationEntry, OperationId, OperationStatus};
use refile_log::LogError;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::{info, warn};

use crate::conflict::is_occupied;
use crate::error::EngineError;
use crate::executor::item_error;
use crate::move_op::move_item;
use crate::progress::{BatchProgress, JobKey, JobKind};
use crate::queue::JobContext;

/// HTTP-equivalent class of a synchronous undo outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    BadRequest,
    NotFound,
    Conflict,
    Internal,
    Unavailable,
}

impl ResponseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Internal => 500,
            Self::Unavailable => 503,
        }
    }
}

impl Serialize for ResponseCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

/// Why an operation cannot be reversed right now.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreflightFailure {
    #[error("Operation {id} was already reverted")]
    AlreadyReverted { id: OperationId },

    #[error("Operation {id} is marked revert_failed; use retry to attempt it again")]
    MarkedFailed { id: OperationId },

    #[error("Operation {id} did not complete and cannot be undone automatically")]
    NotRevertible { id: OperationId },

    #[error("Operation {id} is not marked revert_failed")]
    NotRetryable { id: OperationId },

    #[error("File is no longer at {path}; it was moved or deleted")]
    TargetMissing { path: PathBuf },

    #[error("Something already exists at {path}")]
    SourceOccupied { path: PathBuf },

    #[error("Volume {root} is not mounted")]
    VolumeUnavailable { root: PathBuf },
}

impl PreflightFailure {
    pub fn code(&self) -> ResponseCode {
        match self {
            Self::AlreadyReverted { .. }
            | Self::MarkedFailed { .. }
            | Self::NotRevertible { .. }
            | Self::NotRetryable { .. } => ResponseCode::BadRequest,
            Self::TargetMissing { .. } | Self::SourceOccupied { .. } => ResponseCode::Conflict,
            Self::VolumeUnavailable { .. } => ResponseCode::Unavailable,
        }
    }

    /// Whether the row should be marked `revert_failed`.
    ///
    /// Only a missing target is known to be permanent; everything else
    /// may clear up on its own.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::TargetMissing { .. })
    }
}

/// Result of a synchronous undo request.
#[derive(Debug, Clone, Serialize)]
pub struct UndoResult {
    pub success: bool,
    pub code: ResponseCode,
    pub message: String,
    /// The row after its status changed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<OperationEntry>,
}

impl UndoResult {
    fn failure(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            message: message.into(),
            entry: None,
        }
    }

    fn refused(failure: &PreflightFailure) -> Self {
        Self::failure(failure.code(), failure.to_string())
    }
}

/// Check that a row's status allows the requested undo.
///
/// A regular undo needs `completed`; an explicit retry needs `revert_failed`.
pub fn check_status(entry: &OperationEntry, retry: bool) -> Result<(), PreflightFailure> {
    let id = entry.id;
    match (entry.status, retry) {
        (OperationStatus::Completed, false) | (OperationStatus::RevertFailed, true) => Ok(()),
        (OperationStatus::Reverted, _) => Err(PreflightFailure::AlreadyReverted { id }),
        (OperationStatus::RevertFailed, false) => Err(PreflightFailure::MarkedFailed { id }),
        (OperationStatus::Failed, _) => Err(PreflightFailure::NotRevertible { id }),
        (OperationStatus::Completed, true) => Err(PreflightFailure::NotRetryable { id }),
    }
}

/// Filesystem preflight checks for reversing `entry`.
pub fn check_paths(entry: &OperationEntry, volume_roots: &[PathBuf]) -> Result<(), PreflightFailure> {
    let target = &entry.target_path;
    let source = &entry.source_path;

    if !is_occupied(target) {
        if let Some(root) = unmounted_volume(target, volume_roots) {
            return Err(PreflightFailure::VolumeUnavailable { root });
        }
        return Err(PreflightFailure::TargetMissing {
            path: target.clone(),
        });
    }
    if is_occupied(source) {
        return Err(PreflightFailure::SourceOccupied {
            path: source.clone(),
        });
    }
    if let Some(root) = unmounted_volume(source, volume_roots) {
        return Err(PreflightFailure::VolumeUnavailable { root });
    }
    Ok(())
}

fn unmounted_volume(path: &Path, volume_roots: &[PathBuf]) -> Option<PathBuf> {
    mount_root(path, volume_roots).filter(|root| !root.is_dir())
}

#[derive(Debug)]
enum RevertFailure {
    Refused(PreflightFailure),
    Io(String),
}

/// Move the file back on disk. Blocking.
fn reverse_on_disk(entry: &OperationEntry, volume_roots: &[PathBuf]) -> Result<(), RevertFailure> {
    check_paths(entry, volume_roots).map_err(RevertFailure::Refused)?;

    let source = &entry.source_path;
    let target = &entry.target_path;
    if let Some(parent) = source.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            RevertFailure::Io(format!("Could not create directory {}: {e}", parent.display()))
        })?;
    }
    move_item(target, source)
        .map_err(|failure| RevertFailure::Io(item_error(failure, target, source).to_string()))
}

/// Outcome of reversing one row.
#[derive(Debug)]
enum RevertOutcome {
    Reverted(OperationEntry),
    Refused(PreflightFailure),
    Failed(String),
}

async fn revert_entry(ctx: &JobContext, entry: OperationEntry) -> Result<RevertOutcome, EngineError> {
    let id = entry.id;
    let roots = ctx.config.volume_roots.clone();
    let reversal = tokio::task::spawn_blocking(move || reverse_on_disk(&entry, &roots))
        .await
        .map_err(|e| EngineError::Task(e.to_string()))?;

    match reversal {
        Ok(()) => {
            let row = ctx
                .with_log(move |log| log.set_status(id, OperationStatus::Reverted))
                .await?;
            Ok(RevertOutcome::Reverted(row))
        }
        Err(RevertFailure::Refused(failure)) => {
            if failure.is_permanent() {
                mark_revert_failed(ctx, id).await?;
            }
            Ok(RevertOutcome::Refused(failure))
        }
        Err(RevertFailure::Io(message)) => {
            mark_revert_failed(ctx, id).await?;
            Ok(RevertOutcome::Failed(message))
        }
    }
}

async fn mark_revert_failed(ctx: &JobContext, id: OperationId) -> Result<(), EngineError> {
    match ctx
        .with_log(move |log| log.set_status(id, OperationStatus::RevertFailed))
        .await
    {
        Ok(_) => Ok(()),
        // Another request already moved this row on.
        Err(EngineError::Log(LogError::InvalidTransition { from, .. })) => {
            warn!(id = %id, status = %from, "Row changed status during undo");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Undo a single operation. With `retry`, only `revert_failed` rows qualify.
pub(crate) async fn undo_one(ctx: &JobContext, id: OperationId, retry: bool) -> UndoResult {
    match try_undo_one(ctx, id, retry).await {
        Ok(result) => result,
        Err(e) => {
            warn!(id = %id, error = %e, "Undo failed");
            UndoResult::failure(ResponseCode::Internal, format!("Unexpected error: {e}"))
        }
    }
}

async fn try_undo_one(
    ctx: &JobContext,
    id: OperationId,
    retry: bool,
) -> Result<UndoResult, EngineError> {
    let Some(entry) = ctx.with_log(move |log| log.get(id)).await? else {
        return Ok(UndoResult::failure(
            ResponseCode::NotFound,
            format!("Operation {id} not found"),
        ));
    };
    if let Err(failure) = check_status(&entry, retry) {
        return Ok(UndoResult::refused(&failure));
    }

    let name = entry.target_name();
    Ok(match revert_entry(ctx, entry).await? {
        RevertOutcome::Reverted(row) => {
            info!(id = %id, "Operation reverted");
            UndoResult {
                success: true,
                code: ResponseCode::Ok,
                message: format!("Restored {name} to {}", row.source_path.display()),
                entry: Some(row),
            }
        }
        RevertOutcome::Refused(failure) => UndoResult::refused(&failure),
        RevertOutcome::Failed(message) => UndoResult::failure(ResponseCode::Internal, message),
    })
}

/// Background job reversing every completed row of a batch, newest first.
pub(crate) async fn run_undo_batch(ctx: &JobContext, batch_id: BatchId) -> Result<(), EngineError> {
    let key = JobKey::new(JobKind::Undo, batch_id.clone());
    let lookup = batch_id.clone();
    let entries = ctx
        .with_log(move |log| log.revertible_in_batch(&lookup))
        .await?;

    let total = entries.len();
    ctx.progress.update(&key, |progress| progress.total = total);
    if entries.is_empty() {
        ctx.progress.update(&key, |progress| {
            progress.message = Some("No revertible operations in this batch".to_string());
            progress.finish();
        });
        return Ok(());
    }

    info!(batch_id = %batch_id, rows = total, "Undoing batch");

    for entry in entries {
        let name = entry.target_name();
        let failure = match revert_entry(ctx, entry).await {
            Ok(RevertOutcome::Reverted(_)) => None,
            Ok(RevertOutcome::Refused(failure)) => Some(failure.to_string()),
            Ok(RevertOutcome::Failed(message)) => Some(message),
            Err(e) => Some(e.to_string()),
        };
        match failure {
            None => ctx.progress.update(&key, BatchProgress::record_success),
            Some(message) => {
                warn!(batch_id = %batch_id, file = %name, error = %message, "Undo item failed");
                ctx.progress
                    .update(&key, |progress| progress.record_failure(format!("{name}: {message}")));
            }
        }
    }

    ctx.progress.finish(&key);
    if let Some(progress) = ctx.progress.snapshot(&key) {
        info!(batch_id = %batch_id, "{}", progress.summary());
    }
    Ok(())
}
