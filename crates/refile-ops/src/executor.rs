//! Batch execution.
//!
//! Items run strictly in staging order. Each item's filesystem work is
//! offloaded to the blocking pool; a failing item is counted and the
//! batch moves on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use refile_core::{BatchId, NewOperation};
use tracing::{info, warn};

use crate::conflict::{is_occupied, resolve_conflict, ConflictPolicy};
use crate::error::{EngineError, ItemError};
use crate::move_op::{move_item, MoveFailure};
use crate::progress::{BatchProgress, JobKey, JobKind};
use crate::queue::JobContext;
use crate::staging::StagedBatch;

/// What happened to an item that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemOutcome {
    /// The entry now lives at `target`.
    Applied { target: PathBuf },
    /// Source and target were the same path.
    Unchanged,
}

pub(crate) async fn run_batch(
    ctx: &JobContext,
    batch_id: BatchId,
    batch: StagedBatch,
) -> Result<(), EngineError> {
    let key = JobKey::new(JobKind::Execute, batch_id.clone());
    let policy = ConflictPolicy::for_kind(batch.kind);
    let max_attempts = ctx.config.max_conflict_attempts;

    info!(batch_id = %batch_id, kind = %batch.kind, items = batch.items.len(), "Executing batch");

    for item in batch.items {
        let source = item.source_path.clone();
        let target = item.target_path.clone();
        let result =
            tokio::task::spawn_blocking(move || apply_item(&source, &target, policy, max_attempts))
                .await
                .unwrap_or_else(|e| Err(ItemError::Task(e.to_string())));

        match result {
            Ok(ItemOutcome::Unchanged) => {
                ctx.progress.update(&key, BatchProgress::record_success);
            }
            Ok(ItemOutcome::Applied { target }) => {
                let op = NewOperation::completed(
                    batch_id.clone(),
                    batch.kind,
                    item.source_path.clone(),
                    target,
                )
                .with_mode(batch.mode.clone());
                let logged = ctx.with_log(move |log| log.append(&op)).await;
                if let Err(ref e) = logged {
                    warn!(batch_id = %batch_id, file = %item.file_name, error = %e, "Could not log completed operation");
                }
                ctx.progress.update(&key, |progress| {
                    progress.record_success();
                    if let Err(e) = logged {
                        progress
                            .errors
                            .push(format!("{}: done but not logged: {e}", item.file_name));
                    }
                });
            }
            Err(err) => {
                if let Some(copy) = err.partial_copy() {
                    let op = NewOperation::partial(
                        batch_id.clone(),
                        batch.kind,
                        item.source_path.clone(),
                        copy.to_path_buf(),
                    )
                    .with_mode(batch.mode.clone());
                    if let Err(e) = ctx.with_log(move |log| log.append(&op)).await {
                        warn!(batch_id = %batch_id, error = %e, "Could not log partial operation");
                    }
                }
                warn!(batch_id = %batch_id, file = %item.file_name, error = %err, "Item failed");
                ctx.progress
                    .update(&key, |progress| progress.record_failure(err.to_string()));
            }
        }
    }

    ctx.progress.finish(&key);
    if let Some(progress) = ctx.progress.snapshot(&key) {
        info!(batch_id = %batch_id, "{}", progress.summary());
    }
    Ok(())
}

/// Perform one staged mutation on disk.
fn apply_item(
    source: &Path,
    target: &Path,
    policy: ConflictPolicy,
    max_attempts: u32,
) -> Result<ItemOutcome, ItemError> {
    if !is_occupied(source) {
        return Err(ItemError::SourceMissing {
            path: source.to_path_buf(),
        });
    }
    if source == target {
        return Ok(ItemOutcome::Unchanged);
    }
    if target.starts_with(source) {
        return Err(ItemError::IntoItself {
            source_path: source.to_path_buf(),
            target: target.to_path_buf(),
        });
    }

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ItemError::CreateDir {
            path: parent.to_path_buf(),
            message: e.to_string(),
        })?;
    }

    let dest = resolve_conflict(target, policy, max_attempts)?;
    move_item(source, &dest).map_err(|failure| item_error(failure, source, &dest))?;
    Ok(ItemOutcome::Applied { target: dest })
}

pub(crate) fn item_error(failure: MoveFailure, source: &Path, dest: &Path) -> ItemError {
    let name = display_name(source);
    match failure {
        MoveFailure::Partial { copy, error } => ItemError::Partial {
            name,
            copy,
            message: error.to_string(),
        },
        MoveFailure::Io(e) => match e.kind() {
            io::ErrorKind::NotFound => ItemError::SourceMissing {
                path: source.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => ItemError::PermissionDenied {
                from: source.to_path_buf(),
                to: dest.to_path_buf(),
            },
            _ => ItemError::Io {
                name,
                message: e.to_string(),
            },
        },
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_creates_parent() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"a").unwrap();
        let target = dir.path().join("nested/deeper/a.txt");

        let outcome = apply_item(&src, &target, ConflictPolicy::Plain, 10).unwrap();
        assert_eq!(outcome, ItemOutcome::Applied { target: target.clone() });
        assert!(target.exists());
    }

    #[test]
    fn test_apply_resolves_conflict() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("in/report.pdf");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        fs::write(&src, b"new").unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("report.pdf"), b"old").unwrap();

        let outcome = apply_item(&src, &out.join("report.pdf"), ConflictPolicy::Plain, 10).unwrap();
        assert_eq!(
            outcome,
            ItemOutcome::Applied {
                target: out.join("report_1.pdf")
            }
        );
        assert_eq!(fs::read(out.join("report.pdf")).unwrap(), b"old");
    }

    #[test]
    fn test_apply_rejects_target_inside_source() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("album");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("photo.jpg"), b"jpg").unwrap();
        let target = src.join("nested/album");

        let err = apply_item(&src, &target, ConflictPolicy::Plain, 10).unwrap_err();
        assert!(matches!(err, ItemError::IntoItself { .. }));
        // Nothing was created inside the source.
        assert!(!src.join("nested").exists());
        assert!(src.join("photo.jpg").exists());
    }

    #[test]
    fn test_apply_similar_prefix_is_not_inside() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("album");
        fs::create_dir_all(&src).unwrap();
        let target = dir.path().join("album-2024/album");

        apply_item(&src, &target, ConflictPolicy::Plain, 10).unwrap();
        assert!(target.is_dir());
        assert!(!src.exists());
    }

    #[test]
    fn test_apply_same_path_is_noop() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"a").unwrap();

        let outcome = apply_item(&src, &src, ConflictPolicy::ZeroPadded, 10).unwrap();
        assert_eq!(outcome, ItemOutcome::Unchanged);
        assert!(src.exists());
    }

    #[test]
    fn test_apply_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = apply_item(
            &dir.path().join("gone.txt"),
            &dir.path().join("x/gone.txt"),
            ConflictPolicy::Plain,
            10,
        )
        .unwrap_err();
        assert!(matches!(err, ItemError::SourceMissing { .. }));
        assert!(!dir.path().join("x").exists());
    }
}
