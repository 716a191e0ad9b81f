//! Engine facade: staging, execution, undo, progress and history.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use refile_core::{
    validate_filename, validate_safe_path, BatchId, BatchSummary, EngineConfig, OperationEntry,
    OperationId, OperationKind, ValidationError,
};
use refile_log::{HistoryQuery, OperationLog, MAX_BATCH_SUMMARIES};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::operation::{
    MoveProposal, PreviewItem, Provenance, RenameEdit, RenameProposal, TriageConfirmation,
    TriageSuggestion,
};
use crate::progress::{BatchProgress, JobKey, JobKind, ProgressKind, ProgressStore};
use crate::queue::{Job, JobContext, JobQueue};
use crate::rename::rename_target;
use crate::staging::{StagedBatch, StagingCache};
use crate::undo::{self, UndoResult};

/// A staged batch as shown to the user before confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub batch_id: BatchId,
    pub kind: OperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub items: Vec<PreviewItem>,
}

/// Acknowledgement that a background job was accepted.
#[derive(Debug, Clone, Serialize)]
pub struct JobTicket {
    pub batch_id: BatchId,
    pub job: JobKind,
    pub total: usize,
}

/// One page of the operation history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub entries: Vec<OperationEntry>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

/// Batch operation engine.
///
/// Cheap to clone; clones share the log, the staging cache, the progress
/// store and the job queue.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    ctx: JobContext,
    staging: StagingCache,
    queue: JobQueue,
}

impl Engine {
    /// Open the configured operation log and start the job workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let log = OperationLog::open(&config.database_path)?;
        Ok(Self::new(config, log))
    }

    /// Build an engine over an already opened log.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: EngineConfig, log: OperationLog) -> Self {
        let ctx = JobContext {
            log,
            progress: Arc::new(ProgressStore::new(config.progress_ttl())),
            config: Arc::new(config),
        };
        let queue = JobQueue::start(ctx.clone(), ctx.config.job_workers, ctx.config.queue_capacity);
        let staging = StagingCache::new(ctx.config.max_staged_batches);

        Self {
            inner: Arc::new(Inner {
                ctx,
                staging,
                queue,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.ctx.config
    }

    pub fn log(&self) -> &OperationLog {
        &self.inner.ctx.log
    }

    // ── Staging ──────────────────────────────────────────────────

    /// Stage moves proposed by the rule matcher.
    pub fn stage_moves(&self, proposals: Vec<MoveProposal>) -> Result<Preview, EngineError> {
        self.check_batch_size(proposals.len())?;

        let mut items = Vec::with_capacity(proposals.len());
        for (id, proposal) in (0u32..).zip(proposals) {
            self.check_path(&proposal.source_path)?;
            self.check_path(&proposal.target_path)?;
            if proposal.target_path.file_name().is_none() {
                return Err(ValidationError::filename(
                    proposal.target_path.display().to_string(),
                    "target has no file name",
                )
                .into());
            }
            items.push(PreviewItem {
                id,
                file_name: proposal.file_name,
                source_path: proposal.source_path,
                target_path: proposal.target_path,
                provenance: Provenance::Rule {
                    rule: proposal.rule,
                },
            });
        }

        Ok(self.stage(OperationKind::Move, None, items))
    }

    /// Stage in-place renames. `mode` is recorded on every logged row.
    pub fn stage_renames(
        &self,
        proposals: Vec<RenameProposal>,
        mode: Option<String>,
    ) -> Result<Preview, EngineError> {
        self.check_batch_size(proposals.len())?;

        let mut items = Vec::with_capacity(proposals.len());
        for (id, proposal) in (0u32..).zip(proposals) {
            self.check_path(&proposal.source_path)?;
            let target_path = rename_target(&proposal.source_path, &proposal.new_filename)?;
            items.push(PreviewItem {
                id,
                file_name: file_name_of(&proposal.source_path),
                source_path: proposal.source_path,
                target_path,
                provenance: Provenance::Dated {
                    found_date: proposal.found_date,
                    date_source: proposal.date_source,
                    suggestion: proposal.suggestion,
                },
            });
        }

        Ok(self.stage(OperationKind::Rename, mode, items))
    }

    /// Stage folder suggestions from the triage classifier.
    pub fn stage_triage(&self, suggestions: Vec<TriageSuggestion>) -> Result<Preview, EngineError> {
        self.check_batch_size(suggestions.len())?;

        let mut items = Vec::with_capacity(suggestions.len());
        for (id, suggestion) in (0u32..).zip(suggestions) {
            self.check_path(&suggestion.source_path)?;
            self.check_path(&suggestion.suggested_folder)?;
            let file_name = validate_filename(&suggestion.file_name)?;
            items.push(PreviewItem {
                id,
                target_path: suggestion.suggested_folder.join(&file_name),
                file_name,
                source_path: suggestion.source_path,
                provenance: Provenance::Triage {
                    confidence: suggestion.confidence,
                },
            });
        }

        Ok(self.stage(OperationKind::Move, None, items))
    }

    /// Look at a staged batch without consuming it.
    pub fn preview(&self, batch_id: &BatchId) -> Option<Preview> {
        self.inner.staging.peek(batch_id, |batch| Preview {
            batch_id: batch_id.clone(),
            kind: batch.kind,
            mode: batch.mode.clone(),
            items: batch.items.clone(),
        })
    }

    fn stage(&self, kind: OperationKind, mode: Option<String>, items: Vec<PreviewItem>) -> Preview {
        let batch_id = BatchId::generate();
        let evicted = self.inner.staging.put(
            batch_id.clone(),
            StagedBatch {
                kind,
                mode: mode.clone(),
                items: items.clone(),
            },
        );
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Staging cache full, dropped oldest batches");
        }
        info!(batch_id = %batch_id, kind = %kind, items = items.len(), "Batch staged");

        Preview {
            batch_id,
            kind,
            mode,
            items,
        }
    }

    // ── Execution ────────────────────────────────────────────────

    /// Execute the selected items of a staged batch in the background.
    ///
    /// The batch is consumed: a second call with the same id fails with
    /// [`EngineError::BatchNotFound`].
    pub fn execute(&self, batch_id: &BatchId, selected: &[u32]) -> Result<JobTicket, EngineError> {
        if selected.is_empty() {
            self.ensure_staged(batch_id)?;
            return Err(EngineError::EmptySelection);
        }
        let wanted: BTreeSet<u32> = selected.iter().copied().collect();

        let items = self
            .inner
            .staging
            .peek(batch_id, |batch| -> Result<Vec<PreviewItem>, EngineError> {
                let known: BTreeSet<u32> = batch.items.iter().map(|item| item.id).collect();
                let unknown: Vec<u32> = wanted.difference(&known).copied().collect();
                if !unknown.is_empty() {
                    return Err(EngineError::UnknownItems { ids: unknown });
                }
                Ok(batch
                    .items
                    .iter()
                    .filter(|item| wanted.contains(&item.id))
                    .cloned()
                    .collect())
            })
            .ok_or_else(|| not_found(batch_id))??;

        self.dispatch(batch_id, items)
    }

    /// Execute a staged rename batch with user-edited filenames.
    ///
    /// Only the edited items run, each under its edited name.
    pub fn execute_renames(
        &self,
        batch_id: &BatchId,
        edits: Vec<RenameEdit>,
    ) -> Result<JobTicket, EngineError> {
        if edits.is_empty() {
            self.ensure_staged(batch_id)?;
            return Err(EngineError::EmptySelection);
        }
        let names: HashMap<u32, String> = edits
            .into_iter()
            .map(|edit| (edit.id, edit.new_filename))
            .collect();

        let items = self
            .inner
            .staging
            .peek(batch_id, |batch| -> Result<Vec<PreviewItem>, EngineError> {
                if batch.kind != OperationKind::Rename {
                    return Err(EngineError::WrongBatchKind {
                        batch_id: batch_id.clone(),
                        expected: OperationKind::Rename,
                        actual: batch.kind,
                    });
                }
                let mut unknown: Vec<u32> = names
                    .keys()
                    .filter(|id| !batch.items.iter().any(|item| item.id == **id))
                    .copied()
                    .collect();
                if !unknown.is_empty() {
                    unknown.sort_unstable();
                    return Err(EngineError::UnknownItems { ids: unknown });
                }

                let mut items = Vec::with_capacity(names.len());
                for item in &batch.items {
                    if let Some(name) = names.get(&item.id) {
                        let target_path = rename_target(&item.source_path, name)?;
                        items.push(PreviewItem {
                            target_path,
                            ..item.clone()
                        });
                    }
                }
                Ok(items)
            })
            .ok_or_else(|| not_found(batch_id))??;

        self.dispatch(batch_id, items)
    }

    /// Execute user-confirmed triage destinations as moves.
    ///
    /// Every confirmation must name a file that was staged in the batch.
    pub async fn execute_triage(
        &self,
        batch_id: &BatchId,
        confirmations: Vec<TriageConfirmation>,
    ) -> Result<JobTicket, EngineError> {
        if confirmations.is_empty() {
            self.ensure_staged(batch_id)?;
            return Err(EngineError::EmptySelection);
        }
        self.check_batch_size(confirmations.len())?;

        let staged: HashMap<PathBuf, Provenance> = self
            .inner
            .staging
            .peek(batch_id, |batch| -> Result<HashMap<PathBuf, Provenance>, EngineError> {
                if batch.kind != OperationKind::Move {
                    return Err(EngineError::WrongBatchKind {
                        batch_id: batch_id.clone(),
                        expected: OperationKind::Move,
                        actual: batch.kind,
                    });
                }
                Ok(batch
                    .items
                    .iter()
                    .map(|item| (item.source_path.clone(), item.provenance.clone()))
                    .collect())
            })
            .ok_or_else(|| not_found(batch_id))??;

        let mut items = Vec::with_capacity(confirmations.len());
        for (id, confirmation) in (0u32..).zip(confirmations) {
            let Some(provenance) = staged.get(&confirmation.source_path) else {
                return Err(EngineError::NotInBatch {
                    batch_id: batch_id.clone(),
                    file_name: confirmation.file_name,
                    path: confirmation.source_path,
                });
            };
            self.check_path(&confirmation.confirmed_folder)?;
            let file_name = validate_filename(&confirmation.file_name)?;
            items.push(PreviewItem {
                id,
                target_path: confirmation.confirmed_folder.join(&file_name),
                file_name,
                source_path: confirmation.source_path,
                provenance: provenance.clone(),
            });
        }

        let folders: Vec<PathBuf> = items
            .iter()
            .filter_map(|item| item.target_path.parent().map(Path::to_path_buf))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let not_a_dir = tokio::task::spawn_blocking(move || {
            folders
                .into_iter()
                .find(|folder| folder.exists() && !folder.is_dir())
        })
        .await
        .map_err(|e| EngineError::Task(e.to_string()))?;
        if let Some(path) = not_a_dir {
            return Err(EngineError::NotADirectory { path });
        }

        self.dispatch(batch_id, items)
    }

    /// Consume the staged batch and enqueue it with `items`.
    fn dispatch(&self, batch_id: &BatchId, items: Vec<PreviewItem>) -> Result<JobTicket, EngineError> {
        let permit = self.inner.queue.reserve()?;
        let staged = self
            .inner
            .staging
            .take(batch_id)
            .ok_or_else(|| not_found(batch_id))?;
        let batch = StagedBatch { items, ..staged };
        let total = batch.items.len();

        let key = JobKey::new(JobKind::Execute, batch_id.clone());
        let progress = BatchProgress::new(batch_id.clone(), batch.kind.into(), total);
        self.inner
            .ctx
            .progress
            .begin(key, progress)
            .map_err(|_| EngineError::AlreadyRunning {
                batch_id: batch_id.clone(),
            })?;

        permit.send(Job::Execute {
            batch_id: batch_id.clone(),
            batch,
        });
        info!(batch_id = %batch_id, items = total, "Batch accepted for execution");

        Ok(JobTicket {
            batch_id: batch_id.clone(),
            job: JobKind::Execute,
            total,
        })
    }

    // ── Undo ─────────────────────────────────────────────────────

    /// Undo one `completed` operation.
    pub async fn undo_one(&self, id: OperationId) -> UndoResult {
        undo::undo_one(&self.inner.ctx, id, false).await
    }

    /// Try again to undo an operation marked `revert_failed`.
    pub async fn retry_failed(&self, id: OperationId) -> UndoResult {
        undo::undo_one(&self.inner.ctx, id, true).await
    }

    /// Undo every `completed` operation of a batch in the background,
    /// newest first.
    pub async fn undo_batch(&self, batch_id: &BatchId) -> Result<JobTicket, EngineError> {
        let progress = &self.inner.ctx.progress;
        let busy = [JobKind::Execute, JobKind::Undo]
            .into_iter()
            .any(|job| progress.is_running(&JobKey::new(job, batch_id.clone())));
        if busy {
            return Err(EngineError::AlreadyRunning {
                batch_id: batch_id.clone(),
            });
        }

        let lookup = batch_id.clone();
        let (exists, total) = self
            .inner
            .ctx
            .with_log(move |log| Ok((log.batch_exists(&lookup)?, log.count_revertible(&lookup)?)))
            .await?;
        if !exists {
            return Err(not_found(batch_id));
        }

        let permit = self.inner.queue.reserve()?;
        let key = JobKey::new(JobKind::Undo, batch_id.clone());
        progress
            .begin(key, BatchProgress::new(batch_id.clone(), ProgressKind::Undo, total))
            .map_err(|_| EngineError::AlreadyRunning {
                batch_id: batch_id.clone(),
            })?;

        permit.send(Job::UndoBatch {
            batch_id: batch_id.clone(),
        });
        info!(batch_id = %batch_id, rows = total, "Batch accepted for undo");

        Ok(JobTicket {
            batch_id: batch_id.clone(),
            job: JobKind::Undo,
            total,
        })
    }

    // ── Progress ─────────────────────────────────────────────────

    /// Current progress of a job, if it is running or finished recently.
    pub fn progress(&self, job: JobKind, batch_id: &BatchId) -> Option<BatchProgress> {
        self.inner
            .ctx
            .progress
            .snapshot(&JobKey::new(job, batch_id.clone()))
    }

    /// Poll until the job is done. Returns `None` if no record exists.
    pub async fn wait_until_done(
        &self,
        job: JobKind,
        batch_id: &BatchId,
        poll: Duration,
    ) -> Option<BatchProgress> {
        loop {
            let progress = self.progress(job, batch_id)?;
            if progress.done {
                return Some(progress);
            }
            tokio::time::sleep(poll).await;
        }
    }

    // ── History ──────────────────────────────────────────────────

    /// A page of log rows, newest first.
    pub async fn history(&self, query: HistoryQuery) -> Result<HistoryPage, EngineError> {
        let (entries, total) = self
            .inner
            .ctx
            .with_log(move |log| Ok((log.list(&query)?, log.count(query.kind)?)))
            .await?;
        Ok(HistoryPage {
            entries,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    /// Summaries of the most recent batches.
    pub async fn batches(&self) -> Result<Vec<BatchSummary>, EngineError> {
        self.inner
            .ctx
            .with_log(|log| log.batch_summaries(MAX_BATCH_SUMMARIES))
            .await
    }

    /// All rows of one batch in execution order.
    pub async fn batch_entries(&self, batch_id: &BatchId) -> Result<Vec<OperationEntry>, EngineError> {
        let lookup = batch_id.clone();
        let entries = self
            .inner
            .ctx
            .with_log(move |log| log.batch_entries(&lookup))
            .await?;
        if entries.is_empty() {
            return Err(not_found(batch_id));
        }
        Ok(entries)
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn check_path(&self, path: &Path) -> Result<(), EngineError> {
        validate_safe_path(path, &self.config().blocked_prefixes)?;
        Ok(())
    }

    fn check_batch_size(&self, count: usize) -> Result<(), EngineError> {
        let max = self.config().max_batch_items;
        if count > max {
            return Err(EngineError::TooManyItems { count, max });
        }
        Ok(())
    }

    fn ensure_staged(&self, batch_id: &BatchId) -> Result<(), EngineError> {
        if self.inner.staging.contains(batch_id) {
            Ok(())
        } else {
            Err(not_found(batch_id))
        }
    }
}

fn not_found(batch_id: &BatchId) -> EngineError {
    EngineError::BatchNotFound {
        batch_id: batch_id.clone(),
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
