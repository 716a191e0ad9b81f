//! Background job queue.
//!
//! The API boundary accepts a job and enqueues it; a fixed set of workers
//! drains the queue, running each job to completion in its own task so a
//! panic is caught at the job boundary and recorded on the job's progress.

use std::future::Future;
use std::sync::Arc;

use refile_core::{BatchId, EngineConfig};
use refile_log::{LogError, OperationLog};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

use crate::error::EngineError;
use crate::progress::{JobKey, JobKind, ProgressStore};
use crate::staging::StagedBatch;

/// Shared state every job runs against.
#[derive(Debug, Clone)]
pub(crate) struct JobContext {
    pub log: OperationLog,
    pub progress: Arc<ProgressStore>,
    pub config: Arc<EngineConfig>,
}

impl JobContext {
    /// Run a log call on the blocking pool.
    pub async fn with_log<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&OperationLog) -> Result<T, LogError> + Send + 'static,
        T: Send + 'static,
    {
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || f(&log))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?
            .map_err(EngineError::from)
    }
}

/// A unit of background work.
#[derive(Debug)]
pub(crate) enum Job {
    Execute { batch_id: BatchId, batch: StagedBatch },
    UndoBatch { batch_id: BatchId },
}

impl Job {
    pub fn key(&self) -> JobKey {
        match self {
            Self::Execute { batch_id, .. } => JobKey::new(JobKind::Execute, batch_id.clone()),
            Self::UndoBatch { batch_id } => JobKey::new(JobKind::Undo, batch_id.clone()),
        }
    }

    async fn run(self, ctx: JobContext) -> Result<(), EngineError> {
        match self {
            Self::Execute { batch_id, batch } => {
                crate::executor::run_batch(&ctx, batch_id, batch).await
            }
            Self::UndoBatch { batch_id } => crate::undo::run_undo_batch(&ctx, batch_id).await,
        }
    }
}

/// Sending half of the job queue.
#[derive(Debug, Clone)]
pub(crate) struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Spawn `workers` worker tasks on the current runtime.
    pub fn start(ctx: JobContext, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..workers.max(1) {
            tokio::spawn(worker_loop(worker, Arc::clone(&rx), ctx.clone()));
        }
        Self { tx }
    }

    /// Reserve a queue slot without blocking.
    pub fn reserve(&self) -> Result<mpsc::Permit<'_, Job>, EngineError> {
        self.tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => EngineError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => EngineError::QueueClosed,
        })
    }
}

async fn worker_loop(worker: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, ctx: JobContext) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };

        let key = job.key();
        debug!(worker, job = %key.job, batch_id = %key.batch_id, "Job started");

        run_guarded(&key, &ctx.progress, job.run(ctx.clone())).await;
        debug!(worker, job = %key.job, batch_id = %key.batch_id, "Job finished");
    }
    debug!(worker, "Job queue closed, worker exiting");
}

/// Run `job` in its own task. An error or panic ends the job's progress
/// record with the failure in its error list.
async fn run_guarded<F>(key: &JobKey, progress: &ProgressStore, job: F)
where
    F: Future<Output = Result<(), EngineError>> + Send + 'static,
{
    let failure = match tokio::spawn(job).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(format!("job aborted: {e}")),
    };
    if let Some(message) = failure {
        error!(job = %key.job, batch_id = %key.batch_id, error = %message, "Job failed");
        progress.abort(key, format!("Unexpected error: {message}"));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::progress::{BatchProgress, ProgressKind};

    fn started(job: JobKind) -> (ProgressStore, JobKey) {
        let store = ProgressStore::new(Duration::from_secs(300));
        let key = JobKey::new(job, BatchId::from("b1"));
        store
            .begin(key.clone(), BatchProgress::new(BatchId::from("b1"), ProgressKind::Move, 2))
            .unwrap();
        (store, key)
    }

    async fn explode() -> Result<(), EngineError> {
        panic!("worker blew up")
    }

    #[tokio::test]
    async fn test_failing_job_is_marked_done() {
        let (store, key) = started(JobKind::Execute);

        run_guarded(&key, &store, async { Err(EngineError::Task("disk gone".into())) }).await;

        let progress = store.snapshot(&key).unwrap();
        assert!(progress.done);
        assert_eq!(progress.errors.len(), 1);
        assert!(progress.errors[0].starts_with("Unexpected error"));
        assert!(progress.errors[0].contains("disk gone"));
    }

    #[tokio::test]
    async fn test_panicking_job_is_marked_done() {
        let (store, key) = started(JobKind::Undo);

        run_guarded(&key, &store, explode()).await;

        let progress = store.snapshot(&key).unwrap();
        assert!(progress.done);
        assert!(progress.errors[0].starts_with("Unexpected error: job aborted"));
        assert!(!store.is_running(&key));
    }

    #[tokio::test]
    async fn test_successful_job_keeps_its_own_record() {
        let (store, key) = started(JobKind::Execute);
        let progress = Arc::new(store);
        let inner = Arc::clone(&progress);
        let job_key = key.clone();

        run_guarded(&key, &progress, async move {
            inner.update(&job_key, BatchProgress::record_success);
            inner.finish(&job_key);
            Ok(())
        })
        .await;

        let snapshot = progress.snapshot(&key).unwrap();
        assert!(snapshot.done);
        assert_eq!(snapshot.succeeded, 1);
        assert!(snapshot.errors.is_empty());
    }
}
