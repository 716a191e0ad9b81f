//! Progress tracking for background jobs.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use refile_core::{BatchId, OperationKind};
use serde::Serialize;
use strum::{AsRefStr, Display};

/// The two kinds of background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobKind {
    Execute,
    Undo,
}

/// Identifies a job's progress record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub job: JobKind,
    pub batch_id: BatchId,
}

impl JobKey {
    pub fn new(job: JobKind, batch_id: BatchId) -> Self {
        Self { job, batch_id }
    }
}

/// What a job does to each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProgressKind {
    Move,
    Rename,
    Undo,
}

impl ProgressKind {
    /// Past-tense label for successful items.
    pub fn success_label(self) -> &'static str {
        match self {
            Self::Move => "moved",
            Self::Rename => "renamed",
            Self::Undo => "reverted",
        }
    }
}

impl From<OperationKind> for ProgressKind {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Move => Self::Move,
            OperationKind::Rename => Self::Rename,
        }
    }
}

/// Pollable state of a running or recently finished job.
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub batch_id: BatchId,
    pub kind: ProgressKind,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub done: bool,
    pub errors: Vec<String>,
    /// Informational note, e.g. why nothing was processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip)]
    pub finished_at: Option<Instant>,
}

impl BatchProgress {
    pub fn new(batch_id: BatchId, kind: ProgressKind, total: usize) -> Self {
        Self {
            batch_id,
            kind,
            total,
            succeeded: 0,
            failed: 0,
            done: false,
            errors: Vec::new(),
            message: None,
            finished_at: None,
        }
    }

    /// Items handled so far, successful or not.
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.failed += 1;
        self.errors.push(message.into());
    }

    /// Mark the job finished. Counters are frozen from here on.
    pub fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.finished_at = Some(Instant::now());
        }
    }

    /// Whether a finished record has outlived `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.finished_at.is_some_and(|at| at.elapsed() > ttl)
    }

    /// Get a human-readable summary of the job.
    pub fn summary(&self) -> String {
        let label = self.kind.success_label();
        let state = if self.done { "done" } else { "running" };
        if self.failed == 0 {
            format!("{} of {} {label} ({state})", self.succeeded, self.total)
        } else {
            format!(
                "{} of {} {label}, {} failed ({state})",
                self.succeeded, self.total, self.failed
            )
        }
    }
}

/// Returned when a job is already running under the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyRunning;

/// Shared map of job progress records.
///
/// Each record has a single writer: the job that owns its key.
#[derive(Debug)]
pub struct ProgressStore {
    entries: DashMap<JobKey, BatchProgress>,
    ttl: Duration,
}

impl ProgressStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Register a new job. Replaces a finished record, refuses a running one.
    pub fn begin(&self, key: JobKey, progress: BatchProgress) -> Result<(), AlreadyRunning> {
        self.scavenge();
        match self.entries.entry(key) {
            Entry::Occupied(occupied) if !occupied.get().done => Err(AlreadyRunning),
            Entry::Occupied(mut occupied) => {
                occupied.insert(progress);
                Ok(())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(progress);
                Ok(())
            }
        }
    }

    /// Apply `f` to the record of a job that has not finished.
    pub fn update(&self, key: &JobKey, f: impl FnOnce(&mut BatchProgress)) {
        if let Some(mut progress) = self.entries.get_mut(key) {
            if !progress.done {
                f(&mut *progress);
            }
        }
    }

    pub fn finish(&self, key: &JobKey) {
        self.update(key, BatchProgress::finish);
    }

    /// Record an error that ended the job early and mark it finished.
    pub fn abort(&self, key: &JobKey, message: impl Into<String>) {
        let message = message.into();
        self.update(key, |progress| {
            progress.errors.push(message);
            progress.finish();
        });
    }

    pub fn is_running(&self, key: &JobKey) -> bool {
        self.entries.get(key).is_some_and(|progress| !progress.done)
    }

    /// Copy of the current record, if it has not expired.
    pub fn snapshot(&self, key: &JobKey) -> Option<BatchProgress> {
        self.scavenge();
        self.entries.get(key).map(|progress| progress.value().clone())
    }

    /// Drop finished records older than the grace period.
    pub fn scavenge(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, progress| !progress.is_expired(ttl));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(job: JobKind) -> JobKey {
        JobKey::new(job, BatchId::from("b1"))
    }

    #[test]
    fn test_counters_and_summary() {
        let mut progress = BatchProgress::new(BatchId::from("b1"), ProgressKind::Move, 3);
        progress.record_success();
        progress.record_failure("Source no longer present: /a");
        assert_eq!(progress.processed(), 2);
        assert_eq!(progress.summary(), "1 of 3 moved, 1 failed (running)");

        progress.finish();
        assert!(progress.done);
        assert!(progress.finished_at.is_some());
    }

    #[test]
    fn test_begin_refuses_running_job() {
        let store = ProgressStore::new(Duration::from_secs(300));
        let progress = BatchProgress::new(BatchId::from("b1"), ProgressKind::Undo, 1);

        store.begin(key(JobKind::Undo), progress.clone()).unwrap();
        assert_eq!(store.begin(key(JobKind::Undo), progress.clone()), Err(AlreadyRunning));

        store.finish(&key(JobKind::Undo));
        assert!(store.begin(key(JobKind::Undo), progress).is_ok());
    }

    #[test]
    fn test_execute_and_undo_keys_are_separate() {
        let store = ProgressStore::new(Duration::from_secs(300));
        let execute = BatchProgress::new(BatchId::from("b1"), ProgressKind::Move, 2);
        let undo = BatchProgress::new(BatchId::from("b1"), ProgressKind::Undo, 2);

        store.begin(key(JobKind::Execute), execute).unwrap();
        store.begin(key(JobKind::Undo), undo).unwrap();
        store.update(&key(JobKind::Undo), BatchProgress::record_success);

        assert_eq!(store.snapshot(&key(JobKind::Execute)).unwrap().succeeded, 0);
        assert_eq!(store.snapshot(&key(JobKind::Undo)).unwrap().succeeded, 1);
    }

    #[test]
    fn test_finished_counters_are_frozen() {
        let store = ProgressStore::new(Duration::from_secs(300));
        store
            .begin(
                key(JobKind::Execute),
                BatchProgress::new(BatchId::from("b1"), ProgressKind::Move, 1),
            )
            .unwrap();
        store.finish(&key(JobKind::Execute));
        store.update(&key(JobKind::Execute), BatchProgress::record_success);

        let snapshot = store.snapshot(&key(JobKind::Execute)).unwrap();
        assert!(snapshot.done);
        assert_eq!(snapshot.succeeded, 0);
    }

    #[test]
    fn test_expired_records_are_scavenged() {
        let store = ProgressStore::new(Duration::ZERO);
        store
            .begin(
                key(JobKind::Execute),
                BatchProgress::new(BatchId::from("b1"), ProgressKind::Move, 0),
            )
            .unwrap();
        assert!(store.snapshot(&key(JobKind::Execute)).is_some());

        store.finish(&key(JobKind::Execute));
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.snapshot(&key(JobKind::Execute)).is_none());
    }
}
