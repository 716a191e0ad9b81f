//! Staged batches awaiting confirmation.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use refile_core::{BatchId, OperationKind};

use crate::operation::PreviewItem;

/// A previewed batch that has not been executed yet.
#[derive(Debug, Clone)]
pub struct StagedBatch {
    pub kind: OperationKind,
    /// Rename mode annotation, carried into the log.
    pub mode: Option<String>,
    pub items: Vec<PreviewItem>,
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    batch: StagedBatch,
}

/// Bounded in-memory store of staged batches.
///
/// When full, the oldest batch is dropped to make room. Taking a batch
/// removes it, so each batch executes at most once.
#[derive(Debug)]
pub struct StagingCache {
    entries: DashMap<BatchId, Slot>,
    next_seq: AtomicU64,
    capacity: usize,
}

impl StagingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Stage a batch, evicting the oldest ones beyond capacity.
    ///
    /// Returns the ids of evicted batches.
    pub fn put(&self, batch_id: BatchId, batch: StagedBatch) -> Vec<BatchId> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(batch_id, Slot { seq, batch });

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().seq)
                .map(|entry| entry.key().clone());
            let Some(oldest) = oldest else { break };
            if self.entries.remove(&oldest).is_some() {
                tracing::debug!(batch_id = %oldest, "Evicted staged batch");
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// Inspect a staged batch without consuming it.
    pub fn peek<R>(&self, batch_id: &BatchId, f: impl FnOnce(&StagedBatch) -> R) -> Option<R> {
        self.entries.get(batch_id).map(|slot| f(&slot.batch))
    }

    /// Remove and return a staged batch.
    pub fn take(&self, batch_id: &BatchId) -> Option<StagedBatch> {
        self.entries.remove(batch_id).map(|(_, slot)| slot.batch)
    }

    pub fn contains(&self, batch_id: &BatchId) -> bool {
        self.entries.contains_key(batch_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> StagedBatch {
        StagedBatch {
            kind: OperationKind::Move,
            mode: None,
            items: Vec::new(),
        }
    }

    #[test]
    fn test_take_is_once() {
        let cache = StagingCache::new(4);
        let id = BatchId::from("b1");
        cache.put(id.clone(), batch());

        assert!(cache.take(&id).is_some());
        assert!(cache.take(&id).is_none());
        assert!(!cache.contains(&id));
    }

    #[test]
    fn test_peek_keeps_batch() {
        let cache = StagingCache::new(4);
        let id = BatchId::from("b1");
        cache.put(id.clone(), batch());

        assert_eq!(cache.peek(&id, |b| b.kind), Some(OperationKind::Move));
        assert!(cache.contains(&id));
    }

    #[test]
    fn test_oldest_evicted() {
        let cache = StagingCache::new(2);
        cache.put(BatchId::from("a"), batch());
        cache.put(BatchId::from("b"), batch());
        let evicted = cache.put(BatchId::from("c"), batch());

        assert_eq!(evicted, vec![BatchId::from("a")]);
        assert!(cache.contains(&BatchId::from("b")));
        assert!(!cache.contains(&BatchId::from("a")));
        assert!(cache.contains(&BatchId::from("c")));
    }
}
