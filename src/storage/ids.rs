//! Record id allocation.

use std::collections::{BTreeSet, VecDeque};
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct IdState {
    high_id: u64,
    free: BTreeSet<u64>,
}

/// Hands out record ids: freed ids first, then ids above the high mark.
#[derive(Debug, Default)]
pub struct IdGenerator {
    state: Mutex<IdState>,
}

impl IdGenerator {
    /// Starts allocating at `high_id` with the given free ids.
    pub fn new(high_id: u64, free: impl IntoIterator<Item = u64>) -> Self {
        Self {
            state: Mutex::new(IdState {
                high_id,
                free: free.into_iter().filter(|id| *id < high_id).collect(),
            }),
        }
    }

    /// Allocates one id.
    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        if let Some(id) = state.free.pop_first() {
            return id;
        }
        let id = state.high_id;
        state.high_id += 1;
        id
    }

    /// Allocates `size` fresh ids above the high mark.
    pub fn next_id_batch(&self, size: usize) -> Range<u64> {
        let mut state = self.state.lock();
        let start = state.high_id;
        state.high_id += size as u64;
        start..state.high_id
    }

    /// Takes up to `max` reusable ids.
    pub fn take_free(&self, max: usize) -> Vec<u64> {
        let mut state = self.state.lock();
        let mut out = Vec::with_capacity(max.min(state.free.len()));
        while out.len() < max {
            match state.free.pop_first() {
                Some(id) => out.push(id),
                None => break,
            }
        }
        out
    }

    /// Returns an id to the pool.
    pub fn free_id(&self, id: u64) {
        let mut state = self.state.lock();
        if id < state.high_id {
            state.free.insert(id);
        }
    }

    /// Drops `id` from the free pool because a record now uses it.
    pub fn mark_used(&self, id: u64) {
        let mut state = self.state.lock();
        state.free.remove(&id);
        if id >= state.high_id {
            state.high_id = id + 1;
        }
    }

    /// One past the highest id ever handed out.
    pub fn high_id(&self) -> u64 {
        self.state.lock().high_id
    }

    /// Raises the high mark to at least `high_id`.
    pub fn set_high_id_at_least(&self, high_id: u64) {
        let mut state = self.state.lock();
        if high_id > state.high_id {
            state.high_id = high_id;
        }
    }

    /// Number of ids waiting to be reused.
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Forgets everything.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.high_id = 0;
        state.free.clear();
    }
}

/// A source of ids for one transaction.
pub trait IdSequence {
    /// Next id.
    fn next_id(&mut self) -> u64;
}

/// Pulls ids from a generator in batches and returns unused ones on close.
pub struct RenewableBatchIdSequence {
    source: Arc<IdGenerator>,
    batch_size: usize,
    current: VecDeque<u64>,
}

impl RenewableBatchIdSequence {
    /// Creates a sequence that refills `batch_size` ids at a time.
    pub fn new(source: Arc<IdGenerator>, batch_size: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            current: VecDeque::new(),
        }
    }

    fn renew(&mut self) {
        let reused = self.source.take_free(self.batch_size);
        let missing = self.batch_size - reused.len();
        self.current.extend(reused);
        if missing > 0 {
            self.current.extend(self.source.next_id_batch(missing));
        }
    }

    /// Returns every unused id to the generator.
    pub fn close(&mut self) {
        for id in self.current.drain(..) {
            self.source.free_id(id);
        }
    }
}

impl IdSequence for RenewableBatchIdSequence {
    fn next_id(&mut self) -> u64 {
        loop {
            if let Some(id) = self.current.pop_front() {
                return id;
            }
            self.renew();
        }
    }
}

impl Drop for RenewableBatchIdSequence {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_freed_ids_first() {
        let ids = IdGenerator::new(10, [3, 5, 12]);
        assert_eq!(ids.next_id(), 3);
        assert_eq!(ids.next_id(), 5);
        assert_eq!(ids.next_id(), 10);
        ids.free_id(3);
        assert_eq!(ids.next_id(), 3);
        assert_eq!(ids.high_id(), 11);
    }

    #[test]
    fn batch_sequence_returns_unused_on_close() {
        let source = Arc::new(IdGenerator::default());
        let mut seq = RenewableBatchIdSequence::new(Arc::clone(&source), 4);
        assert_eq!(seq.next_id(), 0);
        assert_eq!(seq.next_id(), 1);
        assert_eq!(source.high_id(), 4);
        seq.close();
        assert_eq!(source.free_count(), 2);
        let mut other = RenewableBatchIdSequence::new(Arc::clone(&source), 4);
        let got: Vec<u64> = (0..4).map(|_| other.next_id()).collect();
        assert_eq!(got, vec![2, 3, 4, 5]);
    }

    #[test]
    fn concurrent_sequences_never_collide() {
        let source = Arc::new(IdGenerator::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let source = Arc::clone(&source);
                std::thread::spawn(move || {
                    let mut seq = RenewableBatchIdSequence::new(source, 8);
                    (0..100).map(|_| seq.next_id()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
