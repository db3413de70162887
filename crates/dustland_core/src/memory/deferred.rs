//! # Deferred Release Queue
//!
//! Logically destroyed connections and entities are not finalized on the
//! spot: a job popped by another worker a moment earlier may still be
//! working on them. They are retired here instead, together with a snapshot
//! of every worker's cycle word, and finalized once every worker that was
//! busy at retirement has finished that job.
//!
//! ```text
//!   retire(x)          worker 0: busy(c=5) ─── leaves ──> c=6
//!     snapshot ──────> worker 1: idle(c=9)
//!                      worker 2: busy(c=2) ─── leaves ──> c=3
//!                                                          │
//!   reclaim_eligible() ────────────────────────────────────┴──> drop(x)
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::epoch::{CycleSnapshot, WorkerCycles};

/// A retired item waiting for the workers to move on.
struct Retired<T> {
    item: T,
    snapshot: CycleSnapshot,
}

/// Holds retired handles until no worker can still be using them.
pub struct DeferredRelease<T> {
    cycles: Arc<WorkerCycles>,
    retired: Mutex<Vec<Retired<T>>>,
    total_retired: AtomicU64,
    total_reclaimed: AtomicU64,
}

impl<T> DeferredRelease<T> {
    /// Creates an empty queue tracking the given workers.
    #[must_use]
    pub fn new(cycles: Arc<WorkerCycles>) -> Self {
        Self {
            cycles,
            retired: Mutex::new(Vec::new()),
            total_retired: AtomicU64::new(0),
            total_reclaimed: AtomicU64::new(0),
        }
    }

    /// Retires `item`. It is dropped by a later reclaim.
    pub fn retire(&self, item: T) {
        let snapshot = self.cycles.snapshot();
        self.retired.lock().push(Retired { item, snapshot });
        self.total_retired.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops every item no worker can still reference.
    ///
    /// Returns the number of items reclaimed.
    pub fn reclaim_eligible(&self) -> usize {
        self.reclaim_with(drop)
    }

    /// Hands every item no worker can still reference to `finalize`.
    ///
    /// `finalize` runs without the queue lock held.
    pub fn reclaim_with(&self, mut finalize: impl FnMut(T)) -> usize {
        let eligible: Vec<T> = {
            let mut retired = self.retired.lock();
            if retired.is_empty() {
                return 0;
            }
            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut *retired)
                .into_iter()
                .partition(|entry| self.cycles.has_passed(&entry.snapshot));
            *retired = waiting;
            ready.into_iter().map(|entry| entry.item).collect()
        };

        let count = eligible.len();
        for item in eligible {
            finalize(item);
        }
        self.total_reclaimed.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Removes everything regardless of worker state.
    ///
    /// Only correct once the workers have stopped.
    pub fn drain_all(&self) -> Vec<T> {
        let items: Vec<T> = std::mem::take(&mut *self.retired.lock())
            .into_iter()
            .map(|entry| entry.item)
            .collect();
        self.total_reclaimed.fetch_add(items.len() as u64, Ordering::Relaxed);
        items
    }

    /// Items waiting for reclamation.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.retired.lock().len()
    }

    /// Items ever retired.
    #[must_use]
    pub fn total_retired(&self) -> u64 {
        self.total_retired.load(Ordering::Relaxed)
    }

    /// Items ever reclaimed.
    #[must_use]
    pub fn total_reclaimed(&self) -> u64 {
        self.total_reclaimed.load(Ordering::Relaxed)
    }

    /// Lowest completed-cycle count across workers, for metrics.
    #[must_use]
    pub fn min_completed_cycle(&self) -> u64 {
        self.cycles.min_completed()
    }
}

impl<T> std::fmt::Debug for DeferredRelease<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredRelease")
            .field("pending", &self.pending())
            .field("total_retired", &self.total_retired())
            .field("total_reclaimed", &self.total_reclaimed())
            .finish()
    }
}
