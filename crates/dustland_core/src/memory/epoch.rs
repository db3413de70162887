//! # Worker Cycle Counters
//!
//! Each logic worker publishes one atomic word:
//!
//! ```text
//!   63                                1   0
//!  ┌───────────────────────────────────┬───┐
//!  │      completed cycles             │ B │   B = inside a job
//!  └───────────────────────────────────┴───┘
//! ```
//!
//! Entering a job adds one (sets B), leaving adds one again (clears B and
//! carries into the counter). A word that differs from an earlier snapshot
//! therefore means the worker has left whatever job it was running at the
//! time of the snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Busy bit.
const BUSY: u64 = 1;

/// Per-worker cycle words.
#[derive(Debug)]
pub struct WorkerCycles {
    slots: Box<[AtomicU64]>,
}

/// Copy of every worker's word at one instant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleSnapshot {
    words: Box<[u64]>,
}

impl CycleSnapshot {
    /// Lowest completed-cycle count in the snapshot.
    #[must_use]
    pub fn min_completed(&self) -> u64 {
        self.words.iter().map(|word| word >> 1).min().unwrap_or(0)
    }
}

impl WorkerCycles {
    /// Creates counters for `workers` workers, all idle at cycle zero.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            slots: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Number of tracked workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    /// Marks `worker` as inside a job until the guard drops.
    ///
    /// # Panics
    ///
    /// Panics if `worker` is out of range.
    pub fn enter(&self, worker: usize) -> CycleGuard<'_> {
        let previous = self.slots[worker].fetch_add(1, Ordering::SeqCst);
        debug_assert_eq!(previous & BUSY, 0, "worker {worker} entered a job twice");
        CycleGuard {
            cycles: self,
            worker,
        }
    }

    /// Cycles completed by `worker`.
    #[must_use]
    pub fn completed(&self, worker: usize) -> u64 {
        self.slots[worker].load(Ordering::SeqCst) >> 1
    }

    /// Returns true while `worker` is inside a job.
    #[must_use]
    pub fn is_busy(&self, worker: usize) -> bool {
        self.slots[worker].load(Ordering::SeqCst) & BUSY != 0
    }

    /// Lowest completed-cycle count across all workers.
    #[must_use]
    pub fn min_completed(&self) -> u64 {
        self.snapshot().min_completed()
    }

    /// Reads every worker's word.
    #[must_use]
    pub fn snapshot(&self) -> CycleSnapshot {
        CycleSnapshot {
            words: self.slots.iter().map(|slot| slot.load(Ordering::SeqCst)).collect(),
        }
    }

    /// Returns true if every worker that was inside a job at `snapshot`
    /// has since left it.
    #[must_use]
    pub fn has_passed(&self, snapshot: &CycleSnapshot) -> bool {
        self.slots.iter().zip(snapshot.words.iter()).all(|(slot, &then)| {
            then & BUSY == 0 || slot.load(Ordering::SeqCst) != then
        })
    }
}

/// Keeps a worker marked busy. Leaving happens on drop, including unwinds.
#[derive(Debug)]
pub struct CycleGuard<'a> {
    cycles: &'a WorkerCycles,
    worker: usize,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.cycles.slots[self.worker].fetch_add(1, Ordering::SeqCst);
    }
}
