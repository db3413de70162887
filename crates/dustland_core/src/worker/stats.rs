//! Pool counters and the per-worker activity board used for stall
//! detection.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::job::JobKind;

/// Shared atomic counters, bumped by every worker.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) executed: AtomicU64,
    pub(crate) requeued: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) panics: AtomicU64,
    pub(crate) naps: AtomicU64,
}

/// Point-in-time copy of the pool counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs whose callback returned normally.
    pub jobs_executed: u64,
    /// Jobs put back because their target was not ready.
    pub jobs_requeued: u64,
    /// Jobs dropped (target gone, finished, or no handler).
    pub jobs_dropped: u64,
    /// Callbacks that panicked and were isolated.
    pub callback_panics: u64,
    /// Times a worker napped after a lap of idle jobs.
    pub idle_naps: u64,
    /// Completed cycles per worker.
    pub completed_cycles: Vec<u64>,
}

impl PoolCounters {
    pub(crate) fn snapshot(&self, completed_cycles: Vec<u64>) -> PoolStats {
        PoolStats {
            jobs_executed: self.executed.load(Ordering::Relaxed),
            jobs_requeued: self.requeued.load(Ordering::Relaxed),
            jobs_dropped: self.dropped.load(Ordering::Relaxed),
            callback_panics: self.panics.load(Ordering::Relaxed),
            idle_naps: self.naps.load(Ordering::Relaxed),
            completed_cycles,
        }
    }
}

/// A job that has been running for longer than the warning threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StalledJob {
    /// Worker running it.
    pub worker: usize,
    /// Its kind.
    pub kind: JobKind,
    /// How long it has been running.
    pub running_for: Duration,
}

/// One slot per worker: when the current job started and what it is.
#[derive(Debug)]
struct ActivitySlot {
    /// Milliseconds since the board epoch, plus one. Zero means idle.
    started: AtomicU64,
    kind: AtomicU8,
    /// `started` value already reported as stalled.
    reported: AtomicU64,
}

/// Published by workers, read by the control loop.
#[derive(Debug)]
pub(crate) struct ActivityBoard {
    epoch: Instant,
    slots: Box<[ActivitySlot]>,
}

impl ActivityBoard {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            epoch: Instant::now(),
            slots: (0..workers)
                .map(|_| ActivitySlot {
                    started: AtomicU64::new(0),
                    kind: AtomicU8::new(JobKind::Nop as u8),
                    reported: AtomicU64::new(0),
                })
                .collect(),
        }
    }

    fn now_stamp(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX - 1) + 1
    }

    pub(crate) fn begin(&self, worker: usize, kind: JobKind) {
        let slot = &self.slots[worker];
        slot.kind.store(kind as u8, Ordering::Relaxed);
        slot.started.store(self.now_stamp(), Ordering::Release);
    }

    pub(crate) fn end(&self, worker: usize) {
        self.slots[worker].started.store(0, Ordering::Release);
    }

    /// Jobs running longer than `threshold` that were not reported before.
    pub(crate) fn newly_stalled(&self, threshold: Duration) -> Vec<StalledJob> {
        let now = self.now_stamp();
        let limit = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        let mut stalled = Vec::new();
        for (worker, slot) in self.slots.iter().enumerate() {
            let started = slot.started.load(Ordering::Acquire);
            if started == 0 || now.saturating_sub(started) < limit {
                continue;
            }
            if slot.reported.swap(started, Ordering::AcqRel) == started {
                continue;
            }
            let kind = JobKind::ALL
                .get(usize::from(slot.kind.load(Ordering::Relaxed)))
                .copied()
                .unwrap_or(JobKind::Nop);
            stalled.push(StalledJob {
                worker,
                kind,
                running_for: Duration::from_millis(now - started),
            });
        }
        stalled
    }
}
