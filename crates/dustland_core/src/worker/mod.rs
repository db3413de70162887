//! # Logic Worker Pool
//!
//! N identical OS threads, each running the same loop:
//!
//! ```text
//!   ┌──> checkpoint (park if a barrier round is pending)
//!   │         │
//!   │    pop_front ──> Finish ──────────> exit
//!   │         │    ──> Synchronize / Nop ─┐
//!   │         ▼                            │
//!   │    handler lookup (dispatch table)   │
//!   │         │                            │
//!   │    enter cycle, run callback         │
//!   │    (panics caught, job dropped)      │
//!   │         │                            │
//!   │    requeue at tail if recurring      │
//!   └─────────┴────────────────────────────┘
//! ```
//!
//! Workers only block on the queue and on the barrier. A callback that
//! never returns stalls its worker; the pool reports it through
//! [`LogicPool::newly_stalled`] but does not preempt it.

mod dispatch;
mod stats;

pub use dispatch::{DispatchTable, JobHandler, JobOutcome, WorkerContext};
pub use stats::{PoolStats, StalledJob};

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::job::{Job, JobKind};
use crate::memory::WorkerCycles;
use crate::queue::JobQueue;
use crate::sync::{Barrier, BarrierController};
use stats::{ActivityBoard, PoolCounters};

/// Worker pool configuration.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of logic workers.
    pub workers: usize,
    /// Nap taken after a full lap of idle jobs.
    pub idle_sleep: Duration,
    /// Thread name prefix.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            idle_sleep: Duration::from_millis(1),
            thread_name: "logic".to_string(),
        }
    }
}

impl PoolConfig {
    /// Default configuration with a fixed worker count.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}

/// Number of CPU cores, or 4 if that cannot be determined.
#[must_use]
pub fn default_worker_count() -> usize {
    thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

/// Everything a worker thread shares with the pool.
struct Shared {
    queue: Arc<JobQueue>,
    barrier: Arc<Barrier>,
    cycles: Arc<WorkerCycles>,
    table: DispatchTable,
    counters: PoolCounters,
    activity: ActivityBoard,
    idle_sleep: Duration,
}

/// The running pool.
pub struct LogicPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl LogicPool {
    /// Spawns the workers.
    ///
    /// Returns the pool and the single controller for its barrier.
    ///
    /// # Errors
    ///
    /// Returns an error if `config.workers` is zero or a thread cannot be
    /// spawned. Workers already started are stopped again.
    pub fn start(
        config: &PoolConfig,
        queue: Arc<JobQueue>,
        table: DispatchTable,
    ) -> CoreResult<(Self, BarrierController)> {
        let cycles = Arc::new(WorkerCycles::new(config.workers));
        Self::start_with_cycles(config, queue, cycles, table)
    }

    /// Like [`LogicPool::start`], with cycle words created by the caller.
    ///
    /// Lets handlers in `table` hold deferred release queues built on the
    /// same `cycles` the workers will publish to.
    ///
    /// # Errors
    ///
    /// As [`LogicPool::start`], and if `cycles` tracks a different number
    /// of workers than `config.workers`.
    pub fn start_with_cycles(
        config: &PoolConfig,
        queue: Arc<JobQueue>,
        cycles: Arc<WorkerCycles>,
        table: DispatchTable,
    ) -> CoreResult<(Self, BarrierController)> {
        if config.workers == 0 {
            return Err(CoreError::NoWorkers);
        }
        if cycles.worker_count() != config.workers {
            return Err(CoreError::CycleCountMismatch {
                workers: config.workers,
                tracked: cycles.worker_count(),
            });
        }

        let barrier = Arc::new(Barrier::new(config.workers));
        let shared = Arc::new(Shared {
            queue: Arc::clone(&queue),
            barrier: Arc::clone(&barrier),
            cycles,
            table,
            counters: PoolCounters::default(),
            activity: ActivityBoard::new(config.workers),
            idle_sleep: config.idle_sleep,
        });

        let mut handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || worker_loop(index, &worker_shared));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for _ in 0..handles.len() {
                        queue.push_back(Job::control(JobKind::Finish));
                    }
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(CoreError::WorkerSpawn {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("logic pool started with {} workers", config.workers);
        let controller = BarrierController::new(barrier, queue);
        Ok((Self { shared, handles }, controller))
    }

    /// The queue the workers pop from.
    #[must_use]
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.shared.queue
    }

    /// The barrier, for observers.
    #[must_use]
    pub fn barrier(&self) -> &Arc<Barrier> {
        &self.shared.barrier
    }

    /// Per-worker cycle words, for deferred release queues.
    #[must_use]
    pub fn cycles(&self) -> &Arc<WorkerCycles> {
        &self.shared.cycles
    }

    /// Number of workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let cycles = &self.shared.cycles;
        let completed = (0..cycles.worker_count()).map(|w| cycles.completed(w)).collect();
        self.shared.counters.snapshot(completed)
    }

    /// Jobs running longer than `threshold`, each reported only once.
    #[must_use]
    pub fn newly_stalled(&self, threshold: Duration) -> Vec<StalledJob> {
        self.shared.activity.newly_stalled(threshold)
    }

    /// Stops every worker and drops the periodic jobs left in the queue.
    ///
    /// Consumes the barrier controller, so no barrier round can be held
    /// while the workers are asked to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread panicked outside a job callback.
    pub fn shutdown(self, controller: BarrierController) -> CoreResult<()> {
        drop(controller);
        let queue = &self.shared.queue;
        for _ in 0..self.handles.len() {
            queue.push_back(Job::control(JobKind::Finish));
        }

        let mut result = Ok(());
        for (index, handle) in self.handles.into_iter().enumerate() {
            if handle.join().is_err() {
                tracing::error!("logic worker {} terminated abnormally", index);
                result = Err(CoreError::WorkerPanicked(index));
            }
        }

        let mut erased = 0;
        for kind in JobKind::PERIODIC {
            erased += queue.erase_all_of_kind(kind);
        }
        erased += queue.erase_all_of_kind(JobKind::Synchronize);
        tracing::info!("logic pool stopped, {} periodic jobs erased", erased);
        result
    }
}

impl std::fmt::Debug for LogicPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicPool")
            .field("workers", &self.handles.len())
            .field("queue", &self.shared.queue)
            .field("table", &self.shared.table)
            .finish()
    }
}

/// Body of every worker thread.
fn worker_loop(index: usize, shared: &Shared) {
    tracing::debug!("logic worker {} running", index);
    let mut idle_streak = 0usize;

    loop {
        shared.barrier.checkpoint();
        let job = shared.queue.pop_front();
        match job.kind {
            JobKind::Finish => break,
            JobKind::Synchronize => {
                shared.barrier.checkpoint();
                continue;
            }
            JobKind::Nop => continue,
            _ => {}
        }

        let outcome = execute(index, shared, &job);
        let counters = &shared.counters;
        let made_progress = match outcome {
            JobOutcome::Done | JobOutcome::Idle => {
                counters.executed.fetch_add(1, Ordering::Relaxed);
                if job.recurring {
                    shared.queue.push_back(job);
                }
                outcome == JobOutcome::Done
            }
            JobOutcome::NotReady => {
                counters.requeued.fetch_add(1, Ordering::Relaxed);
                shared.queue.push_back(job);
                false
            }
            JobOutcome::Missing | JobOutcome::Finished => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
        };

        if made_progress {
            idle_streak = 0;
        } else {
            idle_streak += 1;
            if idle_streak >= shared.queue.len().max(1) {
                counters.naps.fetch_add(1, Ordering::Relaxed);
                thread::sleep(shared.idle_sleep);
                idle_streak = 0;
            }
        }
    }

    tracing::debug!("logic worker {} finished", index);
}

/// Runs one job's handler inside the worker's cycle, isolating panics.
fn execute(index: usize, shared: &Shared, job: &Job) -> JobOutcome {
    let Some(handler) = shared.table.get(job.kind) else {
        tracing::debug!("no handler for {:?}, job dropped", job.kind);
        return JobOutcome::Missing;
    };

    let _cycle = shared.cycles.enter(index);
    shared.activity.begin(index, job.kind);
    let ctx = WorkerContext {
        worker: index,
        queue: &shared.queue,
    };
    let result = catch_unwind(AssertUnwindSafe(|| handler.run(job, &ctx)));
    shared.activity.end(index);

    match result {
        Ok(outcome) => outcome,
        Err(payload) => {
            shared.counters.panics.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                "job {:?} on target {} panicked in worker {}: {}",
                job.kind,
                job.target,
                index,
                panic_message(payload.as_ref())
            );
            JobOutcome::Finished
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = LogicPool::start(
            &PoolConfig::with_workers(0),
            Arc::new(JobQueue::new()),
            DispatchTable::new(),
        );
        assert!(matches!(result, Err(CoreError::NoWorkers)));
    }

    #[test]
    fn test_cycle_count_must_match_workers() {
        let result = LogicPool::start_with_cycles(
            &PoolConfig::with_workers(2),
            Arc::new(JobQueue::new()),
            Arc::new(WorkerCycles::new(3)),
            DispatchTable::new(),
        );
        assert!(matches!(
            result,
            Err(CoreError::CycleCountMismatch {
                workers: 2,
                tracked: 3,
            })
        ));
    }

    #[test]
    fn test_one_shot_jobs_run_once() {
        let runs = Arc::new(AtomicU64::new(0));
        let counted = Arc::clone(&runs);
        let table = DispatchTable::new()
            .with(JobKind::Map, move |_: &Job, _: &WorkerContext<'_>| {
                counted.fetch_add(1, Ordering::SeqCst);
                JobOutcome::Done
            })
            .unwrap();
        let queue = Arc::new(JobQueue::new());
        let (pool, controller) =
            LogicPool::start(&PoolConfig::with_workers(2), Arc::clone(&queue), table).unwrap();

        for id in 0..50 {
            queue.push_back(Job::once(JobKind::Map, id));
        }
        assert!(wait_until(Duration::from_secs(5), || runs.load(Ordering::SeqCst) == 50));
        pool.shutdown(controller).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let table = DispatchTable::new()
            .with(JobKind::Critter, |job: &Job, _: &WorkerContext<'_>| {
                assert!(job.target != 13, "critter 13 is cursed");
                JobOutcome::Done
            })
            .unwrap();
        let queue = Arc::new(JobQueue::new());
        let (pool, controller) =
            LogicPool::start(&PoolConfig::with_workers(1), Arc::clone(&queue), table).unwrap();

        queue.push_back(Job::recurring(JobKind::Critter, 13));
        queue.push_back(Job::recurring(JobKind::Critter, 14));
        assert!(wait_until(Duration::from_secs(5), || pool.stats().callback_panics == 1
            && pool.stats().jobs_executed > 10));

        pool.shutdown(controller).unwrap();
        // The failing job was dropped, the healthy one kept running.
        assert_eq!(queue.count_of_kind(JobKind::Critter), 1);
    }

    #[test]
    fn test_not_ready_requeues_one_shot() {
        let attempts = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&attempts);
        let table = DispatchTable::new()
            .with(JobKind::Client, move |_: &Job, _: &WorkerContext<'_>| {
                if seen.fetch_add(1, Ordering::SeqCst) < 3 {
                    JobOutcome::NotReady
                } else {
                    JobOutcome::Done
                }
            })
            .unwrap();
        let queue = Arc::new(JobQueue::new());
        let (pool, controller) =
            LogicPool::start(&PoolConfig::with_workers(1), Arc::clone(&queue), table).unwrap();

        queue.push_back(Job::once(JobKind::Client, 5));
        assert!(wait_until(Duration::from_secs(5), || attempts.load(Ordering::SeqCst) == 4));
        assert!(wait_until(Duration::from_secs(1), || queue.is_empty()));
        let stats = pool.stats();
        assert_eq!(stats.jobs_requeued, 3);
        assert_eq!(stats.jobs_executed, 1);
        pool.shutdown(controller).unwrap();
    }

    #[test]
    fn test_missing_handler_drops_job() {
        let queue = Arc::new(JobQueue::new());
        let (pool, controller) =
            LogicPool::start(&PoolConfig::with_workers(1), Arc::clone(&queue), DispatchTable::new())
                .unwrap();
        queue.push_back(Job::recurring(JobKind::Garbage, 0));
        assert!(wait_until(Duration::from_secs(5), || pool.stats().jobs_dropped == 1));
        assert!(queue.is_empty());
        pool.shutdown(controller).unwrap();
    }

    #[test]
    fn test_shutdown_erases_periodic_jobs() {
        let table = DispatchTable::new()
            .with(JobKind::TimeEvents, |_: &Job, _: &WorkerContext<'_>| JobOutcome::Idle)
            .unwrap();
        let queue = Arc::new(JobQueue::new());
        let (pool, controller) =
            LogicPool::start(&PoolConfig::with_workers(2), Arc::clone(&queue), table).unwrap();
        queue.push_back(Job::recurring(JobKind::TimeEvents, 0));
        assert!(wait_until(Duration::from_secs(5), || pool.stats().jobs_executed > 5));
        assert!(pool.stats().idle_naps > 0);

        pool.shutdown(controller).unwrap();
        assert!(queue.is_empty());
    }
}
