//! # Synchronization Barrier
//!
//! Freezes every logic worker at a safe point between jobs, hands the
//! controlling thread exclusive access to the world, then releases them all.
//!
//! ```text
//!   Control loop                     Workers (x N)
//!   ────────────                     ─────────────
//!   synchronize()
//!     generation += 1
//!     push N x Synchronize  ──────>  (finish current job)
//!     wait arrived == N     <──────  checkpoint(): arrived += 1, park
//!   ... exclusive section ...
//!   drop(guard)
//!     released = generation ──────>  wake, resume popping
//! ```
//!
//! The controller side is a single-owner [`BarrierController`]. Its
//! [`synchronize`](BarrierController::synchronize) takes `&mut self` and
//! returns a [`BarrierGuard`] that releases the workers when dropped, so a
//! nested synchronize does not compile and early returns cannot leak a held
//! barrier.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::job::{Job, JobKind};
use crate::queue::JobQueue;

/// Mutable barrier state, guarded by one mutex.
#[derive(Debug, Default)]
struct BarrierState {
    /// Round counter. Incremented by every synchronize.
    generation: u64,
    /// Last generation whose workers were released.
    released: u64,
    /// Workers that arrived during the current generation.
    arrived: usize,
    /// Workers currently parked.
    parked: usize,
}

/// Shared rendezvous point between the control loop and the worker pool.
#[derive(Debug)]
pub struct Barrier {
    /// Number of workers that must arrive before a synchronize returns.
    target: usize,
    /// State.
    state: Mutex<BarrierState>,
    /// Lock-free hint read by workers between jobs.
    pending: AtomicBool,
    /// Signalled when the last worker arrives.
    all_arrived: Condvar,
    /// Signalled on release.
    released: Condvar,
}

impl Barrier {
    /// Creates a barrier for `target` workers.
    #[must_use]
    pub fn new(target: usize) -> Self {
        Self {
            target,
            state: Mutex::new(BarrierState::default()),
            pending: AtomicBool::new(false),
            all_arrived: Condvar::new(),
            released: Condvar::new(),
        }
    }

    /// Worker-side safe point. Call only between jobs.
    ///
    /// Returns immediately when no round is pending. Otherwise counts this
    /// worker as arrived and blocks until the controller releases the round.
    /// Returns true if the worker parked.
    pub fn checkpoint(&self) -> bool {
        if !self.pending.load(Ordering::Acquire) {
            return false;
        }

        let mut state = self.state.lock();
        if state.released == state.generation {
            return false;
        }

        let generation = state.generation;
        state.arrived += 1;
        state.parked += 1;
        debug_assert!(state.arrived <= self.target, "more arrivals than workers");
        if state.arrived == self.target {
            self.all_arrived.notify_all();
        }

        while state.released < generation {
            self.released.wait(&mut state);
        }
        state.parked -= 1;
        true
    }

    /// Starts a new round. Workers park at their next checkpoint.
    fn begin_round(&self) -> u64 {
        let mut state = self.state.lock();
        debug_assert_eq!(state.released, state.generation, "barrier already held");
        state.generation += 1;
        state.arrived = 0;
        self.pending.store(true, Ordering::Release);
        state.generation
    }

    /// Blocks until every worker arrived for the current round.
    fn wait_all_arrived(&self) {
        let mut state = self.state.lock();
        while state.arrived < self.target {
            self.all_arrived.wait(&mut state);
        }
    }

    /// Releases every worker parked on the current round.
    fn release_round(&self) {
        let mut state = self.state.lock();
        state.released = state.generation;
        self.pending.store(false, Ordering::Release);
        drop(state);
        self.released.notify_all();
    }

    /// Number of workers a round waits for.
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.target
    }

    /// Workers that arrived during the current generation.
    #[must_use]
    pub fn arrived_count(&self) -> usize {
        self.state.lock().arrived
    }

    /// Workers blocked at a checkpoint right now.
    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.state.lock().parked
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Returns true between a synchronize and its release.
    #[must_use]
    pub fn is_held(&self) -> bool {
        let state = self.state.lock();
        state.released != state.generation
    }
}

/// Control-loop handle to the barrier. There is exactly one per pool.
pub struct BarrierController {
    barrier: Arc<Barrier>,
    queue: Arc<JobQueue>,
}

impl BarrierController {
    pub(crate) fn new(barrier: Arc<Barrier>, queue: Arc<JobQueue>) -> Self {
        Self { barrier, queue }
    }

    /// Freezes every worker at a safe point and returns once all of them
    /// have parked.
    ///
    /// While the returned guard lives, no job callback is running anywhere.
    /// Dropping the guard releases the workers.
    pub fn synchronize(&mut self) -> BarrierGuard<'_> {
        let started = Instant::now();
        let generation = self.barrier.begin_round();

        // Workers blocked on an empty queue only reach a checkpoint when they
        // pop something. Stale wake-ups after release are no-ops.
        for _ in 0..self.barrier.target_count() {
            self.queue.push_back(Job::control(JobKind::Synchronize));
        }
        self.barrier.wait_all_arrived();

        tracing::debug!(
            "barrier generation {} held after {:?}",
            generation,
            started.elapsed()
        );
        BarrierGuard {
            controller: self,
            generation,
            held_since: Instant::now(),
        }
    }

    /// The shared barrier, for observers.
    #[must_use]
    pub fn barrier(&self) -> &Arc<Barrier> {
        &self.barrier
    }
}

impl std::fmt::Debug for BarrierController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarrierController").field("barrier", &self.barrier).finish()
    }
}

/// Proof that every worker is parked. Releases them on drop.
#[must_use = "dropping the guard immediately releases the workers"]
pub struct BarrierGuard<'a> {
    controller: &'a mut BarrierController,
    generation: u64,
    held_since: Instant,
}

impl BarrierGuard<'_> {
    /// Generation of the round this guard holds.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Workers parked behind this guard.
    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.controller.barrier.parked_count()
    }
}

impl Drop for BarrierGuard<'_> {
    fn drop(&mut self) {
        self.controller.barrier.release_round();
        tracing::debug!(
            "barrier generation {} released after {:?}",
            self.generation,
            self.held_since.elapsed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    /// Minimal stand-in for the worker loop.
    fn spawn_workers(
        count: usize,
        barrier: &Arc<Barrier>,
        queue: &Arc<JobQueue>,
        in_job: &Arc<AtomicUsize>,
    ) -> Vec<thread::JoinHandle<()>> {
        (0..count)
            .map(|_| {
                let barrier = Arc::clone(barrier);
                let queue = Arc::clone(queue);
                let in_job = Arc::clone(in_job);
                thread::spawn(move || loop {
                    barrier.checkpoint();
                    let job = queue.pop_front();
                    match job.kind {
                        JobKind::Finish => break,
                        JobKind::Synchronize | JobKind::Nop => {}
                        _ => {
                            in_job.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_micros(200));
                            in_job.fetch_sub(1, Ordering::SeqCst);
                            queue.push_back(job);
                        }
                    }
                })
            })
            .collect()
    }

    #[test]
    fn test_idle_workers_reach_barrier() {
        let barrier = Arc::new(Barrier::new(3));
        let queue = Arc::new(JobQueue::new());
        let in_job = Arc::new(AtomicUsize::new(0));
        let handles = spawn_workers(3, &barrier, &queue, &in_job);
        let mut controller = BarrierController::new(Arc::clone(&barrier), Arc::clone(&queue));

        {
            let guard = controller.synchronize();
            assert_eq!(guard.parked_count(), 3);
            assert_eq!(barrier.arrived_count(), 3);
            assert!(barrier.is_held());
        }
        assert!(!barrier.is_held());

        for _ in 0..3 {
            queue.push_back(Job::control(JobKind::Finish));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(barrier.parked_count(), 0);
    }

    #[test]
    fn test_no_job_runs_while_held() {
        let barrier = Arc::new(Barrier::new(4));
        let queue = Arc::new(JobQueue::new());
        let in_job = Arc::new(AtomicUsize::new(0));
        for id in 0..32 {
            queue.push_back(Job::recurring(JobKind::Critter, id));
        }
        let handles = spawn_workers(4, &barrier, &queue, &in_job);
        let mut controller = BarrierController::new(Arc::clone(&barrier), Arc::clone(&queue));

        for round in 1..=20u64 {
            let guard = controller.synchronize();
            assert_eq!(guard.generation(), round);
            for _ in 0..5 {
                assert_eq!(in_job.load(Ordering::SeqCst), 0);
                thread::sleep(Duration::from_micros(300));
            }
            drop(guard);
            thread::sleep(Duration::from_millis(1));
        }

        queue.erase_all_of_kind(JobKind::Critter);
        for _ in 0..4 {
            queue.push_back(Job::control(JobKind::Finish));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_checkpoint_without_round_is_free() {
        let barrier = Barrier::new(2);
        assert!(!barrier.checkpoint());
        assert_eq!(barrier.arrived_count(), 0);
        assert_eq!(barrier.generation(), 0);
    }
}
