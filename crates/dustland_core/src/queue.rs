//! # Job Queue
//!
//! The single shared FIFO every logic worker pops from.
//!
//! ```text
//!   Acceptor ────┐                                   ┌──> Worker 0
//!   Control  ────┼──> [ Mutex<VecDeque<Job>> ] ──────┼──> Worker 1
//!   Workers  ────┘     (push back, pop front)        └──> Worker N
//!   (re-enqueue)
//! ```
//!
//! Re-enqueued jobs always go to the tail. A job therefore waits at most one
//! full lap of the queue before it is attempted again, and no kind can starve
//! another. Global FIFO order across kinds is not promised.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

use crate::job::{Job, JobKind};

/// Thread-safe FIFO of jobs with a blocking pop.
pub struct JobQueue {
    /// Pending jobs.
    jobs: Mutex<VecDeque<Job>>,
    /// Signalled on every push.
    not_empty: Condvar,
}

impl JobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Creates an empty queue with room for `capacity` jobs before growing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
        }
    }

    /// Appends a job and wakes one waiting consumer.
    ///
    /// Returns the queue length after the push, for load metrics.
    pub fn push_back(&self, job: Job) -> usize {
        let mut jobs = self.jobs.lock();
        jobs.push_back(job);
        let len = jobs.len();
        drop(jobs);
        self.not_empty.notify_one();
        len
    }

    /// Blocks until a job is available and removes it from the head.
    pub fn pop_front(&self) -> Job {
        let mut jobs = self.jobs.lock();
        loop {
            if let Some(job) = jobs.pop_front() {
                return job;
            }
            self.not_empty.wait(&mut jobs);
        }
    }

    /// Like [`pop_front`](Self::pop_front) but gives up after `timeout`.
    pub fn pop_front_timeout(&self, timeout: Duration) -> Option<Job> {
        let mut jobs = self.jobs.lock();
        if jobs.is_empty() {
            self.not_empty.wait_for(&mut jobs, timeout);
        }
        jobs.pop_front()
    }

    /// Removes the head job if there is one, without blocking.
    pub fn try_pop_front(&self) -> Option<Job> {
        self.jobs.lock().pop_front()
    }

    /// Drops every queued job of `kind`. Returns how many were removed.
    pub fn erase_all_of_kind(&self, kind: JobKind) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|job| job.kind != kind);
        before - jobs.len()
    }

    /// Number of queued jobs of `kind`.
    #[must_use]
    pub fn count_of_kind(&self, kind: JobKind) -> usize {
        self.jobs.lock().iter().filter(|job| job.kind == kind).count()
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Returns true if no job is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_returns_length() {
        let queue = JobQueue::new();
        assert_eq!(queue.push_back(Job::once(JobKind::Critter, 1)), 1);
        assert_eq!(queue.push_back(Job::once(JobKind::Critter, 2)), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_within_kind() {
        let queue = JobQueue::new();
        for id in 0..10 {
            queue.push_back(Job::once(JobKind::Map, id));
            queue.push_back(Job::once(JobKind::Critter, 100 + id));
        }
        let mut maps = Vec::new();
        while let Some(job) = queue.try_pop_front() {
            if job.kind == JobKind::Map {
                maps.push(job.target);
            }
        }
        assert_eq!(maps, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_erase_all_of_kind() {
        let queue = JobQueue::new();
        for kind in JobKind::PERIODIC {
            queue.push_back(Job::recurring(kind, 0));
        }
        queue.push_back(Job::recurring(JobKind::Client, 4));
        queue.push_back(Job::recurring(JobKind::Bans, 0));

        assert_eq!(queue.erase_all_of_kind(JobKind::Bans), 2);
        assert_eq!(queue.count_of_kind(JobKind::Bans), 0);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.erase_all_of_kind(JobKind::Nop), 0);
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let queue = JobQueue::new();
        assert!(queue.pop_front_timeout(Duration::from_millis(5)).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_blocking_pop_wakes_on_push() {
        let queue = Arc::new(JobQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_front())
        };
        thread::sleep(Duration::from_millis(20));
        queue.push_back(Job::once(JobKind::TimeEvents, 9));
        let job = consumer.join().unwrap();
        assert_eq!(job.target, 9);
    }

    #[test]
    fn test_tail_reinsertion_bounds_wait() {
        // Every job is re-enqueued at the tail a random number of times.
        // A job pushed when the queue holds `len` jobs must be attempted
        // within the next `len` pops.
        let mut rng = StdRng::seed_from_u64(0x5EAD);
        let queue = JobQueue::new();
        let mut remaining: HashMap<u64, u32> = HashMap::new();
        let mut deadline: HashMap<u64, usize> = HashMap::new();
        for id in 0..64 {
            let len = queue.push_back(Job::recurring(JobKind::Critter, id));
            remaining.insert(id, rng.gen_range(1..20));
            deadline.insert(id, len);
        }

        let mut pops = 0usize;
        while let Some(job) = queue.try_pop_front() {
            assert!(pops <= deadline[&job.target], "job {} starved", job.target);
            pops += 1;
            let left = remaining.get_mut(&job.target).unwrap();
            *left -= 1;
            if *left > 0 {
                let len = queue.push_back(job);
                deadline.insert(job.target, pops + len);
            }
        }
        assert!(remaining.values().all(|left| *left == 0));
    }
}
