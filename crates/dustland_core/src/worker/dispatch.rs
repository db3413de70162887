//! # Dispatch Table
//!
//! Maps each job kind to the handler that executes it. Built once before
//! the pool starts and immutable afterwards, so the worker loop does a
//! single array lookup per job.

use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::job::{Job, JobKind};
use crate::queue::JobQueue;

/// What happened when a handler ran a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The callback ran and did work. Recurring jobs go back to the tail.
    Done,
    /// The callback ran and found nothing due. Recurring jobs go back to
    /// the tail; a full lap of these makes the worker nap.
    Idle,
    /// The target is busy. The job goes back to the tail, recurring or not.
    NotReady,
    /// The target does not exist any more. The job is dropped silently.
    Missing,
    /// The target asked to stop. The job is dropped even if recurring.
    Finished,
}

/// What a handler sees besides the job.
#[derive(Debug)]
pub struct WorkerContext<'a> {
    /// Index of the executing worker.
    pub worker: usize,
    /// The shared queue, for handlers that schedule follow-up jobs.
    pub queue: &'a JobQueue,
}

/// Executes one kind of job.
///
/// A handler resolves `job.target` through its own registry, takes the
/// target's lock for the duration of the call and never holds anything
/// past its return.
pub trait JobHandler: Send + Sync {
    /// Runs `job` once.
    fn run(&self, job: &Job, ctx: &WorkerContext<'_>) -> JobOutcome;
}

impl<F> JobHandler for F
where
    F: Fn(&Job, &WorkerContext<'_>) -> JobOutcome + Send + Sync,
{
    fn run(&self, job: &Job, ctx: &WorkerContext<'_>) -> JobOutcome {
        self(job, ctx)
    }
}

/// Kind to handler lookup.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: [Option<Arc<dyn JobHandler>>; JobKind::COUNT],
}

impl DispatchTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error for control kinds and for kinds that already have a
    /// handler.
    pub fn register(&mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> CoreResult<()> {
        if kind.is_control() {
            return Err(CoreError::ControlKind(kind));
        }
        let slot = &mut self.handlers[kind.index()];
        if slot.is_some() {
            return Err(CoreError::DuplicateHandler(kind));
        }
        *slot = Some(handler);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn with(mut self, kind: JobKind, handler: impl JobHandler + 'static) -> CoreResult<Self> {
        self.register(kind, Arc::new(handler))?;
        Ok(self)
    }

    /// Handler for `kind`, if any.
    #[inline]
    #[must_use]
    pub fn get(&self, kind: JobKind) -> Option<&Arc<dyn JobHandler>> {
        self.handlers[kind.index()].as_ref()
    }

    /// Kinds with a registered handler.
    #[must_use]
    pub fn registered_kinds(&self) -> Vec<JobKind> {
        JobKind::ALL.into_iter().filter(|kind| self.get(*kind).is_some()).collect()
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable").field("kinds", &self.registered_kinds()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(_: &Job, _: &WorkerContext<'_>) -> JobOutcome {
        JobOutcome::Done
    }

    #[test]
    fn test_register_and_lookup() {
        let table = DispatchTable::new().with(JobKind::Critter, done).unwrap();
        assert!(table.get(JobKind::Critter).is_some());
        assert!(table.get(JobKind::Map).is_none());
        assert_eq!(table.registered_kinds(), vec![JobKind::Critter]);

        let queue = JobQueue::new();
        let ctx = WorkerContext {
            worker: 0,
            queue: &queue,
        };
        let handler = table.get(JobKind::Critter).unwrap();
        assert_eq!(handler.run(&Job::once(JobKind::Critter, 1), &ctx), JobOutcome::Done);
    }

    #[test]
    fn test_rejects_control_kind() {
        let result = DispatchTable::new().with(JobKind::Finish, done);
        assert_eq!(result.err(), Some(CoreError::ControlKind(JobKind::Finish)));
    }

    #[test]
    fn test_rejects_duplicate() {
        let result = DispatchTable::new()
            .with(JobKind::Map, done)
            .and_then(|table| table.with(JobKind::Map, done));
        assert_eq!(result.err(), Some(CoreError::DuplicateHandler(JobKind::Map)));
    }
}
