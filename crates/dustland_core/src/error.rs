//! # Core Error Types
//!
//! All errors that can occur while building or running the scheduler.

use thiserror::Error;

use crate::job::JobKind;

/// Errors that can occur in the scheduling core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A pool was requested with zero workers.
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    /// Two handlers were registered for the same job kind.
    #[error("handler already registered for job kind {0:?}")]
    DuplicateHandler(JobKind),

    /// Control kinds are handled by the worker loop itself.
    #[error("job kind {0:?} is a control kind and cannot have a handler")]
    ControlKind(JobKind),

    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread {index}: {reason}")]
    WorkerSpawn {
        /// Worker index.
        index: usize,
        /// OS error text.
        reason: String,
    },

    /// Cycle words were built for a different number of workers.
    #[error("pool has {workers} workers but cycle words track {tracked}")]
    CycleCountMismatch {
        /// Configured workers.
        workers: usize,
        /// Workers the cycle words were built for.
        tracked: usize,
    },

    /// A worker thread terminated by panicking outside a job callback.
    #[error("worker thread {0} panicked")]
    WorkerPanicked(usize),
}

/// Result type for scheduling operations.
pub type CoreResult<T> = Result<T, CoreError>;
