//! # Memory Reclamation
//!
//! Nothing a worker may still be using is finalized directly. Removal is
//! always two-phase: unregister and retire, then reclaim once every worker
//! has moved past the job it was running at retirement.

mod deferred;
mod epoch;

pub use deferred::DeferredRelease;
pub use epoch::{CycleGuard, CycleSnapshot, WorkerCycles};
