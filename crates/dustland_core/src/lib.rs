//! # Dustland Core - The Scheduler
//!
//! Turns work into jobs and runs them on a fixed pool of OS threads.
//!
//! ## Architecture
//!
//! ```text
//!              push_back                       pop_front
//!   producers ──────────> [ JobQueue ] ───────────────────> Worker x N
//!                              ▲                               │
//!                              └──── recurring / not ready ────┘
//!
//!   Control loop ── synchronize() ──> Barrier ──> every worker parked
//!                <─ guard dropped ──           <─ released
//!
//!   retire(handle) ──> DeferredRelease ── every busy worker moved on ──> drop
//! ```
//!
//! ## Rules
//!
//! 1. **One lock per shared structure** - the queue has one, everything else
//!    is locked per target by whichever worker runs a job on it
//! 2. **Nothing is held across a job boundary**
//! 3. **Workers park only between jobs** - a held barrier means no callback
//!    is running anywhere
//! 4. **Removal is two-phase** - unregister, retire, reclaim later
//!
//! ## Example
//!
//! ```rust,ignore
//! use dustland_core::{DispatchTable, Job, JobKind, JobOutcome, JobQueue, LogicPool, PoolConfig};
//!
//! let table = DispatchTable::new().with(JobKind::Critter, tick_critter)?;
//! let queue = Arc::new(JobQueue::new());
//! let (pool, mut barrier) = LogicPool::start(&PoolConfig::default(), queue.clone(), table)?;
//! queue.push_back(Job::recurring(JobKind::Critter, 42));
//!
//! {
//!     let _frozen = barrier.synchronize();
//!     // consistent world, no job running
//! }
//! pool.shutdown(barrier)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod job;
pub mod memory;
pub mod queue;
pub mod sync;
pub mod worker;

pub use error::{CoreError, CoreResult};
pub use job::{Job, JobKind};
pub use memory::{CycleGuard, CycleSnapshot, DeferredRelease, WorkerCycles};
pub use queue::JobQueue;
pub use sync::{Barrier, BarrierController, BarrierGuard};
pub use worker::{
    default_worker_count, DispatchTable, JobHandler, JobOutcome, LogicPool, PoolConfig, PoolStats,
    StalledJob, WorkerContext,
};
