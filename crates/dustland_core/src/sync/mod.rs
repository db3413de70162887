//! # Synchronization Primitives for the Worker Pool
//!
//! ## The Problem
//!
//! ```text
//! Workers (x N):  mutate entities, one job at a time
//! Control loop:   needs a consistent view of EVERY entity (save, reload)
//!
//! Without coordination: half-updated world written to disk
//! With a global lock:   every job pays for a lock it almost never needs
//! ```
//!
//! ## The Solution: Safe-Point Barrier
//!
//! Workers check a single atomic flag between jobs. Only when the control
//! loop has requested a round do they take the barrier lock and park.

mod barrier;

pub use barrier::{Barrier, BarrierController, BarrierGuard};
