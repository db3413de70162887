//! # Job Handlers
//!
//! One handler per job kind, all sharing the server context:
//!
//! | kind | target | handler |
//! |---|---|---|
//! | Client | connection id | [`ClientJob`]: decode up to K messages |
//! | Critter, Map | entity id | [`EntityJob`]: one tick |
//! | TimeEvents | - | [`TimeEventsJob`] |
//! | Garbage | - | [`GarbageJob`] |
//! | Bans | - | [`BanSweepJob`] |
//!
//! Maintenance jobs are single recurring jobs that return `Idle` until their
//! interval has passed.

mod client;
mod entity;
mod maintenance;

pub use client::ClientJob;
pub use entity::EntityJob;
pub use maintenance::{BanSweepJob, GarbageJob, TimeEventsJob};

use std::sync::Arc;
use std::time::Duration;

use dustland_core::{CoreResult, DispatchTable, Job, JobKind};

use crate::context::ServerContext;
use crate::world::EntityKind;

/// Builds the dispatch table for every non-control job kind.
///
/// # Errors
///
/// Only on a duplicate registration, which would be a bug here.
pub fn dispatch_table(ctx: &Arc<ServerContext>) -> CoreResult<DispatchTable> {
    let control = &ctx.config().control;
    DispatchTable::new()
        .with(JobKind::Client, ClientJob::new(Arc::clone(ctx)))?
        .with(JobKind::Critter, EntityJob::new(Arc::clone(ctx), EntityKind::Critter))?
        .with(JobKind::Map, EntityJob::new(Arc::clone(ctx), EntityKind::Map))?
        .with(
            JobKind::TimeEvents,
            TimeEventsJob::new(
                Arc::clone(ctx),
                Duration::from_millis(control.time_events_interval_ms),
            ),
        )?
        .with(
            JobKind::Garbage,
            GarbageJob::new(Arc::clone(ctx), Duration::from_millis(control.garbage_interval_ms)),
        )?
        .with(
            JobKind::Bans,
            BanSweepJob::new(Arc::clone(ctx), Duration::from_millis(control.ban_sweep_interval_ms)),
        )
}

/// Pushes one recurring job per entity plus the periodic passes.
///
/// Returns the number of jobs pushed.
pub fn schedule_recurring(ctx: &ServerContext) -> usize {
    let mut pushed = 0;
    for kind in [EntityKind::Map, EntityKind::Critter] {
        for id in ctx.world().ids(kind) {
            ctx.schedule_entity(kind, id);
            pushed += 1;
        }
    }
    for kind in JobKind::PERIODIC {
        ctx.queue().push_back(Job::recurring(kind, 0));
        pushed += 1;
    }
    tracing::info!(jobs = pushed, "recurring jobs scheduled");
    pushed
}
