//! Periodic passes: time events, garbage, expired bans.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dustland_core::{Job, JobHandler, JobOutcome, WorkerContext};
use parking_lot::Mutex;

use crate::bans::unix_now;
use crate::context::ServerContext;

/// Fires at most once per interval, whichever worker asks first.
struct Interval {
    every: Duration,
    last: Mutex<Instant>,
}

impl Interval {
    fn new(every: Duration) -> Self {
        Self {
            every,
            last: Mutex::new(Instant::now()),
        }
    }

    fn due(&self) -> bool {
        let mut last = self.last.lock();
        if last.elapsed() < self.every {
            return false;
        }
        *last = Instant::now();
        true
    }
}

fn outcome(work: usize) -> JobOutcome {
    if work > 0 {
        JobOutcome::Done
    } else {
        JobOutcome::Idle
    }
}

/// Runs due time events through the game logic.
pub struct TimeEventsJob {
    ctx: Arc<ServerContext>,
    interval: Interval,
}

impl TimeEventsJob {
    /// Creates the handler, polling every `every`.
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>, every: Duration) -> Self {
        Self {
            ctx,
            interval: Interval::new(every),
        }
    }
}

impl JobHandler for TimeEventsJob {
    fn run(&self, _: &Job, _: &WorkerContext<'_>) -> JobOutcome {
        if !self.interval.due() {
            return JobOutcome::Idle;
        }
        outcome(self.ctx.logic().process_time_events(unix_now()))
    }
}

/// Lets the game logic drop what it no longer references.
pub struct GarbageJob {
    ctx: Arc<ServerContext>,
    interval: Interval,
}

impl GarbageJob {
    /// Creates the handler, collecting every `every`.
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>, every: Duration) -> Self {
        Self {
            ctx,
            interval: Interval::new(every),
        }
    }
}

impl JobHandler for GarbageJob {
    fn run(&self, _: &Job, _: &WorkerContext<'_>) -> JobOutcome {
        if !self.interval.due() {
            return JobOutcome::Idle;
        }
        let collected = self.ctx.logic().collect_garbage();
        if collected > 0 {
            tracing::debug!(collected, "garbage pass");
        }
        outcome(collected)
    }
}

/// Drops expired bans.
pub struct BanSweepJob {
    ctx: Arc<ServerContext>,
    interval: Interval,
}

impl BanSweepJob {
    /// Creates the handler, sweeping every `every`.
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>, every: Duration) -> Self {
        Self {
            ctx,
            interval: Interval::new(every),
        }
    }
}

impl JobHandler for BanSweepJob {
    fn run(&self, _: &Job, _: &WorkerContext<'_>) -> JobOutcome {
        if !self.interval.due() {
            return JobOutcome::Idle;
        }
        outcome(self.ctx.bans().sweep_expired(unix_now()).len())
    }
}
