//! Per-entity tick.

use std::sync::Arc;

use dustland_core::{Job, JobHandler, JobOutcome, WorkerContext};

use crate::context::ServerContext;
use crate::logic::TickOutcome;
use crate::world::EntityKind;

/// Handler for `Critter` and `Map` jobs. The job target is the entity id.
pub struct EntityJob {
    ctx: Arc<ServerContext>,
    kind: EntityKind,
}

impl EntityJob {
    /// Creates the handler for one entity kind.
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>, kind: EntityKind) -> Self {
        Self { ctx, kind }
    }
}

impl JobHandler for EntityJob {
    fn run(&self, job: &Job, _: &WorkerContext<'_>) -> JobOutcome {
        let world = self.ctx.world();
        let Some(entity) = world.get(self.kind, job.target) else {
            return JobOutcome::Missing;
        };
        if entity.is_destroyed() {
            return JobOutcome::Missing;
        }

        let outcome = {
            let Some(mut record) = entity.try_lock() else {
                return JobOutcome::NotReady;
            };
            let logic = self.ctx.logic();
            match self.kind {
                EntityKind::Critter => logic.tick_critter(&mut record),
                EntityKind::Map => logic.tick_map(&mut record),
            }
        };

        match outcome {
            TickOutcome::Continue => JobOutcome::Done,
            TickOutcome::Idle => JobOutcome::Idle,
            TickOutcome::Destroy => {
                world.remove(self.kind, job.target);
                JobOutcome::Finished
            }
        }
    }
}
