//! # Control Loop
//!
//! The process's top-level thread. Every tick it reclaims retired handles,
//! reports stalled jobs, and when due freezes the logic pool to take a
//! save or apply a reload.
//!
//! ```text
//!   tick ──> reclaim ──> stall report ──> save due? ──> reload asked?
//!                                           │              │
//!                                 synchronize: copy   synchronize: re-read
//!                                 release, submit     config, logic reload
//! ```
//!
//! The barrier is only held for the in-memory copy. Disk writes happen on
//! the save pipeline thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dustland_core::{BarrierController, LogicPool};
use dustland_persistence::{SaveBatch, SavePipeline};

use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::ServerResult;

/// How often pool counters are logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Drives saves, reloads and reclamation for a running server.
pub struct ControlLoop {
    ctx: Arc<ServerContext>,
    workers: Option<(LogicPool, BarrierController)>,
    pipeline: SavePipeline,
    last_save: Instant,
    last_status: Instant,
}

impl ControlLoop {
    /// Takes over the started pool, its barrier controller and the save
    /// pipeline.
    #[must_use]
    pub fn new(
        ctx: Arc<ServerContext>,
        pool: LogicPool,
        controller: BarrierController,
        pipeline: SavePipeline,
    ) -> Self {
        Self {
            ctx,
            workers: Some((pool, controller)),
            pipeline,
            last_save: Instant::now(),
            last_status: Instant::now(),
        }
    }

    /// Ticks until a shutdown is requested.
    pub fn run(&mut self) {
        let tick = self.ctx.config().tick();
        tracing::info!(tick = ?tick, "control loop running");
        while !self.ctx.is_shutting_down() {
            let started = Instant::now();
            self.tick_once();
            if let Some(rest) = tick.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
        tracing::info!("control loop stopping");
    }

    /// One pass of the loop body.
    pub fn tick_once(&mut self) {
        let (connections, entities) = self.ctx.reclaim();
        if connections + entities > 0 {
            tracing::debug!(connections, entities, "reclaimed retired handles");
        }

        let tunables = self.ctx.tunables();
        if let Some((pool, _)) = &self.workers {
            for stalled in pool.newly_stalled(tunables.stall_warning) {
                tracing::warn!(
                    worker = stalled.worker,
                    kind = ?stalled.kind,
                    running_for = ?stalled.running_for,
                    "job is stalling its worker"
                );
            }
            if self.last_status.elapsed() >= STATUS_INTERVAL {
                self.last_status = Instant::now();
                let stats = pool.stats();
                tracing::info!(
                    executed = stats.jobs_executed,
                    requeued = stats.jobs_requeued,
                    dropped = stats.jobs_dropped,
                    panics = stats.callback_panics,
                    queued = self.ctx.queue().len(),
                    online = self.ctx.registry().online_count(),
                    "server status"
                );
            }
        }

        let requested = self.ctx.take_save_request();
        if requested || self.last_save.elapsed() >= tunables.save_interval {
            // A failed save is retried at the next interval, not every tick.
            self.last_save = Instant::now();
            if let Err(e) = self.save_now() {
                tracing::error!(error = %e, "world save failed");
            }
        }

        if self.ctx.take_reload_request() {
            self.reload();
        }
    }

    /// Snapshots the world behind the barrier and hands it to the save
    /// thread. Returns the save sequence number.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline has been closed.
    pub fn save_now(&mut self) -> ServerResult<u64> {
        let batch = self.fill_batch()?;
        let sequence = batch.sequence;
        self.pipeline.submit(batch)?;
        Ok(sequence)
    }

    /// Re-reads the tunables and reloads the game logic behind the barrier.
    ///
    /// Failures are logged and the running values kept.
    pub fn reload(&mut self) {
        let Some((_, controller)) = self.workers.as_mut() else {
            tracing::warn!("reload ignored, workers stopped");
            return;
        };
        let guard = controller.synchronize();
        let frozen = Instant::now();

        if let Some(path) = self.ctx.config_path() {
            match ServerConfig::load(path) {
                Ok(config) => {
                    self.ctx.set_tunables(config.tunables());
                    tracing::info!(path = %path.display(), "tunables reloaded");
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "configuration reload failed"),
            }
        }
        match self.ctx.logic().reload() {
            Ok(()) => tracing::info!("game logic reloaded"),
            Err(e) => tracing::error!(error = %e, "game logic reload failed"),
        }

        let generation = guard.generation();
        drop(guard);
        tracing::debug!(generation, held = ?frozen.elapsed(), "barrier released after reload");
    }

    /// The pool, until the workers are stopped.
    #[must_use]
    pub fn pool(&self) -> Option<&LogicPool> {
        self.workers.as_ref().map(|(pool, _)| pool)
    }

    /// The save pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &SavePipeline {
        &self.pipeline
    }

    /// Stops the logic workers. Later saves run without the barrier.
    ///
    /// # Errors
    ///
    /// Fails if a worker thread died outside a job callback.
    pub fn stop_workers(&mut self) -> ServerResult<()> {
        if let Some((pool, controller)) = self.workers.take() {
            pool.shutdown(controller)?;
        }
        Ok(())
    }

    /// Waits for queued saves, then writes one more on this thread.
    ///
    /// # Errors
    ///
    /// Returns the write error. Earlier snapshots stay on disk.
    pub fn final_save(&mut self) -> ServerResult<u64> {
        self.pipeline.wait_idle();
        let batch = self.fill_batch()?;
        let sequence = batch.sequence;
        self.pipeline.write_now(batch)?;
        tracing::info!(sequence, "final save written");
        Ok(sequence)
    }

    /// Joins the save thread.
    pub fn close_pipeline(&mut self) {
        self.pipeline.shutdown();
    }

    fn fill_batch(&mut self) -> ServerResult<SaveBatch> {
        let mut batch = self.pipeline.acquire_batch()?;
        batch.sequence = self.ctx.next_save_sequence();

        match self.workers.as_mut() {
            Some((_, controller)) => {
                let guard = controller.synchronize();
                let frozen = Instant::now();
                self.ctx.collect_snapshot(&mut batch);
                let parked = guard.parked_count();
                drop(guard);
                tracing::debug!(sequence = batch.sequence, parked, held = ?frozen.elapsed(), "barrier released after snapshot");
            }
            None => self.ctx.collect_snapshot(&mut batch),
        }
        Ok(batch)
    }
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("workers_running", &self.workers.is_some())
            .field("pipeline", &self.pipeline.state())
            .field("last_save", &self.last_save.elapsed())
            .finish_non_exhaustive()
    }
}
