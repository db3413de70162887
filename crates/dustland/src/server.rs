//! # Server Assembly
//!
//! Wires the pieces together and owns their threads.
//!
//! ## Startup
//!
//! 1. Open the save directories, restore the newest world file
//! 2. Bind the listener, start the save thread and the I/O backend
//! 3. Start the logic pool and schedule the recurring jobs
//! 4. Start accepting
//!
//! ## Shutdown
//!
//! 1. Stop accepting
//! 2. Stop the logic workers (periodic jobs are erased)
//! 3. Disconnect every client, stop the I/O backend
//! 4. Final synchronous save, join the save thread
//! 5. Drop everything still retired

use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use dustland_core::{Job, JobKind, LogicPool, WorkerCycles};
use dustland_networking::{start_backend, AcceptHooks, Acceptor, IoBackend};
use dustland_persistence::{ClientStore, SavePipeline, WorldStore};

use crate::bans::unix_now;
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::control::ControlLoop;
use crate::error::ServerResult;
use crate::jobs;
use crate::logic::GameLogic;

/// Acceptor sleep between polls of an idle listener.
const ACCEPT_POLL: Duration = Duration::from_millis(5);

/// A running server.
pub struct Server {
    ctx: Arc<ServerContext>,
    control: ControlLoop,
    backend: Arc<dyn IoBackend>,
    acceptor: Option<Acceptor>,
    stopped: bool,
}

impl Server {
    /// Starts every thread and begins accepting.
    ///
    /// `config_path` is the file hot reloads re-read, if any.
    ///
    /// # Errors
    ///
    /// Fails if the save directories cannot be opened, the newest world
    /// file does not restore, the listener cannot bind, or a thread cannot
    /// be started. Threads started before the failure are stopped.
    pub fn start(
        config: ServerConfig,
        config_path: Option<PathBuf>,
        logic: Arc<dyn GameLogic>,
    ) -> ServerResult<Self> {
        let clients = ClientStore::open(&config.save.clients_directory)?;
        let worlds = WorldStore::open(&config.save.directory, config.save.slots)?;

        let pool_config = config.pool_config();
        let cycles = Arc::new(WorkerCycles::new(pool_config.workers));
        let listen = config.listen_address()?;
        let backend_kind = config.backend_kind()?;
        let io_settings = config.io_settings();

        let ctx = Arc::new(ServerContext::new(
            config,
            config_path,
            logic,
            Arc::clone(&cycles),
            clients.clone(),
        ));
        match worlds.load_latest() {
            Some(loaded) => ctx.restore(&loaded)?,
            None => tracing::info!(dir = %worlds.dir().display(), "no saved world, starting empty"),
        }

        let listener = TcpListener::bind(listen)?;
        let pipeline = SavePipeline::start(worlds, clients)?;
        let backend = start_backend(backend_kind, io_settings)?;

        let started = jobs::dispatch_table(&ctx).and_then(|table| {
            LogicPool::start_with_cycles(&pool_config, Arc::clone(ctx.queue()), cycles, table)
        });
        let (pool, controller) = match started {
            Ok(started) => started,
            Err(e) => {
                backend.shutdown();
                return Err(e.into());
            }
        };
        jobs::schedule_recurring(&ctx);
        let mut control = ControlLoop::new(Arc::clone(&ctx), pool, controller, pipeline);

        let acceptor = Acceptor::spawn(
            listener,
            Arc::clone(ctx.registry()),
            Arc::clone(&backend),
            accept_hooks(&ctx),
            ACCEPT_POLL,
        );
        let acceptor = match acceptor {
            Ok(acceptor) => acceptor,
            Err(e) => {
                if let Err(stop) = control.stop_workers() {
                    tracing::error!(error = %stop, "workers did not stop cleanly");
                }
                backend.shutdown();
                return Err(e.into());
            }
        };

        tracing::info!(
            address = %acceptor.local_addr(),
            backend = backend.name(),
            workers = pool_config.workers,
            "server started"
        );
        Ok(Self {
            ctx,
            control,
            backend,
            acceptor: Some(acceptor),
            stopped: false,
        })
    }

    /// Address clients connect to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.as_ref().map(Acceptor::local_addr)
    }

    /// Shared server state.
    #[must_use]
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Setting this flag makes [`run`](Self::run) return.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.ctx.shutdown_flag()
    }

    /// The control loop, for manual ticks.
    pub fn control(&mut self) -> &mut ControlLoop {
        &mut self.control
    }

    /// Takes a save now instead of waiting for the interval.
    ///
    /// # Errors
    ///
    /// Fails if the save pipeline is closed.
    pub fn save_now(&mut self) -> ServerResult<u64> {
        self.control.save_now()
    }

    /// Runs the control loop until a shutdown is requested, then shuts down.
    ///
    /// # Errors
    ///
    /// See [`shutdown`](Self::shutdown).
    pub fn run(mut self) -> ServerResult<()> {
        self.control.run();
        self.shutdown()
    }

    /// Stops everything in order and writes the final save.
    ///
    /// # Errors
    ///
    /// Returns the first failure. Later steps still run.
    pub fn shutdown(&mut self) -> ServerResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        tracing::info!("server shutting down");
        self.ctx.request_shutdown();
        if let Some(mut acceptor) = self.acceptor.take() {
            acceptor.stop();
        }

        let mut result = self.control.stop_workers();

        let disconnected = self.ctx.registry().disconnect_all();
        self.backend.shutdown();
        tracing::info!(disconnected, "network stopped");

        let saved = self.control.final_save().map(|_| ());
        if result.is_ok() {
            result = saved;
        } else if let Err(e) = saved {
            tracing::error!(error = %e, "final save failed");
        }
        self.control.close_pipeline();
        self.ctx.release_all();
        tracing::info!("server stopped");
        result
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "shutdown on drop failed");
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.local_addr())
            .field("backend", &self.backend.name())
            .field("context", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Refuses banned addresses and schedules one job per new connection.
fn accept_hooks(ctx: &Arc<ServerContext>) -> AcceptHooks {
    let admit_ctx = Arc::clone(ctx);
    let accept_ctx = Arc::clone(ctx);
    AcceptHooks {
        admit: Box::new(move |peer| match admit_ctx.bans().check_ip(peer.ip(), unix_now()) {
            Some(ban) => {
                tracing::info!(%peer, name = %ban.name, "banned address refused");
                false
            }
            None => true,
        }),
        on_accept: Box::new(move |connection| {
            let job = Job::recurring(JobKind::Client, u64::from(connection.id().0));
            accept_ctx.queue().push_back(job);
        }),
    }
}
