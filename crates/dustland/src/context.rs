//! # Server Context
//!
//! The one object every job handler, the acceptor hooks and the control
//! loop share. It owns the registries and the request flags; nothing in
//! the server lives in a global.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dustland_core::{DeferredRelease, Job, JobQueue, WorkerCycles};
use dustland_networking::{Connection, ConnectionRegistry, MessageReader};
use dustland_persistence::{ClientRecord, ClientStore, LoadedWorld, SaveBatch, SectionKind};
use parking_lot::{Mutex, RwLock};

use crate::bans::{unix_now, BanList};
use crate::commands::CommandTable;
use crate::config::{ServerConfig, Tunables};
use crate::error::{ServerError, ServerResult};
use crate::logic::GameLogic;
use crate::world::{EntityKind, World};

/// Layout version of the generic info section.
const GENERIC_INFO_VERSION: u32 = 1;

/// Shared server state.
pub struct ServerContext {
    config: ServerConfig,
    config_path: Option<PathBuf>,
    tunables: RwLock<Tunables>,
    registry: Arc<ConnectionRegistry>,
    queue: Arc<JobQueue>,
    world: World,
    bans: BanList,
    clients: ClientStore,
    logic: Arc<dyn GameLogic>,
    commands: CommandTable,
    closed_connections: DeferredRelease<Arc<Connection>>,
    pending_records: Mutex<Vec<ClientRecord>>,
    save_requested: AtomicBool,
    reload_requested: AtomicBool,
    shutdown: Arc<AtomicBool>,
    save_sequence: AtomicU64,
    started: Instant,
}

impl ServerContext {
    /// Builds the context. `cycles` must be the ones the logic pool will
    /// publish to.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        config_path: Option<PathBuf>,
        logic: Arc<dyn GameLogic>,
        cycles: Arc<WorkerCycles>,
        clients: ClientStore,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            config.network.max_connections,
            config.connection_limits(),
        ));
        Self {
            tunables: RwLock::new(config.tunables()),
            config,
            config_path,
            registry,
            queue: Arc::new(JobQueue::new()),
            world: World::new(Arc::clone(&cycles)),
            bans: BanList::new(),
            clients,
            logic,
            commands: CommandTable::standard(),
            closed_connections: DeferredRelease::new(cycles),
            pending_records: Mutex::new(Vec::new()),
            save_requested: AtomicBool::new(false),
            reload_requested: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
            save_sequence: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Configuration the server started with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// File hot reload re-reads, if any.
    #[must_use]
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Current hot-reloadable settings.
    #[must_use]
    pub fn tunables(&self) -> Tunables {
        *self.tunables.read()
    }

    /// Replaces the hot-reloadable settings.
    pub fn set_tunables(&self, tunables: Tunables) {
        *self.tunables.write() = tunables;
    }

    /// Live connections.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The logic pool's queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Critters and maps.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Active bans.
    #[must_use]
    pub fn bans(&self) -> &BanList {
        &self.bans
    }

    /// Client record directory.
    #[must_use]
    pub fn clients(&self) -> &ClientStore {
        &self.clients
    }

    /// The game logic collaborator.
    #[must_use]
    pub fn logic(&self) -> &Arc<dyn GameLogic> {
        &self.logic
    }

    /// Administrative command table.
    #[must_use]
    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Time since the context was built.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Pushes the recurring tick job for one entity.
    pub fn schedule_entity(&self, kind: EntityKind, id: u64) {
        self.queue.push_back(Job::recurring(kind.job_kind(), id));
    }

    /// Unregisters a shut-down connection, keeps its save record and
    /// retires the handle. Does nothing if it was already unregistered.
    pub fn release_connection(&self, connection: &Arc<Connection>) {
        if self.registry.remove(connection.id()).is_none() {
            return;
        }
        let record = self.logic.client_record(&connection.session());
        if let Some(record) = record {
            self.pending_records.lock().push(record);
        }
        let stats = connection.stats();
        tracing::info!(
            connection = %connection.id(),
            peer = %connection.peer(),
            bytes_in = stats.bytes_in,
            bytes_out = stats.bytes_out,
            "connection closed"
        );
        self.closed_connections.retire(Arc::clone(connection));
    }

    /// Drops retired connections and entities no worker can still reach.
    ///
    /// Returns `(connections, entities)` reclaimed.
    pub fn reclaim(&self) -> (usize, usize) {
        (self.closed_connections.reclaim_eligible(), self.world.reclaim())
    }

    /// Drops everything retired. Only correct once the workers stopped.
    pub fn release_all(&self) {
        let connections = self.closed_connections.drain_all().len();
        let entities = self.world.release_all();
        tracing::debug!(connections, entities, "released retired handles");
    }

    /// Records of clients that left since the last save.
    #[must_use]
    pub fn pending_records(&self) -> usize {
        self.pending_records.lock().len()
    }

    /// Asks the control loop for a save on its next tick.
    pub fn request_save(&self) {
        self.save_requested.store(true, Ordering::Release);
    }

    /// Clears and returns the save request.
    pub fn take_save_request(&self) -> bool {
        self.save_requested.swap(false, Ordering::AcqRel)
    }

    /// Asks the control loop for a hot reload on its next tick.
    pub fn request_reload(&self) {
        self.reload_requested.store(true, Ordering::Release);
    }

    /// Clears and returns the reload request.
    pub fn take_reload_request(&self) -> bool {
        self.reload_requested.swap(false, Ordering::AcqRel)
    }

    /// Asks the control loop to stop.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// The stop flag, for signal handlers.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Sequence number of the last save taken or loaded.
    #[must_use]
    pub fn save_sequence(&self) -> u64 {
        self.save_sequence.load(Ordering::Acquire)
    }

    /// Allocates the next save sequence number.
    pub fn next_save_sequence(&self) -> u64 {
        self.save_sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Copies every piece of saved state into `batch`.
    ///
    /// Must run while no job is executing: under the barrier, or after the
    /// pool stopped.
    pub fn collect_snapshot(&self, batch: &mut SaveBatch) {
        let info = batch.section_mut(SectionKind::GenericInfo);
        info.write_u32(GENERIC_INFO_VERSION);
        info.write_u64(unix_now());
        self.bans.save(info);

        let maps = self
            .world
            .save_section(EntityKind::Map, batch.section_mut(SectionKind::Locations));
        let critters = self
            .world
            .save_section(EntityKind::Critter, batch.section_mut(SectionKind::Critters));
        self.logic.save_sections(batch);

        // Records of clients that left go first, so an online session with
        // the same name overwrites them.
        for record in std::mem::take(&mut *self.pending_records.lock()) {
            batch.add_client(record);
        }
        for connection in self.registry.snapshot() {
            let Some(session) = connection.try_session() else {
                tracing::warn!(connection = %connection.id(), "session locked during save, record skipped");
                continue;
            };
            if let Some(record) = self.logic.client_record(&session) {
                batch.add_client(record);
            }
        }
        tracing::debug!(maps, critters, clients = batch.clients().len(), "snapshot collected");
    }

    /// Restores state from a loaded world file.
    ///
    /// # Errors
    ///
    /// Fails on a section that does not decode.
    pub fn restore(&self, loaded: &LoadedWorld) -> ServerResult<()> {
        let info = loaded.section(SectionKind::GenericInfo);
        if !info.is_empty() {
            let mut reader = MessageReader::new(info);
            let version = reader.read_u32();
            if version != Some(GENERIC_INFO_VERSION) {
                return Err(ServerError::CorruptSection {
                    section: "generic info",
                    reason: format!("layout version {version:?}"),
                });
            }
            let saved_at = reader.read_u64().unwrap_or_default();
            let bans = self.bans.load(&mut reader)?;
            tracing::debug!(saved_at, bans, "generic info restored");
        }

        let maps = self
            .world
            .load_section(EntityKind::Map, loaded.section(SectionKind::Locations))?;
        let critters = self
            .world
            .load_section(EntityKind::Critter, loaded.section(SectionKind::Critters))?;
        self.logic.load_sections(loaded)?;
        self.save_sequence.store(loaded.sequence, Ordering::Release);
        tracing::info!(sequence = loaded.sequence, maps, critters, "world restored");
        Ok(())
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("connections", &self.registry.len())
            .field("world", &self.world)
            .field("bans", &self.bans.len())
            .field("queue", &self.queue)
            .field("save_sequence", &self.save_sequence())
            .finish_non_exhaustive()
    }
}
