//! # World Save Pipeline
//!
//! **Disk I/O off the barrier.**
//!
//! ```text
//!   control loop                           "world-save" thread
//!   ────────────                           ───────────────────
//!   acquire_batch()  <── spare ──┐
//!   [barrier held: fill batch]   │
//!   submit(batch) ──> queued ────┼──> write world file + client records
//!                                │    clear batch
//!                                └─── spare <──┘
//! ```
//!
//! Two batches exist. One can be filled while the other is written, so
//! `acquire_batch` only blocks when one is queued and the other is on disk.
//!
//! State: `Idle -> Signalled -> Writing -> Idle`.
//!
//! A client record that fails to write is held and written again with the
//! next batch, unless that batch carries a newer record for the same name.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::client_record::{ClientRecord, ClientStore};
use crate::error::{PersistenceError, PersistenceResult};
use crate::save_buffer::SaveBuffer;
use crate::store::WorldStore;
use crate::world_file::{SectionKind, Sections};

const BATCH_COUNT: usize = 2;

/// Everything one save writes.
#[derive(Debug, Default)]
pub struct SaveBatch {
    /// Save sequence number, picks the slot.
    pub sequence: u64,
    sections: Sections,
    clients: Vec<ClientRecord>,
}

impl SaveBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer for one world section.
    pub fn section_mut(&mut self, kind: SectionKind) -> &mut SaveBuffer {
        &mut self.sections[kind.index()]
    }

    /// Contents of one world section.
    #[must_use]
    pub fn section(&self, kind: SectionKind) -> &SaveBuffer {
        &self.sections[kind.index()]
    }

    /// Queues a client record for writing with this batch.
    pub fn add_client(&mut self, record: ClientRecord) {
        self.clients.push(record);
    }

    /// Client records in this batch.
    #[must_use]
    pub fn clients(&self) -> &[ClientRecord] {
        &self.clients
    }

    /// Bytes held across all sections.
    #[must_use]
    pub fn world_bytes(&self) -> usize {
        self.sections.iter().map(SaveBuffer::len).sum()
    }

    /// Empties the batch, keeping section chunks for reuse.
    pub fn clear(&mut self) {
        self.sequence = 0;
        for section in &mut self.sections {
            section.clear();
        }
        self.clients.clear();
    }
}

/// Where the pipeline is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing queued or being written.
    Idle,
    /// A batch is queued, the writer has not picked it up.
    Signalled,
    /// The writer is on disk.
    Writing,
}

/// Pipeline counters.
#[derive(Clone, Debug, Default)]
pub struct PipelineStats {
    /// Saves fully written.
    pub saves_completed: u64,
    /// Saves that failed. The previous snapshot stayed valid.
    pub saves_failed: u64,
    /// Client records written.
    pub clients_written: u64,
    /// Client record writes that failed, retries included.
    pub clients_failed: u64,
    /// Bytes written across all world files.
    pub bytes_written: u64,
    /// Sequence of the last successful save.
    pub last_sequence: Option<u64>,
    /// Wall time of the last save.
    pub last_duration: Duration,
}

struct Slots {
    spare: Vec<SaveBatch>,
    queued: VecDeque<SaveBatch>,
    state: PipelineState,
    closed: bool,
}

struct Shared {
    slots: Mutex<Slots>,
    changed: Condvar,
    stats: Mutex<PipelineStats>,
    held: Mutex<Vec<ClientRecord>>,
    world: WorldStore,
    clients: ClientStore,
}

/// Handle to the save thread.
pub struct SavePipeline {
    shared: Arc<Shared>,
    writer: Option<JoinHandle<()>>,
}

impl SavePipeline {
    /// Starts the writer thread.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn start(world: WorldStore, clients: ClientStore) -> PersistenceResult<Self> {
        let shared = Arc::new(Shared {
            slots: Mutex::new(Slots {
                spare: (0..BATCH_COUNT).map(|_| SaveBatch::new()).collect(),
                queued: VecDeque::new(),
                state: PipelineState::Idle,
                closed: false,
            }),
            changed: Condvar::new(),
            stats: Mutex::new(PipelineStats::default()),
            held: Mutex::new(Vec::new()),
            world,
            clients,
        });

        let writer_shared = Arc::clone(&shared);
        let writer = thread::Builder::new()
            .name("world-save".into())
            .spawn(move || writer_loop(&writer_shared))
            .map_err(|source| PersistenceError::Io {
                path: "world-save thread".into(),
                source,
            })?;

        Ok(Self {
            shared,
            writer: Some(writer),
        })
    }

    /// Takes an empty batch, waiting while both are busy.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::PipelineClosed`] after shutdown.
    pub fn acquire_batch(&self) -> PersistenceResult<SaveBatch> {
        let mut slots = self.shared.slots.lock();
        loop {
            if slots.closed {
                return Err(PersistenceError::PipelineClosed);
            }
            if let Some(batch) = slots.spare.pop() {
                return Ok(batch);
            }
            self.shared.changed.wait(&mut slots);
        }
    }

    /// Takes an empty batch if one is free.
    #[must_use]
    pub fn try_acquire_batch(&self) -> Option<SaveBatch> {
        let mut slots = self.shared.slots.lock();
        if slots.closed {
            return None;
        }
        slots.spare.pop()
    }

    /// Hands a filled batch to the writer.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::PipelineClosed`] after shutdown.
    pub fn submit(&self, batch: SaveBatch) -> PersistenceResult<()> {
        let mut slots = self.shared.slots.lock();
        if slots.closed {
            return Err(PersistenceError::PipelineClosed);
        }
        tracing::debug!(
            sequence = batch.sequence,
            world_bytes = batch.world_bytes(),
            clients = batch.clients.len(),
            "save submitted"
        );
        slots.queued.push_back(batch);
        if slots.state == PipelineState::Idle {
            slots.state = PipelineState::Signalled;
        }
        drop(slots);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Returns a batch unused, for example when collection was abandoned.
    pub fn release_batch(&self, mut batch: SaveBatch) {
        batch.clear();
        self.shared.slots.lock().spare.push(batch);
        self.shared.changed.notify_all();
    }

    /// Writes a batch on the calling thread and returns it to the spare slot.
    ///
    /// Used for the final save at shutdown, after [`wait_idle`](Self::wait_idle).
    ///
    /// # Errors
    ///
    /// Returns the world file error, or [`PersistenceError::ClientRecords`]
    /// if only client records failed. The batch is returned either way.
    pub fn write_now(&self, mut batch: SaveBatch) -> PersistenceResult<()> {
        let result = write_batch(&self.shared, &batch);
        batch.clear();
        self.shared.slots.lock().spare.push(batch);
        self.shared.changed.notify_all();
        result
    }

    /// Blocks until nothing is queued or being written.
    pub fn wait_idle(&self) {
        let mut slots = self.shared.slots.lock();
        while !(slots.queued.is_empty() && slots.state == PipelineState::Idle) {
            self.shared.changed.wait(&mut slots);
        }
    }

    /// Client records waiting for a retry after a failed write.
    #[must_use]
    pub fn held_clients(&self) -> usize {
        self.shared.held.lock().len()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.shared.slots.lock().state
    }

    /// Counters snapshot.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.shared.stats.lock().clone()
    }

    /// Store the world files go to.
    #[must_use]
    pub fn world_store(&self) -> &WorldStore {
        &self.shared.world
    }

    /// Store the client records go to.
    #[must_use]
    pub fn client_store(&self) -> &ClientStore {
        &self.shared.clients
    }

    /// Writes whatever is queued, then stops the thread.
    pub fn shutdown(&mut self) {
        self.shared.slots.lock().closed = true;
        self.shared.changed.notify_all();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                tracing::error!("world-save thread panicked");
            }
            for record in self.shared.held.lock().drain(..) {
                tracing::error!(account = %record.name, "client record never saved");
            }
            tracing::info!("save pipeline stopped");
        }
    }
}

impl Drop for SavePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn writer_loop(shared: &Shared) {
    let mut slots = shared.slots.lock();
    loop {
        let Some(batch) = slots.queued.pop_front() else {
            if slots.closed {
                return;
            }
            shared.changed.wait(&mut slots);
            continue;
        };
        slots.state = PipelineState::Writing;
        drop(slots);

        let mut batch = batch;
        // Failures are logged and counted inside. Held records go out with the next batch.
        let _ = write_batch(shared, &batch);
        batch.clear();

        slots = shared.slots.lock();
        slots.spare.push(batch);
        slots.state = if slots.queued.is_empty() {
            PipelineState::Idle
        } else {
            PipelineState::Signalled
        };
        shared.changed.notify_all();
    }
}

fn write_batch(shared: &Shared, batch: &SaveBatch) -> PersistenceResult<()> {
    let started = Instant::now();
    let mut held = std::mem::take(&mut *shared.held.lock());
    held.retain(|old| batch.clients.iter().all(|newer| newer.name != old.name));
    tracing::info!(
        sequence = batch.sequence,
        clients = batch.clients.len(),
        retried = held.len(),
        "world save started"
    );

    let world = shared.world.write(batch.sequence, &batch.sections);

    let mut clients_written = 0u64;
    let mut failed = 0usize;
    let mut kept = Vec::new();
    for record in held.iter().chain(&batch.clients) {
        match shared.clients.write(record) {
            Ok(()) => clients_written += 1,
            Err(e @ PersistenceError::InvalidName(_)) => {
                failed += 1;
                tracing::error!(account = %record.name, error = %e, "client record dropped");
            }
            Err(e) => {
                failed += 1;
                tracing::error!(account = %record.name, error = %e, "client record save failed, kept for retry");
                kept.push(record.clone());
            }
        }
    }
    let retained = kept.len();
    shared.held.lock().extend(kept);

    let elapsed = started.elapsed();
    let mut stats = shared.stats.lock();
    stats.clients_written += clients_written;
    stats.clients_failed += failed as u64;
    stats.last_duration = elapsed;
    let bytes = match world {
        Ok(bytes) => bytes,
        Err(e) => {
            stats.saves_failed += 1;
            drop(stats);
            tracing::error!(sequence = batch.sequence, error = %e, "world save failed, previous snapshot kept");
            return Err(e);
        }
    };
    stats.bytes_written += bytes;
    stats.last_sequence = Some(batch.sequence);
    if failed > 0 {
        stats.saves_failed += 1;
        drop(stats);
        tracing::error!(
            sequence = batch.sequence,
            failed,
            retained,
            "world file written, client records failed"
        );
        return Err(PersistenceError::ClientRecords { failed, retained });
    }
    stats.saves_completed += 1;
    drop(stats);
    tracing::info!(
        sequence = batch.sequence,
        bytes,
        clients = clients_written,
        elapsed_ms = elapsed.as_millis() as u64,
        "world save finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("dustland_pipeline_{tag}_{id}"))
    }

    fn pipeline(dir: &PathBuf) -> SavePipeline {
        let world = WorldStore::open(dir.join("world"), 4).unwrap();
        let clients = ClientStore::open(dir.join("clients")).unwrap();
        SavePipeline::start(world, clients).unwrap()
    }

    #[test]
    fn test_submit_writes_and_recycles() {
        let dir = temp_dir("recycle");
        let mut pipeline = pipeline(&dir);

        let mut batch = pipeline.acquire_batch().unwrap();
        batch.sequence = 1;
        batch.section_mut(SectionKind::Variables).write_bytes(b"gold=5");
        batch.add_client(ClientRecord::new("Tycho", [3; 32]));
        pipeline.submit(batch).unwrap();
        pipeline.wait_idle();

        assert_eq!(pipeline.state(), PipelineState::Idle);
        let stats = pipeline.stats();
        assert_eq!(stats.saves_completed, 1);
        assert_eq!(stats.clients_written, 1);
        assert_eq!(stats.last_sequence, Some(1));

        let loaded = pipeline.world_store().load_latest().unwrap();
        assert_eq!(loaded.section(SectionKind::Variables), b"gold=5");
        assert!(pipeline.client_store().exists("Tycho"));

        // Both batches are free again and come back empty.
        let a = pipeline.acquire_batch().unwrap();
        let b = pipeline.try_acquire_batch().unwrap();
        assert_eq!(a.world_bytes() + b.world_bytes(), 0);
        assert!(pipeline.try_acquire_batch().is_none());
        pipeline.release_batch(a);
        pipeline.release_batch(b);

        pipeline.shutdown();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let dir = temp_dir("drain");
        let mut pipeline = pipeline(&dir);
        for sequence in 1..=2 {
            let mut batch = pipeline.acquire_batch().unwrap();
            batch.sequence = sequence;
            pipeline.submit(batch).unwrap();
        }
        pipeline.shutdown();
        assert_eq!(pipeline.stats().saves_completed, 2);
        assert!(matches!(pipeline.acquire_batch(), Err(PersistenceError::PipelineClosed)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_write_now_reports_failure() {
        let dir = temp_dir("now");
        let pipeline = pipeline(&dir);
        let mut batch = pipeline.acquire_batch().unwrap();
        batch.sequence = 9;
        std::fs::create_dir(pipeline.world_store().slot_path(9).with_extension("sav.tmp")).unwrap();
        assert!(pipeline.write_now(batch).is_err());
        assert_eq!(pipeline.stats().saves_failed, 1);
        assert!(pipeline.try_acquire_batch().is_some());
        drop(pipeline);
        std::fs::remove_dir_all(&dir).ok();
    }
}
