//! # Entity World
//!
//! Critters and maps, keyed by numeric id. Each entity keeps its state
//! behind its own lock; the registry lock is only held for lookups.
//!
//! Jobs carry ids, never handles. A tick job looks its entity up again every
//! cycle, so a removal is seen on the next run:
//!
//! ```text
//!   remove(id) ── mark destroyed ── unregister ── retire(handle)
//!                                                     │
//!   control loop: reclaim() ── every busy worker moved on ──> drop
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use dustland_core::{DeferredRelease, JobKind, WorkerCycles};
use dustland_persistence::{SaveBuffer, SectionKind};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::error::{ServerError, ServerResult};

/// Which registry an entity lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Player characters and NPCs.
    Critter,
    /// Maps and locations.
    Map,
}

impl EntityKind {
    /// The job kind that ticks entities of this kind.
    #[must_use]
    pub const fn job_kind(self) -> JobKind {
        match self {
            Self::Critter => JobKind::Critter,
            Self::Map => JobKind::Map,
        }
    }

    /// The world file section holding entities of this kind.
    #[must_use]
    pub const fn section(self) -> SectionKind {
        match self {
            Self::Critter => SectionKind::Critters,
            Self::Map => SectionKind::Locations,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Critter => "critters",
            Self::Map => "locations",
        }
    }
}

/// State of one entity. `data` belongs to the game logic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityRecord {
    /// Numeric id, unique per kind.
    pub id: u64,
    /// Registry the record belongs to.
    pub kind: EntityKind,
    /// Prototype the entity was created from.
    pub proto_id: u32,
    /// Ticks executed so far.
    pub ticks: u64,
    /// Opaque game state.
    pub data: Vec<u8>,
}

/// A registered entity.
#[derive(Debug)]
pub struct Entity {
    id: u64,
    kind: EntityKind,
    destroyed: AtomicBool,
    record: Mutex<EntityRecord>,
}

impl Entity {
    fn new(record: EntityRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            destroyed: AtomicBool::new(false),
            record: Mutex::new(record),
        }
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registry the entity lives in.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Whether the entity was removed. Its jobs drop themselves.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Locks the state.
    pub fn lock(&self) -> MutexGuard<'_, EntityRecord> {
        self.record.lock()
    }

    /// Locks the state unless another worker holds it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, EntityRecord>> {
        self.record.try_lock()
    }
}

/// Saved form of a record, followed by `data_len` bytes of data.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RecordHeader {
    id: u64,
    ticks: u64,
    proto_id: u32,
    data_len: u32,
}

const HEADER_LEN: usize = std::mem::size_of::<RecordHeader>();

type Registry = RwLock<HashMap<u64, Arc<Entity>>>;

/// Every critter and map.
pub struct World {
    critters: Registry,
    maps: Registry,
    next_id: AtomicU64,
    retired: DeferredRelease<Arc<Entity>>,
}

impl World {
    /// Creates an empty world whose removals wait on `cycles`.
    #[must_use]
    pub fn new(cycles: Arc<WorkerCycles>) -> Self {
        Self {
            critters: RwLock::new(HashMap::new()),
            maps: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            retired: DeferredRelease::new(cycles),
        }
    }

    fn registry(&self, kind: EntityKind) -> &Registry {
        match kind {
            EntityKind::Critter => &self.critters,
            EntityKind::Map => &self.maps,
        }
    }

    /// Creates an entity with a fresh id. The caller schedules its job.
    pub fn spawn(&self, kind: EntityKind, proto_id: u32, data: Vec<u8>) -> Arc<Entity> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.insert(EntityRecord {
            id,
            kind,
            proto_id,
            ticks: 0,
            data,
        })
    }

    /// Registers a record under its own id, replacing any previous entity.
    ///
    /// Id `u64::MAX` is stored but does not move the id counter.
    pub fn insert(&self, record: EntityRecord) -> Arc<Entity> {
        if let Some(next) = record.id.checked_add(1) {
            self.next_id.fetch_max(next, Ordering::Relaxed);
        }
        let kind = record.kind;
        let entity = Arc::new(Entity::new(record));
        let previous = self.registry(kind).write().insert(entity.id, Arc::clone(&entity));
        if let Some(previous) = previous {
            previous.destroyed.store(true, Ordering::Release);
            self.retired.retire(previous);
        }
        entity
    }

    /// Looks an entity up.
    #[must_use]
    pub fn get(&self, kind: EntityKind, id: u64) -> Option<Arc<Entity>> {
        self.registry(kind).read().get(&id).cloned()
    }

    /// Marks an entity destroyed, unregisters it and retires the handle.
    ///
    /// Returns false if no such entity was registered.
    pub fn remove(&self, kind: EntityKind, id: u64) -> bool {
        let Some(entity) = self.registry(kind).write().remove(&id) else {
            return false;
        };
        entity.destroyed.store(true, Ordering::Release);
        tracing::debug!(?kind, id, "entity removed");
        self.retired.retire(entity);
        true
    }

    /// Ids of every entity of `kind`, ascending.
    #[must_use]
    pub fn ids(&self, kind: EntityKind) -> Vec<u64> {
        let mut ids: Vec<u64> = self.registry(kind).read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of entities of `kind`.
    #[must_use]
    pub fn len(&self, kind: EntityKind) -> usize {
        self.registry(kind).read().len()
    }

    /// Whether no entity of either kind exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.critters.read().is_empty() && self.maps.read().is_empty()
    }

    /// Copies of every record of `kind`, ordered by id.
    #[must_use]
    pub fn snapshot(&self, kind: EntityKind) -> Vec<EntityRecord> {
        let entities: Vec<Arc<Entity>> = self.registry(kind).read().values().cloned().collect();
        let mut records: Vec<EntityRecord> = entities.iter().map(|e| e.lock().clone()).collect();
        records.sort_unstable_by_key(|r| r.id);
        records
    }

    /// Drops removed entities no worker can still reach.
    pub fn reclaim(&self) -> usize {
        self.retired.reclaim_eligible()
    }

    /// Removed entities not yet dropped.
    #[must_use]
    pub fn pending_release(&self) -> usize {
        self.retired.pending()
    }

    /// Drops every removed entity. Only correct once the workers stopped.
    pub fn release_all(&self) -> usize {
        self.retired.drain_all().len()
    }

    /// Serializes every entity of `kind` into `out`.
    ///
    /// Takes each entity's lock in turn, so call it while the workers are
    /// held. Returns the number of records written.
    pub fn save_section(&self, kind: EntityKind, out: &mut SaveBuffer) -> usize {
        let mut written = 0;
        for record in self.snapshot(kind) {
            let Ok(data_len) = u32::try_from(record.data.len()) else {
                tracing::error!(?kind, id = record.id, len = record.data.len(), "entity state too large to save");
                continue;
            };
            let header = RecordHeader {
                id: record.id,
                ticks: record.ticks,
                proto_id: record.proto_id,
                data_len,
            };
            out.write_bytes(bytemuck::bytes_of(&header));
            out.write_bytes(&record.data);
            written += 1;
        }
        written
    }

    /// Registers every record in a saved section of `kind`.
    ///
    /// # Errors
    ///
    /// Fails on a truncated record or one with id `u64::MAX`, which would
    /// leave no room for fresh ids. Records before it stay registered.
    pub fn load_section(&self, kind: EntityKind, mut bytes: &[u8]) -> ServerResult<usize> {
        let mut loaded = 0;
        while !bytes.is_empty() {
            if bytes.len() < HEADER_LEN {
                return Err(corrupt(kind, format!("{} trailing bytes", bytes.len())));
            }
            let header: RecordHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_LEN]);
            if header.id == u64::MAX {
                return Err(corrupt(kind, "record id out of range".to_string()));
            }
            bytes = &bytes[HEADER_LEN..];
            let data_len = header.data_len as usize;
            if bytes.len() < data_len {
                return Err(corrupt(kind, format!("record {} truncated", header.id)));
            }
            let (data, rest) = bytes.split_at(data_len);
            bytes = rest;
            self.insert(EntityRecord {
                id: header.id,
                kind,
                proto_id: header.proto_id,
                ticks: header.ticks,
                data: data.to_vec(),
            });
            loaded += 1;
        }
        Ok(loaded)
    }
}

fn corrupt(kind: EntityKind, reason: String) -> ServerError {
    ServerError::CorruptSection {
        section: kind.name(),
        reason,
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("critters", &self.len(EntityKind::Critter))
            .field("maps", &self.len(EntityKind::Map))
            .field("retired", &self.retired)
            .finish()
    }
}
