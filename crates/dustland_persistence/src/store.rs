//! # World Store
//!
//! Rotating autosave slots `world_0000.sav .. world_{slots-1}.sav`. Save
//! sequence `n` goes to slot `n % slots`, so older snapshots survive until
//! their slot comes round again.

use std::fs;
use std::path::{Path, PathBuf};

use crate::client_record::write_atomically;
use crate::error::{io_at, PersistenceResult};
use crate::world_file::{read_world, write_world, LoadedWorld, Sections};

/// Directory of rotating world save files.
#[derive(Clone, Debug)]
pub struct WorldStore {
    dir: PathBuf,
    slots: u32,
}

impl WorldStore {
    /// Opens `dir`, creating it if needed. `slots` is raised to at least 1.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>, slots: u32) -> PersistenceResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_at(&dir))?;
        Ok(Self {
            dir,
            slots: slots.max(1),
        })
    }

    /// Directory holding the saves.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of rotating slots.
    #[must_use]
    pub fn slots(&self) -> u32 {
        self.slots
    }

    /// File used by save `sequence`.
    #[must_use]
    pub fn slot_path(&self, sequence: u64) -> PathBuf {
        let slot = sequence % u64::from(self.slots);
        self.dir.join(format!("world_{slot:04}.sav"))
    }

    /// Writes save `sequence` into its slot. Returns bytes written.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error. The slot keeps its previous file in that case.
    pub fn write(&self, sequence: u64, sections: &Sections) -> PersistenceResult<u64> {
        let path = self.slot_path(sequence);
        let size: usize = 4 + 8 + 4 + sections.iter().map(|s| 9 + s.len()).sum::<usize>();
        let mut bytes = Vec::with_capacity(size);
        write_world(&mut bytes, sequence, sections).map_err(io_at(&path))?;
        write_atomically(&path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Loads the valid save with the highest sequence number.
    ///
    /// Unreadable or corrupt slots are skipped with a warning.
    #[must_use]
    pub fn load_latest(&self) -> Option<LoadedWorld> {
        let mut best: Option<LoadedWorld> = None;
        for slot in 0..u64::from(self.slots) {
            let path = self.slot_path(slot);
            if !path.is_file() {
                continue;
            }
            let loaded = fs::read(&path).map_err(io_at(&path)).and_then(|bytes| read_world(&bytes));
            match loaded {
                Ok(world) => {
                    if best.as_ref().map_or(true, |b| world.sequence > b.sequence) {
                        best = Some(world);
                    }
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping invalid world save"),
            }
        }
        best
    }
}
