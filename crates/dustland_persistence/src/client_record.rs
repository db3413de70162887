//! # Client Save Records
//!
//! One file per account, `<name>.client`:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ RecordHeader (52 bytes, POD)                 │
//! │   "DLCR" │ version │ pass hash[32]           │
//! │   state len │ extended len │ time events     │
//! ├──────────────────────────────────────────────┤
//! │ state blob                                   │
//! │ extended blob                                │
//! │ time events: { u32 id, u64 fire_at, u32 h }  │
//! └──────────────────────────────────────────────┘
//! ```

use std::fs;
use std::io::Write;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};

use crate::error::{io_at, PersistenceError, PersistenceResult};

/// Record signature.
pub const RECORD_SIGNATURE: [u8; 4] = *b"DLCR";

/// Record format this build writes.
pub const RECORD_VERSION: u32 = 1;

/// Record file extension.
pub const RECORD_EXTENSION: &str = "client";

/// Extension given to records of deleted accounts.
pub const DELETED_EXTENSION: &str = "client_deleted";

const TIME_EVENT_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct RecordHeader {
    signature: [u8; 4],
    version: u32,
    pass_hash: [u8; 32],
    state_len: u32,
    extended_len: u32,
    time_event_count: u32,
}

/// A scheduled event owned by a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeEvent {
    /// Event id.
    pub id: u32,
    /// Game time at which it fires.
    pub fire_at: u64,
    /// Handler to invoke.
    pub handler: u32,
}

/// Everything saved for one account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientRecord {
    /// Account name, also the file stem.
    pub name: String,
    /// Password hash.
    pub pass_hash: [u8; 32],
    /// Serialized critter state.
    pub state: Vec<u8>,
    /// Extended state.
    pub extended: Vec<u8>,
    /// Pending time events.
    pub time_events: Vec<TimeEvent>,
}

impl ClientRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new(name: impl Into<String>, pass_hash: [u8; 32]) -> Self {
        Self {
            name: name.into(),
            pass_hash,
            state: Vec::new(),
            extended: Vec::new(),
            time_events: Vec::new(),
        }
    }

    /// Serializes the record.
    ///
    /// # Errors
    ///
    /// Fails if a blob or the event list does not fit its u32 length field.
    pub fn encode(&self) -> PersistenceResult<Vec<u8>> {
        let too_large = |len: usize| PersistenceError::SectionTooLarge { kind: u8::MAX, len };
        let header = RecordHeader {
            signature: RECORD_SIGNATURE,
            version: RECORD_VERSION,
            pass_hash: self.pass_hash,
            state_len: u32::try_from(self.state.len()).map_err(|_| too_large(self.state.len()))?,
            extended_len: u32::try_from(self.extended.len())
                .map_err(|_| too_large(self.extended.len()))?,
            time_event_count: u32::try_from(self.time_events.len())
                .map_err(|_| too_large(self.time_events.len()))?,
        };

        let mut out = Vec::with_capacity(
            size_of::<RecordHeader>()
                + self.state.len()
                + self.extended.len()
                + self.time_events.len() * TIME_EVENT_SIZE,
        );
        out.extend_from_slice(bytemuck::bytes_of(&header));
        out.extend_from_slice(&self.state);
        out.extend_from_slice(&self.extended);
        for event in &self.time_events {
            out.extend_from_slice(&event.id.to_le_bytes());
            out.extend_from_slice(&event.fire_at.to_le_bytes());
            out.extend_from_slice(&event.handler.to_le_bytes());
        }
        Ok(out)
    }

    /// Parses a record read from `<name>.client`.
    ///
    /// # Errors
    ///
    /// Fails on a wrong signature, an unknown version, or a short file.
    pub fn decode(name: impl Into<String>, bytes: &[u8]) -> PersistenceResult<Self> {
        let header_bytes = bytes
            .get(..size_of::<RecordHeader>())
            .ok_or(PersistenceError::Truncated("client record header"))?;
        let header: RecordHeader = bytemuck::pod_read_unaligned(header_bytes);
        if header.signature != RECORD_SIGNATURE {
            return Err(PersistenceError::BadSignature);
        }
        if header.version != RECORD_VERSION {
            return Err(PersistenceError::UnsupportedRecord(header.version));
        }

        let mut rest = &bytes[size_of::<RecordHeader>()..];
        let state = split_off(&mut rest, header.state_len as usize, "client state")?.to_vec();
        let extended =
            split_off(&mut rest, header.extended_len as usize, "client extended state")?.to_vec();
        let event_bytes = split_off(
            &mut rest,
            (header.time_event_count as usize).saturating_mul(TIME_EVENT_SIZE),
            "client time events",
        )?;
        let time_events = event_bytes
            .chunks_exact(TIME_EVENT_SIZE)
            .map(|raw| TimeEvent {
                id: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                fire_at: u64::from_le_bytes([
                    raw[4], raw[5], raw[6], raw[7], raw[8], raw[9], raw[10], raw[11],
                ]),
                handler: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
            })
            .collect();

        Ok(Self {
            name: name.into(),
            pass_hash: header.pass_hash,
            state,
            extended,
            time_events,
        })
    }
}

fn split_off<'a>(
    rest: &mut &'a [u8],
    len: usize,
    what: &'static str,
) -> PersistenceResult<&'a [u8]> {
    if rest.len() < len {
        return Err(PersistenceError::Truncated(what));
    }
    let (head, tail) = rest.split_at(len);
    *rest = tail;
    Ok(head)
}

/// Directory of client records.
#[derive(Clone, Debug)]
pub struct ClientStore {
    dir: PathBuf,
}

impl ClientStore {
    /// Opens `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_at(&dir))?;
        Ok(Self { dir })
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `name`.
    ///
    /// # Errors
    ///
    /// Rejects names that are empty or would escape the directory.
    pub fn path_for(&self, name: &str) -> PersistenceResult<PathBuf> {
        let valid = !name.is_empty()
            && name.len() <= 64
            && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' '));
        if !valid {
            return Err(PersistenceError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.{RECORD_EXTENSION}")))
    }

    /// True if a record exists for `name`.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_ok_and(|path| path.is_file())
    }

    /// Writes a record through a temp file and rename.
    ///
    /// # Errors
    ///
    /// Fails on an invalid name or any I/O error. The previous record, if
    /// any, is left untouched on failure.
    pub fn write(&self, record: &ClientRecord) -> PersistenceResult<()> {
        let path = self.path_for(&record.name)?;
        let bytes = record.encode()?;
        write_atomically(&path, &bytes)
    }

    /// Reads the record for `name`.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing or malformed.
    pub fn read(&self, name: &str) -> PersistenceResult<ClientRecord> {
        let path = self.path_for(name)?;
        let bytes = fs::read(&path).map_err(io_at(&path))?;
        ClientRecord::decode(name, &bytes)
    }

    /// Moves the record aside as `<name>.client_deleted`, or
    /// `<name>.client_deleted~N` if that is taken. Returns the new path.
    ///
    /// # Errors
    ///
    /// Fails if the record does not exist or cannot be renamed.
    pub fn archive(&self, name: &str) -> PersistenceResult<PathBuf> {
        let path = self.path_for(name)?;
        let base = self.dir.join(format!("{name}.{DELETED_EXTENSION}"));
        let mut target = base.clone();
        let mut n = 0u32;
        while target.exists() {
            n += 1;
            let mut with_suffix = base.clone().into_os_string();
            with_suffix.push(format!("~{n}"));
            target = PathBuf::from(with_suffix);
        }
        fs::rename(&path, &target).map_err(io_at(&path))?;
        tracing::info!(account = name, archived = %target.display(), "client record archived");
        Ok(target)
    }
}

/// Writes `bytes` to `path` via `<path>.tmp`, synced, then renamed.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> PersistenceResult<()> {
    let mut temp = path.to_path_buf().into_os_string();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    let result = (|| {
        let mut file = fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&temp);
        return Err(PersistenceError::Io {
            path: temp,
            source: e,
        });
    }
    fs::rename(&temp, path).map_err(io_at(path))
}
