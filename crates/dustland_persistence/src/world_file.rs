//! # World Save File
//!
//! ```text
//! ┌──────────────┬──────────────┐
//! │ u32 version  │ u64 sequence │
//! ├──────┬───────┴──┬───────────┼──────────────┐
//! │ u8 k │ u32 len  │ u32 crc32 │ blob (len)   │  x 6, kinds 0..=5 in order
//! ├──────┴──────────┴───────────┴──────────────┘
//! │ u32 version  │  repeated, truncation check
//! └──────────────┘
//! ```
//!
//! Section blobs are opaque here. Only the game logic knows their layout.

use std::io::{self, Write};

use crate::error::{PersistenceError, PersistenceResult};
use crate::save_buffer::SaveBuffer;

/// Version tag at both ends of a world file.
pub const WORLD_VERSION: u32 = 0x01AB_0F12;

/// World file sections, in file order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SectionKind {
    /// Server-wide info, ban list.
    GenericInfo = 0,
    /// Locations and maps.
    Locations = 1,
    /// Critters.
    Critters = 2,
    /// Items.
    Items = 3,
    /// Global variables.
    Variables = 4,
    /// Pending time events.
    TimeEvents = 5,
}

impl SectionKind {
    /// Number of sections.
    pub const COUNT: usize = 6;

    /// Every section in file order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::GenericInfo,
        Self::Locations,
        Self::Critters,
        Self::Items,
        Self::Variables,
        Self::TimeEvents,
    ];

    /// Position in [`ALL`](Self::ALL).
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Section contents keyed by [`SectionKind`].
pub type Sections = [SaveBuffer; SectionKind::COUNT];

/// A world file read back from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedWorld {
    /// Save sequence number.
    pub sequence: u64,
    /// Section blobs in file order.
    pub sections: [Vec<u8>; SectionKind::COUNT],
}

impl LoadedWorld {
    /// The blob of one section.
    #[must_use]
    pub fn section(&self, kind: SectionKind) -> &[u8] {
        &self.sections[kind.index()]
    }
}

/// Writes a complete world file.
///
/// # Errors
///
/// Propagates write errors. A section above 4 GiB is rejected as
/// `InvalidInput` before anything of it is written.
pub fn write_world(out: &mut impl Write, sequence: u64, sections: &Sections) -> io::Result<()> {
    out.write_all(&WORLD_VERSION.to_le_bytes())?;
    out.write_all(&sequence.to_le_bytes())?;
    for kind in SectionKind::ALL {
        let section = &sections[kind.index()];
        let len = u32::try_from(section.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                PersistenceError::SectionTooLarge {
                    kind: kind as u8,
                    len: section.len(),
                },
            )
        })?;
        out.write_all(&[kind as u8])?;
        out.write_all(&len.to_le_bytes())?;
        out.write_all(&section.crc32().to_le_bytes())?;
        section.write_to(out)?;
    }
    out.write_all(&WORLD_VERSION.to_le_bytes())
}

/// Parses and validates a complete world file.
///
/// # Errors
///
/// Returns an error for a wrong version tag, missing or reordered sections,
/// a checksum mismatch, a missing trailer, or trailing garbage.
pub fn read_world(bytes: &[u8]) -> PersistenceResult<LoadedWorld> {
    let mut cursor = Cursor { bytes, pos: 0 };

    let version = cursor.u32("version tag")?;
    if version != WORLD_VERSION {
        return Err(PersistenceError::BadVersion {
            expected: WORLD_VERSION,
            found: version,
        });
    }
    let sequence = cursor.u64("sequence")?;

    let mut sections: [Vec<u8>; SectionKind::COUNT] = Default::default();
    for kind in SectionKind::ALL {
        let found = cursor.take(1, "section kind")?[0];
        if found != kind as u8 {
            return Err(PersistenceError::SectionOrder {
                expected: kind as u8,
                found,
            });
        }
        let len = cursor.u32("section length")? as usize;
        let crc = cursor.u32("section checksum")?;
        let blob = cursor.take(len, "section blob")?;
        if crc32fast::hash(blob) != crc {
            return Err(PersistenceError::Checksum(found));
        }
        sections[kind.index()] = blob.to_vec();
    }

    match cursor.u32("trailer") {
        Ok(WORLD_VERSION) if cursor.pos == bytes.len() => Ok(LoadedWorld { sequence, sections }),
        _ => Err(PersistenceError::Trailer),
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, what: &'static str) -> PersistenceResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(PersistenceError::Truncated(what))?;
        let slice = self.bytes.get(self.pos..end).ok_or(PersistenceError::Truncated(what))?;
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self, what: &'static str) -> PersistenceResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4, what)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self, what: &'static str) -> PersistenceResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8, what)?);
        Ok(u64::from_le_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sections {
        let mut sections: Sections = Default::default();
        for kind in SectionKind::ALL {
            let fill = vec![kind as u8 + 1; 10 * (kind.index() + 1)];
            sections[kind.index()].write_bytes(&fill);
        }
        sections
    }

    fn encoded(sequence: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_world(&mut out, sequence, &sample()).unwrap();
        out
    }

    #[test]
    fn test_write_then_read() {
        let world = read_world(&encoded(42)).unwrap();
        assert_eq!(world.sequence, 42);
        assert_eq!(world.section(SectionKind::Items), vec![4u8; 40].as_slice());
        assert_eq!(world.section(SectionKind::GenericInfo).len(), 10);
    }

    #[test]
    fn test_trailer_repeats_version() {
        let bytes = encoded(1);
        assert_eq!(&bytes[..4], &bytes[bytes.len() - 4..]);
    }

    #[test]
    fn test_every_truncation_is_rejected() {
        let bytes = encoded(7);
        for cut in 0..bytes.len() {
            assert!(read_world(&bytes[..cut]).is_err(), "cut at {cut} accepted");
        }
    }

    #[test]
    fn test_flipped_blob_byte_fails_checksum() {
        let mut bytes = encoded(7);
        // First blob starts after the header and one section header.
        bytes[12 + 9] ^= 0xFF;
        assert!(matches!(read_world(&bytes), Err(PersistenceError::Checksum(0))));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut bytes = encoded(7);
        bytes[0] ^= 1;
        assert!(matches!(read_world(&bytes), Err(PersistenceError::BadVersion { .. })));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut bytes = encoded(7);
        bytes.push(0);
        assert!(matches!(read_world(&bytes), Err(PersistenceError::Trailer)));
    }
}
