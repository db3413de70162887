//! # Save Buffer
//!
//! Append-only byte sequence made of fixed 64 KiB chunks. Filled while the
//! world is frozen, so appends never move existing bytes. Clearing keeps
//! the chunks for the next save.

use std::io::{self, Write};

/// Bytes per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunked append-only buffer.
#[derive(Debug, Default)]
pub struct SaveBuffer {
    chunks: Vec<Vec<u8>>,
    active: usize,
    len: usize,
}

impl SaveBuffer {
    /// Creates an empty buffer. No chunk is allocated until the first write.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes.
    pub fn write_bytes(&mut self, mut bytes: &[u8]) {
        self.len += bytes.len();
        while !bytes.is_empty() {
            if self.active == 0 || self.chunks[self.active - 1].len() == CHUNK_SIZE {
                if self.active == self.chunks.len() {
                    self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
                }
                self.active += 1;
            }
            let chunk = &mut self.chunks[self.active - 1];
            let take = (CHUNK_SIZE - chunk.len()).min(bytes.len());
            chunk.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
        }
    }

    /// Appends a little-endian u32.
    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Appends a little-endian u64.
    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if nothing was written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Chunks in use, in order.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks[..self.active].iter().map(Vec::as_slice)
    }

    /// Chunks allocated, including ones kept from earlier saves.
    #[must_use]
    pub fn allocated_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// CRC32 of the contents.
    #[must_use]
    pub fn crc32(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for chunk in self.chunks() {
            hasher.update(chunk);
        }
        hasher.finalize()
    }

    /// Writes the contents to `out`.
    ///
    /// # Errors
    ///
    /// Propagates write errors.
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        for chunk in self.chunks() {
            out.write_all(chunk)?;
        }
        Ok(())
    }

    /// Copies the contents into one vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Empties the buffer, keeping its chunks.
    pub fn clear(&mut self) {
        for chunk in &mut self.chunks[..self.active] {
            chunk.clear();
        }
        self.active = 0;
        self.len = 0;
    }
}
