//! # Outbound Compression
//!
//! When a connection has compression enabled, every chunk the I/O worker
//! submits is wrapped as
//!
//! ```text
//!  ┌──────────────┬──────────────────────────────────────┐
//!  │ u32 LE  len  │ lz4 block (u32 LE raw size + data)   │
//!  └──────────────┴──────────────────────────────────────┘
//! ```
//!
//! Chunks are independent, so a reader can decode them as they arrive.

use crate::error::{NetError, NetResult};

/// Bytes in the frame length prefix.
const FRAME_PREFIX: usize = 4;

/// Compresses one outbound chunk into a self-delimiting frame.
///
/// # Panics
///
/// Panics if the compressed chunk is longer than `u32::MAX` bytes.
#[must_use]
pub fn compress_chunk(chunk: &[u8]) -> Vec<u8> {
    let block = lz4_flex::compress_prepend_size(chunk);
    let len = u32::try_from(block.len()).expect("compressed chunk longer than u32::MAX");
    let mut frame = Vec::with_capacity(FRAME_PREFIX + block.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&block);
    frame
}

/// Reassembles a compressed byte stream into the original bytes.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes read from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Decodes the next complete chunk, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame does not hold a valid lz4 block.
    pub fn next_chunk(&mut self) -> NetResult<Option<Vec<u8>>> {
        let Some(prefix) = self.pending.get(..FRAME_PREFIX) else {
            return Ok(None);
        };
        let mut len_bytes = [0u8; FRAME_PREFIX];
        len_bytes.copy_from_slice(prefix);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if self.pending.len() < FRAME_PREFIX + len {
            return Ok(None);
        }

        let block: Vec<u8> = self.pending.drain(..FRAME_PREFIX + len).skip(FRAME_PREFIX).collect();
        lz4_flex::decompress_size_prepended(&block)
            .map(Some)
            .map_err(|e| NetError::Decompress(e.to_string()))
    }
}
