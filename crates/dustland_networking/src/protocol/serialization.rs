//! # Message Serialization
//!
//! Little-endian readers and writers for message payloads.
//!
//! ## Encodings
//!
//! - Integers: fixed width, little-endian
//! - Strings: `u32` byte length, then UTF-8 bytes
//! - Hashes: raw bytes of a known size, no prefix

use super::frame::HEADER_SIZE;

/// Builds one framed message.
///
/// The header is reserved up front and the length is patched in by
/// [`finish`](Self::finish).
#[derive(Debug)]
pub struct MessageWriter {
    buffer: Vec<u8>,
}

impl MessageWriter {
    /// Starts a message with `opcode`.
    #[must_use]
    pub fn new(opcode: u32) -> Self {
        let mut buffer = Vec::with_capacity(64);
        buffer.extend_from_slice(&opcode.to_le_bytes());
        buffer.extend_from_slice(&0u32.to_le_bytes());
        Self { buffer }
    }

    /// Writes a byte.
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    /// Writes a u16.
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes a u32.
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes an i32.
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes a u64.
    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes a length-prefixed string.
    ///
    /// # Panics
    ///
    /// Panics if the string is longer than `u32::MAX` bytes.
    pub fn write_str(&mut self, value: &str) -> &mut Self {
        let len = u32::try_from(value.len()).expect("string longer than u32::MAX");
        self.write_u32(len);
        self.buffer.extend_from_slice(value.as_bytes());
        self
    }

    /// Writes raw bytes with no prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(value);
        self
    }

    /// Patches the length field and returns the framed bytes.
    ///
    /// # Panics
    ///
    /// Panics if the message is longer than `u32::MAX` bytes.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        let len = u32::try_from(self.buffer.len()).expect("message longer than u32::MAX");
        self.buffer[4..HEADER_SIZE].copy_from_slice(&len.to_le_bytes());
        self.buffer
    }
}

/// Reads a payload front to back. Every read returns `None` on underflow.
#[derive(Clone, Debug)]
pub struct MessageReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> MessageReader<'a> {
    /// Creates a reader over `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Bytes left to read.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Takes the next `len` bytes.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(len)?;
        let slice = self.buffer.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    /// Takes exactly `N` bytes.
    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.read_bytes(N)?.try_into().ok()
    }

    /// Reads a byte.
    #[inline]
    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_array::<1>().map(|[b]| b)
    }

    /// Reads a u16.
    #[inline]
    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Reads a u32.
    #[inline]
    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Reads an i32.
    #[inline]
    pub fn read_i32(&mut self) -> Option<i32> {
        self.read_array().map(i32::from_le_bytes)
    }

    /// Reads a u64.
    #[inline]
    pub fn read_u64(&mut self) -> Option<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Option<String> {
        let len = usize::try_from(self.read_u32()?).ok()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }
}
