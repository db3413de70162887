//! # Wire Protocol
//!
//! Length-prefixed little-endian messages, decoded only by logic workers.
//!
//! ## Opcodes
//!
//! ```text
//!  31            17 16      8 7      0
//!  ┌───────────────┬─────────┬────────┐
//!  │    0x5EAD     │    n    │  0xAA  │
//!  └───────────────┴─────────┴────────┘
//! ```
//!
//! The I/O layer never looks inside a message. It moves bytes, enforces the
//! flood limit and compresses outbound chunks.

mod command;
mod compression;
mod frame;
mod serialization;

pub use command::{AdminCommand, CommandId, GameTime, PassHash, PASS_HASH_SIZE};
pub use compression::{compress_chunk, ChunkDecoder};
pub use frame::{decode_frame, encode_message, Frame, HEADER_SIZE};
pub use serialization::{MessageReader, MessageWriter};

/// Builds a regular opcode from its message number.
#[inline]
#[must_use]
pub const fn make_opcode(n: u32) -> u32 {
    (0x5EAD << 17) | ((n & 0xFF) << 8) | 0xAA
}

/// Round-trip ping. Payload is one `u8` ping kind, echoed back.
pub const PING: u32 = make_opcode(5);

/// Administrative command. Payload starts with a [`CommandId`].
pub const SEND_COMMAND: u32 = make_opcode(21);

/// Server text addressed to one client. Payload is one string.
pub const SEND_TEXT: u32 = make_opcode(31);

/// Server browser query. No length field follows.
pub const PING_INFO: u32 = 0xFFFF_FFFF;

/// Builds the answer to a [`PING_INFO`] query.
///
/// Four `u32`: online count, uptime in seconds, then two reserved zeros.
#[must_use]
pub fn ping_info_answer(online: u32, uptime_secs: u32) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&online.to_le_bytes());
    out[4..8].copy_from_slice(&uptime_secs.to_le_bytes());
    out
}

/// Builds a `PING` message echoing `kind`.
#[must_use]
pub fn ping_message(kind: u8) -> Vec<u8> {
    let mut w = MessageWriter::new(PING);
    w.write_u8(kind);
    w.finish()
}

/// Builds a `SEND_TEXT` message carrying `text`.
#[must_use]
pub fn text_message(text: &str) -> Vec<u8> {
    let mut w = MessageWriter::new(SEND_TEXT);
    w.write_str(text);
    w.finish()
}
