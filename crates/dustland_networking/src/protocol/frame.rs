//! # Wire Framing
//!
//! ```text
//!  0        4        8
//!  ┌────────┬────────┬──────────────────────────┐
//!  │ opcode │ length │ payload (length - 8)     │
//!  └────────┴────────┴──────────────────────────┘
//!    u32 LE   u32 LE   opcode specific
//! ```
//!
//! `length` counts the whole message including the header. A partial
//! message stays in the in-buffer until the rest arrives.
//!
//! The one exception is [`PING_INFO`](super::PING_INFO): a bare `u32`
//! with no length field, sent by server browsers.

use super::PING_INFO;
use crate::error::{NetError, NetResult};

/// Bytes in a message header.
pub const HEADER_SIZE: usize = 8;

/// One decoded unit from the in-buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Server browser status query.
    PingInfo,
    /// A regular framed message.
    Message {
        /// Message opcode.
        opcode: u32,
        /// Bytes after the header.
        payload: &'a [u8],
    },
}

/// Decodes the frame at the start of `bytes`.
///
/// Returns the frame and the number of bytes it occupies, or `None` if the
/// buffer does not hold a complete frame yet.
///
/// # Errors
///
/// Returns an error if the declared length is shorter than the header or
/// longer than `max_len`. Either is fatal for the connection.
pub fn decode_frame(bytes: &[u8], max_len: usize) -> NetResult<Option<(Frame<'_>, usize)>> {
    let Some(opcode) = read_u32(bytes, 0) else {
        return Ok(None);
    };
    if opcode == PING_INFO {
        return Ok(Some((Frame::PingInfo, 4)));
    }

    let Some(length) = read_u32(bytes, 4) else {
        return Ok(None);
    };
    let total = length as usize;
    if total < HEADER_SIZE {
        return Err(NetError::MessageTooShort(length));
    }
    if total > max_len {
        return Err(NetError::MessageTooLong {
            length,
            limit: max_len,
        });
    }
    if bytes.len() < total {
        return Ok(None);
    }

    Ok(Some((Frame::Message { opcode, payload: &bytes[HEADER_SIZE..total] }, total)))
}

/// Appends one framed message to `out`.
///
/// # Panics
///
/// Panics if the message would be longer than `u32::MAX` bytes.
pub fn encode_message(opcode: u32, payload: &[u8], out: &mut Vec<u8>) {
    let total = u32::try_from(HEADER_SIZE + payload.len()).expect("message longer than u32::MAX");
    out.reserve(HEADER_SIZE + payload.len());
    out.extend_from_slice(&opcode.to_le_bytes());
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(payload);
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes.get(at..at + 4).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes)
}
