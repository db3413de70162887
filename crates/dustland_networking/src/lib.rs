//! # Dustland Networking - The Wire
//!
//! TCP transport for the Dustland server. Bytes in, bytes out, nothing
//! interpreted on the I/O threads.
//!
//! ## Layers
//!
//! - **Protocol**: `[u32 opcode][u32 length][payload]` framing, the admin
//!   command sub-protocol, lz4 outbound chunks
//! - **Server**: connections with separately locked buffers, the registry,
//!   the acceptor thread
//! - **I/O**: one [`IoBackend`] trait, a tokio implementation and a polling
//!   implementation, picked at startup
//!
//! ## Threads
//!
//! ```text
//!   acceptor ──> registry ──> backend (tokio tasks | net-poll-N)
//!                                │
//!                      Connection in/out buffers
//!                                │
//!                       logic workers decode here
//! ```
//!
//! A slow or hostile peer can fill its own buffer up to the flood limit and
//! nothing else. Exceeding the limit disconnects it.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod io;
pub mod protocol;
pub mod server;

pub use error::{NetError, NetResult};
pub use io::{start_backend, IoBackend, IoSettings, NetBackendKind, PollBackend, TokioBackend};
pub use protocol::{
    decode_frame, AdminCommand, CommandId, Frame, MessageReader, MessageWriter, PING, PING_INFO,
    SEND_COMMAND, SEND_TEXT,
};
pub use server::{
    AcceptHooks, Acceptor, Connection, ConnectionId, ConnectionLimits, ConnectionRegistry,
    ConnectionState, ConnectionStats, Session,
};
