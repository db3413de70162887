//! # Connections
//!
//! ```text
//!   Acceptor ──register──> ConnectionRegistry ──Arc<Connection>──> Client job
//!       │                                             ▲
//!       └──attach──> IoBackend ──receive / take_outgoing┘
//! ```
//!
//! A connection leaves the registry only from its own `Client` job, once
//! [`Connection::is_shut_down`] holds. Release is deferred after that.

mod acceptor;
mod buffer;
mod connection;
mod registry;

pub use acceptor::{AcceptHooks, Acceptor};
pub use buffer::NetBuffer;
pub use connection::{
    Connection, ConnectionId, ConnectionLimits, ConnectionState, ConnectionStats, Session,
};
pub use registry::ConnectionRegistry;
