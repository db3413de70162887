//! # Network I/O Backends
//!
//! Moves bytes between sockets and connection buffers. Never decodes.
//!
//! ```text
//!   socket ──read──> Connection::receive ──> in-buffer   (flood checked)
//!   socket <─write── Connection::take_outgoing <── out-buffer (compressed)
//! ```
//!
//! Two interchangeable implementations, chosen at startup:
//!
//! | Backend | Model | Threads |
//! |---------|-------|---------|
//! | [`TokioBackend`] | completion (async tasks) | tokio runtime |
//! | [`PollBackend`] | event loop over nonblocking sockets | one per shard |

mod poll_backend;
mod tokio_backend;

pub use poll_backend::PollBackend;
pub use tokio_backend::TokioBackend;

use std::fmt;
use std::net::TcpStream;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{NetError, NetResult};
use crate::server::Connection;

/// Transport for attached connections.
pub trait IoBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Takes ownership of the socket and starts moving bytes for `connection`.
    ///
    /// # Errors
    ///
    /// Fails if the backend is shut down or the socket cannot be set up.
    fn attach(&self, connection: Arc<Connection>, stream: TcpStream) -> NetResult<()>;

    /// Stops all transport. Attached sockets are closed.
    fn shutdown(&self);
}

/// Which backend to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NetBackendKind {
    /// [`TokioBackend`].
    #[default]
    Tokio,
    /// [`PollBackend`].
    Poll,
}

impl FromStr for NetBackendKind {
    type Err = NetError;

    fn from_str(s: &str) -> NetResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tokio" => Ok(Self::Tokio),
            "poll" => Ok(Self::Poll),
            _ => Err(NetError::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for NetBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tokio => "tokio",
            Self::Poll => "poll",
        })
    }
}

/// Tuning shared by both backends.
#[derive(Clone, Copy, Debug)]
pub struct IoSettings {
    /// I/O threads.
    pub workers: usize,
    /// Bytes per socket read.
    pub read_buffer: usize,
    /// Maximum bytes taken from the out-buffer per send.
    pub send_chunk: usize,
    /// Longest a worker sleeps before re-checking its sockets.
    pub poll_interval: Duration,
    /// Longest a single write may block.
    pub write_timeout: Duration,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            read_buffer: 4096,
            send_chunk: 4096,
            poll_interval: Duration::from_millis(10),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Starts the selected backend.
///
/// # Errors
///
/// Fails if the backend's threads cannot be started.
pub fn start_backend(kind: NetBackendKind, settings: IoSettings) -> NetResult<Arc<dyn IoBackend>> {
    let backend: Arc<dyn IoBackend> = match kind {
        NetBackendKind::Tokio => Arc::new(TokioBackend::new(settings)?),
        NetBackendKind::Poll => Arc::new(PollBackend::new(settings)?),
    };
    tracing::info!(backend = backend.name(), workers = settings.workers, "network backend started");
    Ok(backend)
}
