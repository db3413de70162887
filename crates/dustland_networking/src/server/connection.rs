//! # Client Connection
//!
//! One TCP peer, shared between the I/O backend (transport) and whichever
//! logic worker currently runs its `Client` job (protocol).
//!
//! ## State Machine
//!
//! ```text
//!  Connected ──> Transferring ──> Playing
//!      │              │              │
//!      └──────────────┴──────────────┴──> Offline (terminal)
//! ```
//!
//! ## Locking
//!
//! - In-buffer, out-buffer and session each have their own mutex
//! - No method holds two of them at once
//! - State and counters are atomics

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use super::buffer::NetBuffer;
use crate::error::{NetError, NetResult};
use crate::protocol::{compress_chunk, PassHash};

/// Unique identifier for a client connection.
///
/// Allocated monotonically by the registry, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of a client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket accepted, nothing exchanged yet.
    Connected = 0,
    /// Login in progress.
    Transferring = 1,
    /// In game.
    Playing = 2,
    /// Closed or closing. Terminal.
    Offline = 3,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connected,
            1 => Self::Transferring,
            2 => Self::Playing,
            _ => Self::Offline,
        }
    }

    /// True if `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connected, Self::Transferring)
                | (Self::Transferring, Self::Playing)
                | (Self::Connected | Self::Transferring | Self::Playing, Self::Offline)
        )
    }
}

/// Per-connection limits, shared by every connection of a registry.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionLimits {
    /// Maximum buffered inbound bytes before the peer is considered flooding.
    pub flood_size: usize,
    /// Whether outbound chunks start out compressed.
    pub compression: bool,
    /// How long an offline connection may keep draining output.
    pub drain_timeout: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            flood_size: 2048,
            compression: true,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Protocol-level state owned by the logic layer.
///
/// Locked for the whole of a `Client` job.
#[derive(Debug, Default)]
pub struct Session {
    /// Account bound to this connection after login.
    pub account: Option<String>,
    /// Password hash presented at login.
    pub pass_hash: PassHash,
    /// Whether the peer has elevated access.
    pub admin: bool,
    /// Opaque state for the game logic.
    pub data: Vec<u8>,
}

/// Traffic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Bytes read from the socket.
    pub bytes_in: u64,
    /// Bytes written to the socket, after compression.
    pub bytes_out: u64,
}

type WriteHook = Box<dyn Fn() + Send + Sync>;

const NOT_OFFLINE: u64 = u64::MAX;

/// A live client connection.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    limits: ConnectionLimits,
    state: AtomicU8,
    input: Mutex<NetBuffer>,
    output: Mutex<NetBuffer>,
    session: Mutex<Session>,
    compression: AtomicBool,
    created: Instant,
    last_activity_ms: AtomicU64,
    offline_since_ms: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    write_hook: OnceLock<WriteHook>,
}

impl Connection {
    /// Creates a connection in the `Connected` state.
    #[must_use]
    pub fn new(id: ConnectionId, peer: SocketAddr, limits: ConnectionLimits) -> Self {
        Self {
            id,
            peer,
            limits,
            state: AtomicU8::new(ConnectionState::Connected as u8),
            input: Mutex::new(NetBuffer::new()),
            output: Mutex::new(NetBuffer::new()),
            session: Mutex::new(Session::default()),
            compression: AtomicBool::new(limits.compression),
            created: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            offline_since_ms: AtomicU64::new(NOT_OFFLINE),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            write_hook: OnceLock::new(),
        }
    }

    /// Connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address.
    #[inline]
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Limits this connection was created with.
    #[must_use]
    pub fn limits(&self) -> ConnectionLimits {
        self.limits
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `next` if the transition is legal.
    ///
    /// Going `Offline` this way is the same as [`disconnect`](Self::disconnect).
    pub fn set_state(&self, next: ConnectionState) -> bool {
        if next == ConnectionState::Offline {
            return self.disconnect();
        }
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !ConnectionState::from_u8(current).can_become(next) {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Marks the connection offline. Returns false if it already was.
    ///
    /// Inbound bytes are discarded from now on. Pending output keeps
    /// draining until it is empty or the drain timeout passes.
    pub fn disconnect(&self) -> bool {
        let previous = self.state.swap(ConnectionState::Offline as u8, Ordering::AcqRel);
        if previous == ConnectionState::Offline as u8 {
            return false;
        }
        self.offline_since_ms.store(self.now_ms(), Ordering::Release);
        tracing::debug!(connection = %self.id, peer = %self.peer, "connection going offline");
        self.wake_writer();
        true
    }

    /// True once `disconnect` has been called.
    #[inline]
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.state() == ConnectionState::Offline
    }

    /// True if the connection is offline and its drain timeout has passed.
    #[must_use]
    pub fn drain_expired(&self) -> bool {
        let since = self.offline_since_ms.load(Ordering::Acquire);
        if since == NOT_OFFLINE {
            return false;
        }
        let limit = u64::try_from(self.limits.drain_timeout.as_millis()).unwrap_or(u64::MAX);
        self.now_ms().saturating_sub(since) >= limit
    }

    /// True once the socket may be closed and the connection released.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.is_offline() && (self.output.lock().is_empty() || self.drain_expired())
    }

    /// Appends bytes read from the socket.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Flood`] if the in-buffer would exceed the flood
    /// limit. Nothing is appended in that case.
    pub fn receive(&self, bytes: &[u8]) -> NetResult<()> {
        if self.is_offline() {
            return Ok(());
        }
        {
            let mut input = self.input.lock();
            let buffered = input.len() + bytes.len();
            if buffered > self.limits.flood_size {
                return Err(NetError::Flood {
                    buffered,
                    limit: self.limits.flood_size,
                });
            }
            input.append(bytes);
        }
        self.bytes_in.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.last_activity_ms.store(self.now_ms(), Ordering::Release);
        Ok(())
    }

    /// Locks the in-buffer for decoding.
    pub fn input(&self) -> MutexGuard<'_, NetBuffer> {
        self.input.lock()
    }

    /// Locks the session for the duration of a job.
    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock()
    }

    /// Locks the session unless another worker holds it.
    pub fn try_session(&self) -> Option<MutexGuard<'_, Session>> {
        self.session.try_lock()
    }

    /// Locks the session, waiting at most `timeout` for the worker holding it.
    pub fn try_session_for(&self, timeout: Duration) -> Option<MutexGuard<'_, Session>> {
        self.session.try_lock_for(timeout)
    }

    /// Queues bytes for sending. Returns false if the connection is offline.
    pub fn send(&self, bytes: &[u8]) -> bool {
        if self.is_offline() {
            return false;
        }
        self.output.lock().append(bytes);
        self.wake_writer();
        true
    }

    /// Takes the next chunk to put on the wire, compressed if enabled.
    pub fn take_outgoing(&self, max: usize) -> Option<Vec<u8>> {
        let chunk = {
            let mut output = self.output.lock();
            if output.is_empty() {
                return None;
            }
            output.take(max)
        };
        if self.compression.load(Ordering::Acquire) {
            Some(compress_chunk(&chunk))
        } else {
            Some(chunk)
        }
    }

    /// Counts bytes the backend has written.
    pub fn record_sent(&self, bytes: usize) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Drops any queued output, for example after a write error.
    pub fn discard_output(&self) {
        self.output.lock().clear();
    }

    /// Bytes waiting in the out-buffer.
    #[must_use]
    pub fn pending_output(&self) -> usize {
        self.output.lock().len()
    }

    /// Sends everything from now on uncompressed.
    pub fn disable_compression(&self) {
        self.compression.store(false, Ordering::Release);
    }

    /// Whether outbound chunks are compressed.
    #[must_use]
    pub fn compression_enabled(&self) -> bool {
        self.compression.load(Ordering::Acquire)
    }

    /// Installs the backend's write notification. Only the first call wins.
    pub fn set_write_hook(&self, hook: impl Fn() + Send + Sync + 'static) -> bool {
        self.write_hook.set(Box::new(hook)).is_ok()
    }

    /// Time since the last inbound bytes, or since accept if none arrived.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    /// Time since accept.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Traffic counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }

    fn wake_writer(&self) {
        if let Some(hook) = self.write_hook.get() {
            hook();
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX - 1)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn connection(limits: ConnectionLimits) -> Connection {
        Connection::new(ConnectionId(1), "127.0.0.1:5000".parse().unwrap(), limits)
    }

    fn plain() -> ConnectionLimits {
        ConnectionLimits {
            compression: false,
            ..ConnectionLimits::default()
        }
    }

    #[test]
    fn test_state_transitions() {
        let conn = connection(plain());
        assert!(!conn.set_state(ConnectionState::Playing));
        assert!(conn.set_state(ConnectionState::Transferring));
        assert!(conn.set_state(ConnectionState::Playing));
        assert!(!conn.set_state(ConnectionState::Connected));
        assert!(conn.set_state(ConnectionState::Offline));
        assert!(!conn.set_state(ConnectionState::Transferring));
        assert!(!conn.disconnect());
    }

    #[test]
    fn test_flood_rejects_without_appending() {
        let conn = connection(ConnectionLimits {
            flood_size: 16,
            ..plain()
        });
        conn.receive(&[1; 10]).unwrap();
        assert!(matches!(conn.receive(&[2; 7]), Err(NetError::Flood { buffered: 17, limit: 16 })));
        assert_eq!(conn.input().len(), 10);
        conn.input().consume(10);
        conn.receive(&[3; 16]).unwrap();
    }

    #[test]
    fn test_offline_discards_input() {
        let conn = connection(plain());
        conn.disconnect();
        conn.receive(b"late").unwrap();
        assert!(conn.input().is_empty());
        assert_eq!(conn.stats().bytes_in, 0);
    }

    #[test]
    fn test_shut_down_waits_for_drain() {
        let conn = connection(plain());
        assert!(conn.send(b"bye"));
        conn.disconnect();
        assert!(!conn.send(b"more"));
        assert!(!conn.is_shut_down());
        assert_eq!(conn.take_outgoing(64).unwrap(), b"bye");
        assert!(conn.is_shut_down());
    }

    #[test]
    fn test_drain_timeout_forces_shut_down() {
        let conn = connection(ConnectionLimits {
            drain_timeout: Duration::ZERO,
            ..plain()
        });
        conn.send(b"stuck");
        conn.disconnect();
        assert!(conn.drain_expired());
        assert!(conn.is_shut_down());
    }

    #[test]
    fn test_write_hook_fires_on_send() {
        let conn = connection(plain());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        assert!(conn.set_write_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!conn.set_write_hook(|| {}));
        conn.send(b"x");
        conn.send(b"y");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_outgoing_is_compressed_when_enabled() {
        let conn = connection(ConnectionLimits::default());
        let payload = vec![7u8; 1000];
        conn.send(&payload);
        let wire = conn.take_outgoing(4096).unwrap();
        assert_ne!(wire, payload);
        let mut decoder = crate::protocol::ChunkDecoder::new();
        decoder.push(&wire);
        assert_eq!(decoder.next_chunk().unwrap().unwrap(), payload);

        conn.disable_compression();
        conn.send(b"raw");
        assert_eq!(conn.take_outgoing(4096).unwrap(), b"raw");
    }
}
