//! # Connection Registry
//!
//! The set of live connections. One lock for the map, held only for
//! insert/remove/lookup; callers get an `Arc` and work outside the lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::connection::{Connection, ConnectionId, ConnectionLimits};
use crate::error::{NetError, NetResult};

/// Thread-safe registry of live connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU32,
    max_connections: usize,
    limits: ConnectionLimits,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(max_connections: usize, limits: ConnectionLimits) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            max_connections,
            limits,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Registers a new peer.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::ServerFull`] at the connection ceiling.
    pub fn register(&self, peer: SocketAddr) -> NetResult<Arc<Connection>> {
        let mut connections = self.connections.lock();
        if connections.len() >= self.max_connections {
            drop(connections);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(NetError::ServerFull(self.max_connections));
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(Connection::new(id, peer, self.limits));
        connections.insert(id, Arc::clone(&connection));
        drop(connections);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(connection)
    }

    /// Looks up a connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.lock().get(&id).cloned()
    }

    /// Unregisters a connection. The caller decides when to release it.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.lock().remove(&id)
    }

    /// Registered connections, including ones going offline.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Connections that are not offline.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.connections.lock().values().filter(|c| !c.is_offline()).count()
    }

    /// Copies out every registered connection.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Marks every connection offline.
    pub fn disconnect_all(&self) -> usize {
        self.snapshot().iter().filter(|c| c.disconnect()).count()
    }

    /// Counts a connection refused before registration, e.g. a banned peer.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Connection ceiling.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Connections accepted since start.
    #[must_use]
    pub fn accepted_total(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Connections refused since start.
    #[must_use]
    pub fn rejected_total(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "10.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn test_ceiling_and_monotonic_ids() {
        let registry = ConnectionRegistry::new(2, ConnectionLimits::default());
        let a = registry.register(peer()).unwrap();
        let b = registry.register(peer()).unwrap();
        assert!(matches!(registry.register(peer()), Err(NetError::ServerFull(2))));
        assert_eq!(registry.rejected_total(), 1);

        registry.remove(a.id()).unwrap();
        let c = registry.register(peer()).unwrap();
        assert!(c.id() > b.id());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.accepted_total(), 3);
    }

    #[test]
    fn test_disconnect_all_and_online_count() {
        let registry = ConnectionRegistry::new(10, ConnectionLimits::default());
        for _ in 0..3 {
            registry.register(peer()).unwrap();
        }
        assert_eq!(registry.online_count(), 3);
        assert_eq!(registry.disconnect_all(), 3);
        assert_eq!(registry.online_count(), 0);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.disconnect_all(), 0);
    }
}
