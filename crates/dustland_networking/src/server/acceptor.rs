//! # Network Acceptor
//!
//! One thread polling a nonblocking listener:
//!
//! 1. admission check (bans) - refused peers are closed at once
//! 2. registry ceiling - refused peers are closed at once
//! 3. `TCP_NODELAY`, register, attach to the backend
//! 4. `on_accept` hook, which schedules the connection's job

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::connection::Connection;
use super::registry::ConnectionRegistry;
use crate::error::NetResult;
use crate::io::IoBackend;

/// Callbacks the acceptor consults for every new socket.
pub struct AcceptHooks {
    /// Returns false to refuse a peer before registration.
    pub admit: Box<dyn Fn(&SocketAddr) -> bool + Send>,
    /// Runs after the connection is registered and attached.
    pub on_accept: Box<dyn Fn(&Arc<Connection>) + Send>,
}

impl Default for AcceptHooks {
    fn default() -> Self {
        Self {
            admit: Box::new(|_| true),
            on_accept: Box::new(|_| {}),
        }
    }
}

/// Handle to the acceptor thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct Acceptor {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Acceptor {
    /// Spawns the accept loop on `listener`.
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot be made nonblocking or the thread cannot
    /// be spawned.
    pub fn spawn(
        listener: TcpListener,
        registry: Arc<ConnectionRegistry>,
        backend: Arc<dyn IoBackend>,
        hooks: AcceptHooks,
        poll_interval: Duration,
    ) -> NetResult<Self> {
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);

        let handle = thread::Builder::new().name("acceptor".into()).spawn(move || {
            tracing::info!(address = %local_addr, "accepting connections");
            while !stop.load(Ordering::Acquire) {
                match listener.accept() {
                    Ok((stream, peer)) => admit(stream, peer, &registry, backend.as_ref(), &hooks),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(poll_interval),
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        thread::sleep(poll_interval);
                    }
                }
            }
            tracing::info!("acceptor stopped");
        })?;

        Ok(Self {
            local_addr,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and joins the thread.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("acceptor thread panicked");
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &ConnectionRegistry,
    backend: &dyn IoBackend,
    hooks: &AcceptHooks,
) {
    if !(hooks.admit)(&peer) {
        registry.record_rejected();
        tracing::info!(%peer, "connection refused by admission check");
        return;
    }

    let connection = match registry.register(peer) {
        Ok(connection) => connection,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "connection rejected");
            return;
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "cannot set TCP_NODELAY");
    }

    if let Err(e) = backend.attach(Arc::clone(&connection), stream) {
        tracing::warn!(connection = %connection.id(), %peer, error = %e, "attach failed");
        connection.disconnect();
        registry.remove(connection.id());
        return;
    }

    tracing::info!(connection = %connection.id(), %peer, backend = backend.name(), "connection accepted");
    (hooks.on_accept)(&connection);
}
