//! Event-loop backend over nonblocking std sockets.
//!
//! Connections are spread round-robin over shard threads. A shard sweeps its
//! sockets until a sweep makes no progress, then parks on its channel until a
//! new socket, a write wake-up, or the poll interval.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use super::{IoBackend, IoSettings};
use crate::error::{NetError, NetResult};
use crate::server::Connection;

const SHARD_CHANNEL_CAPACITY: usize = 1024;

enum ShardMsg {
    Attach(Arc<Connection>, TcpStream),
    Wake,
}

/// Poll-driven transport.
pub struct PollBackend {
    shards: Vec<Sender<ShardMsg>>,
    next: AtomicUsize,
    closed: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PollBackend {
    /// Starts `settings.workers` shard threads.
    ///
    /// # Errors
    ///
    /// Fails if a thread cannot be spawned. Shards already started are stopped.
    pub fn new(settings: IoSettings) -> NetResult<Self> {
        let closed = Arc::new(AtomicBool::new(false));
        let mut shards = Vec::new();
        let mut handles = Vec::new();

        for index in 0..settings.workers.max(1) {
            let (tx, rx) = bounded(SHARD_CHANNEL_CAPACITY);
            let stop = Arc::clone(&closed);
            let spawned = thread::Builder::new()
                .name(format!("net-poll-{index}"))
                .spawn(move || shard_loop(&rx, &stop, settings));
            match spawned {
                Ok(handle) => {
                    shards.push(tx);
                    handles.push(handle);
                }
                Err(e) => {
                    closed.store(true, Ordering::Release);
                    drop(shards);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(Self {
            shards,
            next: AtomicUsize::new(0),
            closed,
            handles: Mutex::new(handles),
        })
    }
}

impl IoBackend for PollBackend {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn attach(&self, connection: Arc<Connection>, stream: TcpStream) -> NetResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::BackendClosed);
        }
        stream.set_nonblocking(true)?;

        let shard = &self.shards[self.next.fetch_add(1, Ordering::Relaxed) % self.shards.len()];
        let waker = shard.clone();
        connection.set_write_hook(move || {
            // A full channel already holds a wake-up.
            let _ = waker.try_send(ShardMsg::Wake);
        });
        shard
            .send(ShardMsg::Attach(connection, stream))
            .map_err(|_| NetError::BackendClosed)
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for shard in &self.shards {
            let _ = shard.try_send(ShardMsg::Wake);
        }
        for handle in self.handles.lock().drain(..) {
            if handle.join().is_err() {
                tracing::error!("poll shard panicked");
            }
        }
        tracing::info!("poll backend stopped");
    }
}

impl Drop for PollBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct PolledSocket {
    connection: Arc<Connection>,
    stream: TcpStream,
    pending: Vec<u8>,
    written: usize,
}

impl PolledSocket {
    /// One read and one write attempt. Returns whether any bytes moved.
    fn service(&mut self, buffer: &mut [u8], send_chunk: usize) -> bool {
        let mut progress = false;

        if !self.connection.is_offline() {
            match self.stream.read(buffer) {
                Ok(0) => self.fail("peer closed"),
                Ok(n) => {
                    progress = true;
                    if let Err(e) = self.connection.receive(&buffer[..n]) {
                        tracing::warn!(connection = %self.connection.id(), peer = %self.connection.peer(), error = %e, "flood, disconnecting");
                        self.connection.disconnect();
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                Err(e) => self.fail(&e.to_string()),
            }
        }

        if self.written == self.pending.len() {
            self.pending.clear();
            self.written = 0;
            if let Some(chunk) = self.connection.take_outgoing(send_chunk) {
                self.pending = chunk;
            }
        }
        if self.written < self.pending.len() {
            match self.stream.write(&self.pending[self.written..]) {
                Ok(0) => self.fail("write returned zero"),
                Ok(n) => {
                    progress = true;
                    self.written += n;
                    self.connection.record_sent(n);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                Err(e) => self.fail(&e.to_string()),
            }
        }

        progress
    }

    fn fail(&mut self, reason: &str) {
        tracing::debug!(connection = %self.connection.id(), reason, "socket failed");
        self.connection.disconnect();
        self.connection.discard_output();
        self.pending.clear();
        self.written = 0;
    }

    fn finished(&self) -> bool {
        self.connection.is_shut_down()
            && (self.written == self.pending.len() || self.connection.drain_expired())
    }

    fn close(self) {
        // Output left after an expired drain is never sent.
        self.connection.discard_output();
        let _ = self.stream.shutdown(Shutdown::Both);
        tracing::debug!(connection = %self.connection.id(), "socket closed");
    }
}

fn shard_loop(rx: &Receiver<ShardMsg>, closed: &AtomicBool, settings: IoSettings) {
    let mut sockets: Vec<PolledSocket> = Vec::new();
    let mut buffer = vec![0u8; settings.read_buffer.max(1)];

    while !closed.load(Ordering::Acquire) {
        loop {
            match rx.try_recv() {
                Ok(msg) => adopt(&mut sockets, msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return close_all(sockets),
            }
        }

        let mut progress = false;
        let mut index = 0;
        while index < sockets.len() {
            progress |= sockets[index].service(&mut buffer, settings.send_chunk);
            if sockets[index].finished() {
                sockets.swap_remove(index).close();
            } else {
                index += 1;
            }
        }

        if !progress {
            match rx.recv_timeout(settings.poll_interval) {
                Ok(msg) => adopt(&mut sockets, msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    close_all(sockets);
}

fn adopt(sockets: &mut Vec<PolledSocket>, msg: ShardMsg) {
    if let ShardMsg::Attach(connection, stream) = msg {
        sockets.push(PolledSocket {
            connection,
            stream,
            pending: Vec::new(),
            written: 0,
        });
    }
}

fn close_all(sockets: Vec<PolledSocket>) {
    for socket in sockets {
        socket.connection.disconnect();
        socket.close();
    }
}
