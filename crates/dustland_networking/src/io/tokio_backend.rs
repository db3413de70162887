//! Completion-based backend on a multi-thread tokio runtime.
//!
//! Each connection gets a read task and a write task. The write task sleeps
//! on a `Notify` that the connection's write hook signals.
//!
//! A blocked write is retried every poll interval, so a peer that stops
//! reading is dropped at the write timeout or, once offline, at the end of
//! the drain timeout, whichever comes first.

use std::net::TcpStream as StdTcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Notify;

use super::{IoBackend, IoSettings};
use crate::error::{NetError, NetResult};
use crate::server::Connection;

/// Tokio-driven transport.
pub struct TokioBackend {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    settings: IoSettings,
    closed: AtomicBool,
}

impl TokioBackend {
    /// Builds the runtime with `settings.workers` threads.
    ///
    /// # Errors
    ///
    /// Fails if the runtime cannot be built.
    pub fn new(settings: IoSettings) -> NetResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(settings.workers.max(1))
            .thread_name("net-io")
            .enable_io()
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            settings,
            closed: AtomicBool::new(false),
        })
    }
}

impl IoBackend for TokioBackend {
    fn name(&self) -> &'static str {
        "tokio"
    }

    fn attach(&self, connection: Arc<Connection>, stream: StdTcpStream) -> NetResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::BackendClosed);
        }
        stream.set_nonblocking(true)?;

        let notify = Arc::new(Notify::new());
        let waker = Arc::clone(&notify);
        connection.set_write_hook(move || waker.notify_one());

        self.handle.spawn(serve(connection, stream, notify, self.settings));
        Ok(())
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_timeout(Duration::from_secs(1));
        }
        tracing::info!("tokio backend stopped");
    }
}

impl Drop for TokioBackend {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

async fn serve(
    connection: Arc<Connection>,
    stream: StdTcpStream,
    notify: Arc<Notify>,
    settings: IoSettings,
) {
    let stream = match TcpStream::from_std(stream) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(connection = %connection.id(), error = %e, "cannot register socket");
            connection.disconnect();
            connection.discard_output();
            return;
        }
    };
    let (reader, writer) = stream.into_split();
    let read_task = tokio::spawn(read_loop(Arc::clone(&connection), reader, settings.read_buffer));
    write_loop(&connection, writer, &notify, settings).await;
    read_task.abort();
    tracing::debug!(connection = %connection.id(), "socket closed");
}

async fn read_loop(connection: Arc<Connection>, mut reader: OwnedReadHalf, buffer_size: usize) {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                connection.disconnect();
                return;
            }
            Ok(n) => {
                if let Err(e) = connection.receive(&buffer[..n]) {
                    tracing::warn!(connection = %connection.id(), peer = %connection.peer(), error = %e, "flood, disconnecting");
                    connection.disconnect();
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(connection = %connection.id(), error = %e, "read failed");
                connection.disconnect();
                return;
            }
        }
        if connection.is_offline() {
            return;
        }
    }
}

async fn write_loop(
    connection: &Connection,
    mut writer: OwnedWriteHalf,
    notify: &Notify,
    settings: IoSettings,
) {
    loop {
        while let Some(chunk) = connection.take_outgoing(settings.send_chunk) {
            if !write_chunk(connection, &mut writer, &chunk, settings).await {
                connection.disconnect();
                connection.discard_output();
            }
        }
        if connection.is_shut_down() {
            let _ = writer.shutdown().await;
            return;
        }
        let _ = tokio::time::timeout(settings.poll_interval, notify.notified()).await;
    }
}

async fn write_chunk(
    connection: &Connection,
    writer: &mut OwnedWriteHalf,
    chunk: &[u8],
    settings: IoSettings,
) -> bool {
    let mut written = 0;
    let mut blocked = Duration::ZERO;
    while written < chunk.len() {
        match tokio::time::timeout(settings.poll_interval, writer.write(&chunk[written..])).await {
            Ok(Ok(0)) => {
                tracing::debug!(connection = %connection.id(), "write returned zero");
                return false;
            }
            Ok(Ok(n)) => {
                written += n;
                blocked = Duration::ZERO;
                connection.record_sent(n);
            }
            Ok(Err(e)) => {
                tracing::debug!(connection = %connection.id(), error = %e, "write failed");
                return false;
            }
            Err(_) => {
                blocked += settings.poll_interval;
                if blocked >= settings.write_timeout || connection.drain_expired() {
                    tracing::debug!(connection = %connection.id(), blocked = ?blocked, "write timed out");
                    return false;
                }
            }
        }
    }
    true
}
