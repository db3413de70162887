//! # Networking Error Types

use thiserror::Error;

/// Errors that can occur in the networking layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// Socket or listener failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A peer sent more than the configured in-buffer limit.
    #[error("flood: {buffered} bytes buffered, limit {limit}")]
    Flood {
        /// Bytes the buffer would hold.
        buffered: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Declared message length is smaller than the header.
    #[error("message length {0} is shorter than its header")]
    MessageTooShort(u32),

    /// Declared message length exceeds what a connection may buffer.
    #[error("message length {length} exceeds limit {limit}")]
    MessageTooLong {
        /// Declared length.
        length: u32,
        /// Configured limit.
        limit: usize,
    },

    /// The registry is at its connection ceiling.
    #[error("server full ({0} connections)")]
    ServerFull(usize),

    /// A compressed frame could not be decoded.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// The backend has been shut down.
    #[error("network backend is shut down")]
    BackendClosed,

    /// Unknown backend name in configuration.
    #[error("unknown network backend '{0}' (expected 'tokio' or 'poll')")]
    UnknownBackend(String),
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;
