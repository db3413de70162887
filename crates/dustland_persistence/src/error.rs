//! # Persistence Error Types

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur while saving or loading.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// File system failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file does not start with the expected version tag.
    #[error("bad version tag {found:#010x}, expected {expected:#010x}")]
    BadVersion {
        /// Tag this build writes.
        expected: u32,
        /// Tag found in the file.
        found: u32,
    },

    /// The file ended early.
    #[error("truncated while reading {0}")]
    Truncated(&'static str),

    /// Sections are missing or out of order.
    #[error("section order broken: expected kind {expected}, found {found}")]
    SectionOrder {
        /// Kind that should come next.
        expected: u8,
        /// Kind found.
        found: u8,
    },

    /// A section checksum does not match its contents.
    #[error("checksum mismatch in section {0}")]
    Checksum(u8),

    /// The trailing version tag is missing or wrong.
    #[error("trailing version tag missing or corrupt")]
    Trailer,

    /// A section is too large for its length field.
    #[error("section {kind} is {len} bytes, above the u32 limit")]
    SectionTooLarge {
        /// Section kind.
        kind: u8,
        /// Section length.
        len: usize,
    },

    /// A client record has the wrong signature.
    #[error("not a client record")]
    BadSignature,

    /// A client record was written by an unknown format version.
    #[error("unsupported client record version {0}")]
    UnsupportedRecord(u32),

    /// A name that cannot be used as a file name.
    #[error("invalid record name '{0}'")]
    InvalidName(String),

    /// The world file was written but some client records were not.
    #[error("{failed} client records failed to save, {retained} held for retry")]
    ClientRecords {
        /// Records that failed.
        failed: usize,
        /// Records held for the next save.
        retained: usize,
    },

    /// The pipeline has been shut down.
    #[error("save pipeline is shut down")]
    PipelineClosed,
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Wraps an I/O error with the path it happened on.
pub(crate) fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}
