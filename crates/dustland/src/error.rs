//! # Server Error Types
//!
//! Everything that can stop the server from starting, or fail a whole-world
//! operation while it runs.

use std::path::PathBuf;

use dustland_core::CoreError;
use dustland_networking::NetError;
use dustland_persistence::PersistenceError;
use thiserror::Error;

/// Errors raised by the server layer.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The scheduler refused to start or stop.
    #[error("scheduler error: {0}")]
    Core(#[from] CoreError),

    /// Listener, backend or acceptor failure.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// Save or load failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Bad or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Plain I/O, for example binding the listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A saved section could not be decoded.
    #[error("corrupt {section} section: {reason}")]
    CorruptSection {
        /// Section name.
        section: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// The game logic reported a failure.
    #[error("game logic: {0}")]
    Logic(String),
}

/// Errors loading or validating the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but cannot be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for the configuration schema.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
