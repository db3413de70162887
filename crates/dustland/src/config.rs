//! # Server Configuration
//!
//! One TOML file, read once at startup and again on hot reload. Every field
//! has a default, so a missing file and an empty file both give a working
//! server.
//!
//! ```toml
//! [scheduler]
//! logic_workers = 0          # 0 = one per CPU core
//!
//! [network]
//! port = 4000
//! backend = "poll"
//!
//! [save]
//! interval_secs = 600
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use dustland_core::{default_worker_count, PoolConfig};
use dustland_networking::{ConnectionLimits, IoSettings, NetBackendKind};
use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Full server configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Logic worker pool.
    pub scheduler: SchedulerConfig,
    /// Listener, I/O backend and connection limits.
    pub network: NetworkConfig,
    /// Save files.
    pub save: SaveConfig,
    /// Control loop timing.
    pub control: ControlConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// `[scheduler]`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Logic workers. 0 means one per CPU core.
    pub logic_workers: usize,
    /// A job running longer than this is reported once.
    pub stall_warning_ms: u64,
    /// Messages decoded per client job.
    pub max_messages_per_job: usize,
    /// Nap after a full lap of idle jobs.
    pub idle_sleep_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            logic_workers: 0,
            stall_warning_ms: 5000,
            max_messages_per_job: 16,
            idle_sleep_ms: 1,
        }
    }
}

/// `[network]`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Interface to listen on.
    pub bind_address: String,
    /// TCP port. 0 picks a free one.
    pub port: u16,
    /// `"tokio"` or `"poll"`.
    pub backend: String,
    /// I/O threads.
    pub io_workers: usize,
    /// Concurrent connection ceiling.
    pub max_connections: usize,
    /// Maximum buffered inbound bytes per connection.
    pub flood_size: usize,
    /// Maximum bytes per socket write.
    pub send_chunk: usize,
    /// Compress outbound traffic.
    pub compression: bool,
    /// Disconnect after this long without inbound bytes.
    pub idle_timeout_secs: u64,
    /// How long an offline connection may keep draining output.
    pub drain_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 4000,
            backend: "tokio".to_string(),
            io_workers: 2,
            max_connections: 3000,
            flood_size: 2048,
            send_chunk: 4096,
            compression: true,
            idle_timeout_secs: 180,
            drain_timeout_ms: 5000,
        }
    }
}

/// `[save]`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SaveConfig {
    /// World save directory.
    pub directory: PathBuf,
    /// Seconds between autosaves.
    pub interval_secs: u64,
    /// Rotating world save files.
    pub slots: u32,
    /// Client record directory.
    pub clients_directory: PathBuf,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("save"),
            interval_secs: 3600,
            slots: 8,
            clients_directory: PathBuf::from("save/clients"),
        }
    }
}

/// `[control]`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    /// Control loop period.
    pub tick_ms: u64,
    /// Time event pass period.
    pub time_events_interval_ms: u64,
    /// Garbage pass period.
    pub garbage_interval_ms: u64,
    /// Ban expiry sweep period.
    pub ban_sweep_interval_ms: u64,
    /// Password granting admin commands. Empty disables remote admin.
    pub admin_password: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            time_events_interval_ms: 100,
            garbage_interval_ms: 30_000,
            ban_sweep_interval_ms: 60_000,
            admin_password: String::new(),
        }
    }
}

/// `[logging]`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Settings that a hot reload may change on a running server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tunables {
    /// Time between autosaves.
    pub save_interval: Duration,
    /// Inactivity before a client is dropped.
    pub idle_timeout: Duration,
    /// Stall report threshold.
    pub stall_warning: Duration,
    /// Messages decoded per client job.
    pub max_messages_per_job: usize,
}

impl ServerConfig {
    /// Reads `path`, or returns the defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, does not parse, or does not
    /// validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml(&text)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Fails on syntax errors, unknown keys and out-of-range values.
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Names the first offending value.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.save.slots == 0 {
            return Err(ConfigError::Invalid("save.slots must be at least 1".into()));
        }
        if self.scheduler.max_messages_per_job == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_messages_per_job must be at least 1".into(),
            ));
        }
        if self.network.flood_size < 8 {
            return Err(ConfigError::Invalid("network.flood_size must be at least 8".into()));
        }
        if self.network.io_workers == 0 {
            return Err(ConfigError::Invalid("network.io_workers must be at least 1".into()));
        }
        if self.network.send_chunk == 0 {
            return Err(ConfigError::Invalid("network.send_chunk must be at least 1".into()));
        }
        if self.control.tick_ms == 0 {
            return Err(ConfigError::Invalid("control.tick_ms must be at least 1".into()));
        }
        self.backend_kind()?;
        self.log_level()?;
        self.listen_address()?;
        Ok(())
    }

    /// Selected I/O backend.
    ///
    /// # Errors
    ///
    /// Fails on an unknown backend name.
    pub fn backend_kind(&self) -> ConfigResult<NetBackendKind> {
        self.network.backend.parse().map_err(|_| {
            ConfigError::Invalid(format!("unknown network.backend {:?}", self.network.backend))
        })
    }

    /// Maximum log level.
    ///
    /// # Errors
    ///
    /// Fails on an unknown level name.
    pub fn log_level(&self) -> ConfigResult<tracing::Level> {
        tracing::Level::from_str(self.logging.level.trim()).map_err(|_| {
            ConfigError::Invalid(format!("unknown logging.level {:?}", self.logging.level))
        })
    }

    /// Address the listener binds to.
    ///
    /// # Errors
    ///
    /// Fails if `bind_address` is not an IP address.
    pub fn listen_address(&self) -> ConfigResult<SocketAddr> {
        let ip = self.network.bind_address.trim().parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "network.bind_address {:?} is not an IP address",
                self.network.bind_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.network.port))
    }

    /// Logic pool settings. A worker count of 0 resolves to the core count.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        let workers = match self.scheduler.logic_workers {
            0 => default_worker_count(),
            n => n,
        };
        PoolConfig {
            workers,
            idle_sleep: Duration::from_millis(self.scheduler.idle_sleep_ms),
            ..PoolConfig::default()
        }
    }

    /// I/O backend settings.
    #[must_use]
    pub fn io_settings(&self) -> IoSettings {
        IoSettings {
            workers: self.network.io_workers,
            send_chunk: self.network.send_chunk,
            ..IoSettings::default()
        }
    }

    /// Limits applied to every connection.
    #[must_use]
    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            flood_size: self.network.flood_size,
            compression: self.network.compression,
            drain_timeout: Duration::from_millis(self.network.drain_timeout_ms),
        }
    }

    /// The hot-reloadable subset.
    #[must_use]
    pub fn tunables(&self) -> Tunables {
        Tunables {
            save_interval: Duration::from_secs(self.save.interval_secs),
            idle_timeout: Duration::from_secs(self.network.idle_timeout_secs),
            stall_warning: Duration::from_millis(self.scheduler.stall_warning_ms),
            max_messages_per_job: self.scheduler.max_messages_per_job,
        }
    }

    /// Control loop period.
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.control.tick_ms)
    }
}
