//! # Dustland Server
//!
//! ```bash
//! # Defaults, or ./dustland.toml if present
//! ./dustland-server
//!
//! # Explicit configuration
//! ./dustland-server /etc/dustland/server.toml
//! ```
//!
//! SIGINT and SIGTERM stop the server after a final save.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use dustland::{BasicLogic, Server, ServerConfig, ServerResult};

const DEFAULT_CONFIG: &str = "dustland.toml";

fn main() -> ExitCode {
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);

    let config = match ServerConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dustland-server: {e}");
            return ExitCode::FAILURE;
        }
    };
    // Validated by `load`.
    let level = config.log_level().unwrap_or(tracing::Level::INFO);

    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_max_level(level)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("dustland-server: cannot install logger: {e}");
        return ExitCode::FAILURE;
    }

    match run(config, config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: ServerConfig, config_path: PathBuf) -> ServerResult<()> {
    let logic = Arc::new(BasicLogic::new(config.control.admin_password.clone()));
    let server = Server::start(config, Some(config_path), logic)?;

    let kill_switch = server.shutdown_flag();
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&kill_switch))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, kill_switch)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "press Ctrl+C to stop");
    server.run()
}
