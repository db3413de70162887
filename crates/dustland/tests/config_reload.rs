//! Configuration files and hot reload of the tunables.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dustland::{BasicLogic, ConfigError, GameLogic, Server, ServerConfig, ServerError};

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "dustland_cfg_{tag}_{}_{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config_text(dir: &std::path::Path, idle_timeout_secs: u64, max_messages: usize) -> String {
    format!(
        r#"
[scheduler]
logic_workers = 2
max_messages_per_job = {max_messages}

[network]
bind_address = "127.0.0.1"
port = 0
backend = "poll"
idle_timeout_secs = {idle_timeout_secs}

[save]
directory = "{world}"
clients_directory = "{clients}"
interval_secs = 600

[control]
tick_ms = 10
"#,
        world = dir.join("world").display(),
        clients = dir.join("clients").display(),
    )
}

#[test]
fn test_reload_applies_tunables() {
    let dir = temp_dir("reload");
    let path = dir.join("dustland.toml");
    std::fs::write(&path, config_text(&dir, 180, 16)).unwrap();

    let config = ServerConfig::load(&path).unwrap();
    let logic = Arc::new(BasicLogic::new(""));
    let game = Arc::clone(&logic) as Arc<dyn GameLogic>;
    let mut server = Server::start(config, Some(path.clone()), game).unwrap();
    let ctx = Arc::clone(server.context());
    assert_eq!(ctx.tunables().idle_timeout, Duration::from_secs(180));

    std::fs::write(&path, config_text(&dir, 30, 4)).unwrap();
    ctx.request_reload();
    server.control().tick_once();
    assert_eq!(ctx.tunables().idle_timeout, Duration::from_secs(30));
    assert_eq!(ctx.tunables().max_messages_per_job, 4);
    assert_eq!(logic.stats().reloads, 1);

    // A broken file keeps the running values.
    std::fs::write(&path, "[scheduler]\nmax_messages_per_job = 0\n").unwrap();
    ctx.request_reload();
    server.control().tick_once();
    assert_eq!(ctx.tunables().max_messages_per_job, 4);
    assert_eq!(logic.stats().reloads, 2);

    server.shutdown().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_bad_file_stops_startup() {
    let dir = temp_dir("bad");
    let path = dir.join("dustland.toml");
    std::fs::write(&path, "[network]\nbackend = \"iocp\"\n").unwrap();
    assert!(matches!(ServerConfig::load(&path), Err(ConfigError::Invalid(_))));

    std::fs::write(&path, "[network]\nport = \"four thousand\"\n").unwrap();
    assert!(matches!(ServerConfig::load(&path), Err(ConfigError::Parse(_))));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_occupied_port_fails_cleanly() {
    let dir = temp_dir("port");
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = ServerConfig::from_toml(&config_text(&dir, 180, 16)).unwrap();
    config.network.port = taken.local_addr().unwrap().port();

    let result = Server::start(config, None, Arc::new(BasicLogic::new("")));
    assert!(matches!(result, Err(ServerError::Io(_))));
    std::fs::remove_dir_all(&dir).ok();
}
