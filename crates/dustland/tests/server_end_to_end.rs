//! Whole-server tests over loopback TCP: ping, ping info, commands,
//! reloads, and a save that survives a restart.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dustland::{BanEntry, BasicLogic, EntityKind, GameLogic, Server, ServerConfig, World};
use dustland_core::WorkerCycles;
use dustland_networking::protocol::{ping_message, ChunkDecoder, GameTime};
use dustland_networking::{decode_frame, AdminCommand, MessageReader, PING, SEND_TEXT};
use dustland_persistence::{ClientStore, SectionKind, WorldStore};

const WAIT: Duration = Duration::from_secs(10);

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("dustland_e2e_{tag}_{}_{nanos}", std::process::id()))
}

fn config(dir: &Path, backend: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.network.bind_address = "127.0.0.1".into();
    config.network.port = 0;
    config.network.backend = backend.into();
    config.network.io_workers = 1;
    config.scheduler.logic_workers = 2;
    config.save.directory = dir.join("world");
    config.save.clients_directory = dir.join("clients");
    config.save.slots = 2;
    config.control.admin_password = "sesame".into();
    config
}

fn start(config: ServerConfig) -> (Server, Arc<BasicLogic>) {
    let logic = Arc::new(BasicLogic::new(config.control.admin_password.clone()));
    let server = Server::start(config, None, Arc::clone(&logic) as Arc<dyn GameLogic>).unwrap();
    (server, logic)
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// A client reading the compressed stream the server sends.
struct Client {
    stream: TcpStream,
    decoder: ChunkDecoder,
    plain: Vec<u8>,
}

impl Client {
    fn connect(server: &Server) -> Self {
        let stream = TcpStream::connect(server.local_addr().unwrap()).unwrap();
        stream.set_read_timeout(Some(WAIT)).unwrap();
        Self {
            stream,
            decoder: ChunkDecoder::new(),
            plain: Vec::new(),
        }
    }

    fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    fn command(&mut self, command: &AdminCommand) {
        self.send(&command.encode());
    }

    fn next_message(&mut self) -> (u32, Vec<u8>) {
        let mut buf = [0u8; 4096];
        loop {
            if let Some((frame, used)) = decode_frame(&self.plain, 1 << 20).unwrap() {
                let dustland_networking::Frame::Message { opcode, payload } = frame else {
                    panic!("server sent a ping info frame");
                };
                let message = (opcode, payload.to_vec());
                self.plain.drain(..used);
                return message;
            }
            let n = self.stream.read(&mut buf).unwrap();
            assert!(n > 0, "server closed the connection");
            self.decoder.push(&buf[..n]);
            while let Some(chunk) = self.decoder.next_chunk().unwrap() {
                self.plain.extend_from_slice(&chunk);
            }
        }
    }

    fn next_text(&mut self) -> String {
        let (opcode, payload) = self.next_message();
        assert_eq!(opcode, SEND_TEXT);
        MessageReader::new(&payload).read_string().unwrap()
    }
}

fn ping_and_commands(backend: &str) {
    let dir = temp_dir(backend);
    let (mut server, logic) = start(config(&dir, backend));
    let mut client = Client::connect(&server);

    client.send(&ping_message(3));
    assert_eq!(client.next_message(), (PING, vec![3]));

    client.command(&AdminCommand::ReloadScripts);
    assert_eq!(client.next_text(), "Access denied.");

    client.command(&AdminCommand::GetAccess {
        name: "Ian".into(),
        password: "wrong".into(),
    });
    assert_eq!(client.next_text(), "Access denied.");
    // A refused login leaves the session unbound.
    client.command(&AdminCommand::MyInfo);
    assert!(client.next_text().contains("account -, admin false"));
    client.command(&AdminCommand::GetAccess {
        name: "Ian".into(),
        password: "sesame".into(),
    });
    assert_eq!(client.next_text(), "Access granted.");

    client.command(&AdminCommand::MyInfo);
    assert!(client.next_text().contains("account Ian, admin true"));

    client.command(&AdminCommand::ReloadScripts);
    assert_eq!(client.next_text(), "Reload scheduled.");
    server.control().tick_once();
    assert_eq!(logic.stats().reloads, 1);

    // Unknown opcodes reach the game logic, which echoes them.
    let mut custom = Vec::new();
    dustland_networking::protocol::encode_message(0x1234, b"hello", &mut custom);
    client.send(&custom);
    assert_eq!(client.next_message(), (0x1234, b"hello".to_vec()));

    server.shutdown().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

fn ping_info(backend: &str) {
    let dir = temp_dir(&format!("info_{backend}"));
    let (mut server, _) = start(config(&dir, backend));
    let mut client = Client::connect(&server);

    client.send(&u32::MAX.to_le_bytes());
    let mut answer = Vec::new();
    client.stream.read_to_end(&mut answer).unwrap();
    assert_eq!(answer.len(), 16);
    assert_eq!(&answer[8..], &[0u8; 8]);

    // The closed connection is released by its job and reclaimed later.
    let ctx = Arc::clone(server.context());
    wait_until(|| ctx.registry().is_empty());

    server.shutdown().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_ping_and_commands_tokio() {
    ping_and_commands("tokio");
}

#[test]
fn test_ping_and_commands_poll() {
    ping_and_commands("poll");
}

#[test]
fn test_ping_info_tokio() {
    ping_info("tokio");
}

#[test]
fn test_ping_info_poll() {
    ping_info("poll");
}

#[test]
fn test_world_survives_restart() {
    let dir = temp_dir("restart");
    let (mut server, logic) = start(config(&dir, "tokio"));
    let ctx = Arc::clone(server.context());

    for proto in 0..20 {
        let critter = ctx.world().spawn(EntityKind::Critter, proto, vec![proto as u8; 3]);
        ctx.schedule_entity(EntityKind::Critter, critter.id());
    }
    for proto in 0..5 {
        let map = ctx.world().spawn(EntityKind::Map, 100 + proto, vec![]);
        ctx.schedule_entity(EntityKind::Map, map.id());
    }
    ctx.bans().add(BanEntry {
        name: "Griefer".into(),
        ip: Some("10.0.0.7".parse().unwrap()),
        expires_at: dustland::bans::unix_now() + 3600,
        banned_by: "admin".into(),
        reason: "spam".into(),
    });
    logic.set_variable("gate.open", 1);
    logic.schedule_event(u64::MAX, 7);

    let mut client = Client::connect(&server);
    client.command(&AdminCommand::GetAccess {
        name: "Ian".into(),
        password: "sesame".into(),
    });
    assert_eq!(client.next_text(), "Access granted.");
    client.command(&AdminCommand::SetTime(GameTime {
        multiplier: 20,
        year: 2246,
        month: 7,
        day: 1,
        hour: 12,
        minute: 0,
        second: 0,
    }));
    assert_eq!(client.next_text(), "Time changed.");

    // Ticks happen between the spawn and the stop.
    wait_until(|| ctx.world().snapshot(EntityKind::Critter).iter().all(|r| r.ticks > 0));
    server.save_now().unwrap();
    server.shutdown().unwrap();

    let critters = ctx.world().snapshot(EntityKind::Critter);
    let maps = ctx.world().snapshot(EntityKind::Map);
    assert_eq!(critters.len(), 20);
    assert_eq!(maps.len(), 5);

    // Reload the file by hand into a fresh world.
    let store = WorldStore::open(dir.join("world"), 2).unwrap();
    let loaded = store.load_latest().unwrap();
    assert_eq!(loaded.sequence, 2);
    let fresh = World::new(Arc::new(WorkerCycles::new(1)));
    fresh.load_section(EntityKind::Critter, loaded.section(SectionKind::Critters)).unwrap();
    fresh.load_section(EntityKind::Map, loaded.section(SectionKind::Locations)).unwrap();
    assert_eq!(fresh.snapshot(EntityKind::Critter), critters);
    assert_eq!(fresh.snapshot(EntityKind::Map), maps);

    let record = ClientStore::open(dir.join("clients")).unwrap().read("Ian").unwrap();
    assert_eq!(record.name, "Ian");
    drop(server);

    // A restarted server resumes from the same file.
    let (mut server, logic) = start(config(&dir, "tokio"));
    let ctx = Arc::clone(server.context());
    assert_eq!(ctx.save_sequence(), 2);
    let ids: Vec<u64> = critters.iter().map(|r| r.id).collect();
    assert_eq!(ctx.world().ids(EntityKind::Critter), ids);
    assert_eq!(ctx.bans().len(), 1);
    assert!(ctx.bans().check_name("griefer", dustland::bans::unix_now()).is_some());
    assert_eq!(logic.variable("gate.open"), Some(1));
    assert_eq!(logic.game_time().year, 2246);
    assert_eq!(logic.pending_events().len(), 1);

    let newcomer = ctx.world().spawn(EntityKind::Critter, 1, vec![]);
    assert!(critters.iter().all(|r| r.id < newcomer.id()));

    server.shutdown().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_banned_address_is_refused() {
    let dir = temp_dir("banned_ip");
    let (mut server, _) = start(config(&dir, "poll"));
    server.context().bans().add(BanEntry {
        name: "local".into(),
        ip: Some("127.0.0.1".parse().unwrap()),
        expires_at: dustland::bans::unix_now() + 60,
        banned_by: "admin".into(),
        reason: String::new(),
    });

    let mut stream = TcpStream::connect(server.local_addr().unwrap()).unwrap();
    stream.set_read_timeout(Some(WAIT)).unwrap();
    let mut rest = Vec::new();
    // Refused peers are closed without a byte.
    let read = stream.read_to_end(&mut rest);
    assert!(read.is_err() || rest.is_empty());
    assert_eq!(server.context().registry().len(), 0);

    server.shutdown().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}
