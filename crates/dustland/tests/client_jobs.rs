//! Client jobs and the server context without sockets: idle timeouts,
//! bans reaching busy sessions, and records of departed players.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dustland::bans::unix_now;
use dustland::jobs::ClientJob;
use dustland::{BanEntry, BasicLogic, ClientScope, ServerConfig, ServerContext};
use dustland_core::{Job, JobHandler, JobKind, JobOutcome, JobQueue, WorkerContext, WorkerCycles};
use dustland_networking::{AdminCommand, Connection, Session};
use dustland_persistence::{ClientStore, PersistenceError, SavePipeline, WorldStore};

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("dustland_jobs_{tag}_{}_{nanos}", std::process::id()))
}

fn context(dir: &std::path::Path) -> Arc<ServerContext> {
    let clients = ClientStore::open(dir.join("clients")).unwrap();
    Arc::new(ServerContext::new(
        ServerConfig::default(),
        None,
        Arc::new(BasicLogic::new("")),
        Arc::new(WorkerCycles::new(1)),
        clients,
    ))
}

fn connect(ctx: &ServerContext, peer: &str) -> Arc<Connection> {
    let peer: SocketAddr = peer.parse().unwrap();
    ctx.registry().register(peer).unwrap()
}

fn run(ctx: &Arc<ServerContext>, connection: &Connection) -> JobOutcome {
    let queue = JobQueue::new();
    let worker = WorkerContext {
        worker: 0,
        queue: &queue,
    };
    let job = Job::recurring(JobKind::Client, u64::from(connection.id().0));
    ClientJob::new(Arc::clone(ctx)).run(&job, &worker)
}

#[test]
fn test_idle_client_disconnected_then_released() {
    let dir = temp_dir("idle");
    let ctx = context(&dir);
    let tunables = ctx.tunables();
    ctx.set_tunables(dustland::Tunables {
        idle_timeout: Duration::from_millis(20),
        ..tunables
    });

    let connection = connect(&ctx, "10.0.0.1:4000");
    assert_eq!(run(&ctx, &connection), JobOutcome::Idle);
    assert!(!connection.is_offline());

    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(run(&ctx, &connection), JobOutcome::Idle);
    assert!(connection.is_offline());

    // Nothing left to drain: the next run releases it.
    assert_eq!(run(&ctx, &connection), JobOutcome::Finished);
    assert!(ctx.registry().is_empty());
    assert_eq!(run(&ctx, &connection), JobOutcome::Missing);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_ban_reaches_busy_session() {
    let dir = temp_dir("ban_busy");
    let ctx = context(&dir);
    let admin = connect(&ctx, "10.0.0.1:4000");
    let target = connect(&ctx, "10.0.0.9:4001");
    target.session().account = Some("Mallory".into());

    let command = AdminCommand::Ban {
        name: "mallory".into(),
        params: "add+".into(),
        hours: 2,
        info: "spam".into(),
    };
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    std::thread::scope(|s| {
        // The target's own job holds its session for a moment.
        s.spawn(|| {
            let _held = target.session();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(50));
        });
        locked_rx.recv().unwrap();

        let mut session = Session {
            admin: true,
            ..Session::default()
        };
        let mut scope = ClientScope {
            server: &ctx,
            connection: &admin,
            session: &mut session,
        };
        ctx.commands().dispatch(&mut scope, &command);
    });

    let entry = ctx.bans().check_name("Mallory", unix_now()).unwrap();
    assert_eq!(entry.ip, Some(target.peer().ip()));
    assert!(target.is_offline());
    assert!(!admin.is_offline());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_banned_account_dropped_by_own_job() {
    let dir = temp_dir("ban_job");
    let ctx = context(&dir);
    let target = connect(&ctx, "10.0.0.9:4001");
    target.session().account = Some("Mallory".into());
    assert_eq!(run(&ctx, &target), JobOutcome::Idle);
    assert!(!target.is_offline());

    ctx.bans().add(BanEntry {
        name: "mallory".into(),
        ip: None,
        expires_at: unix_now() + 60,
        banned_by: "admin".into(),
        reason: "spam".into(),
    });
    assert_eq!(run(&ctx, &target), JobOutcome::Idle);
    assert!(target.is_offline());
    assert!(target.pending_output() > 0);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_departed_record_survives_failed_save() {
    let dir = temp_dir("departed");
    let ctx = context(&dir);
    let connection = connect(&ctx, "10.0.0.3:4000");
    {
        let mut session = connection.session();
        session.account = Some("Ian".into());
        session.data = b"hp=30".to_vec();
    }
    connection.disconnect();
    ctx.release_connection(&connection);
    assert_eq!(ctx.pending_records(), 1);

    let world = WorldStore::open(dir.join("world"), 2).unwrap();
    let pipeline = SavePipeline::start(world, ctx.clients().clone()).unwrap();
    let mut blocker = ctx.clients().path_for("Ian").unwrap().into_os_string();
    blocker.push(".tmp");
    std::fs::create_dir(&blocker).unwrap();

    let mut batch = pipeline.acquire_batch().unwrap();
    batch.sequence = ctx.next_save_sequence();
    ctx.collect_snapshot(&mut batch);
    assert_eq!(batch.clients().len(), 1);
    let result = pipeline.write_now(batch);
    assert!(matches!(result, Err(PersistenceError::ClientRecords { failed: 1, retained: 1 })));
    assert_eq!(pipeline.stats().saves_failed, 1);
    assert_eq!(pipeline.held_clients(), 1);

    // The next snapshot has nothing new, the held record goes out with it.
    std::fs::remove_dir(&blocker).unwrap();
    let mut batch = pipeline.acquire_batch().unwrap();
    batch.sequence = ctx.next_save_sequence();
    ctx.collect_snapshot(&mut batch);
    assert!(batch.clients().is_empty());
    pipeline.write_now(batch).unwrap();

    let record = ctx.clients().read("Ian").unwrap();
    assert_eq!(record.state, b"hp=30".to_vec());
    assert_eq!(pipeline.held_clients(), 0);
    assert_eq!(pipeline.stats().saves_completed, 1);

    drop(pipeline);
    std::fs::remove_dir_all(&dir).ok();
}
