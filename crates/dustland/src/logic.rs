//! # Game Logic Boundary
//!
//! The scheduler runs jobs; what a tick or a message *means* belongs to the
//! game. [`GameLogic`] is that boundary. Every callback runs inside a job on
//! a logic worker, with the target's lock held and nothing else.
//!
//! [`BasicLogic`] is the bundled implementation: it counts ticks, echoes
//! messages, keeps a table of variables and a list of time events.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dustland_networking::protocol::{encode_message, text_message, GameTime};
use dustland_networking::{AdminCommand, Connection, ConnectionId, MessageReader, Session};
use dustland_persistence::{
    ClientRecord, LoadedWorld, SaveBatch, SaveBuffer, SectionKind, TimeEvent,
};
use parking_lot::Mutex;

use crate::bans::unix_now;
use crate::context::ServerContext;
use crate::error::{ServerError, ServerResult};
use crate::world::{EntityKind, EntityRecord};

/// What the logic did with one client message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Consumed.
    Handled,
    /// The player is busy. The message stays buffered and the job retries.
    NotReady,
    /// Consumed, and the connection must be dropped.
    Disconnect,
}

/// What the logic did with one entity tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The entity did work.
    Continue,
    /// Nothing was due.
    Idle,
    /// The entity is gone. Its job stops and the handle is retired.
    Destroy,
}

/// Everything a client callback may touch.
pub struct ClientScope<'a> {
    /// The server.
    pub server: &'a ServerContext,
    /// The connection the message came from.
    pub connection: &'a Arc<Connection>,
    /// Its session, locked for the whole job.
    pub session: &'a mut Session,
}

impl ClientScope<'_> {
    /// Sends a line of text to the client.
    pub fn reply(&self, text: &str) -> bool {
        self.connection.send(&text_message(text))
    }
}

/// Game content, as seen by the scheduler.
pub trait GameLogic: Send + Sync {
    /// Handles one message with an opcode the core does not own.
    fn on_message(
        &self,
        scope: &mut ClientScope<'_>,
        opcode: u32,
        payload: &[u8],
    ) -> MessageOutcome;

    /// Handles an administrative command the core does not own.
    fn on_command(&self, scope: &mut ClientScope<'_>, command: &AdminCommand);

    /// Advances one critter by one tick.
    fn tick_critter(&self, record: &mut EntityRecord) -> TickOutcome;

    /// Advances one map by one tick.
    fn tick_map(&self, record: &mut EntityRecord) -> TickOutcome;

    /// Fires due time events. Returns how many fired.
    fn process_time_events(&self, now: u64) -> usize;

    /// Periodic cleanup pass. Returns how many items were collected.
    fn collect_garbage(&self) -> usize;

    /// Writes the logic-owned sections. Runs with the world frozen.
    fn save_sections(&self, batch: &mut SaveBatch);

    /// Restores the logic-owned sections at startup.
    ///
    /// # Errors
    ///
    /// Fails if a section does not decode.
    fn load_sections(&self, world: &LoadedWorld) -> ServerResult<()>;

    /// The record to persist for a session, if it belongs to an account.
    fn client_record(&self, session: &Session) -> Option<ClientRecord>;

    /// Hot reload. Runs with the world frozen.
    ///
    /// # Errors
    ///
    /// A failure is logged and the previous content stays active.
    fn reload(&self) -> ServerResult<()>;
}

/// Counters exposed by [`BasicLogic`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogicStats {
    /// Entity ticks run.
    pub ticks: u64,
    /// Client messages echoed.
    pub messages: u64,
    /// Time events fired.
    pub events_fired: u64,
    /// Successful reloads.
    pub reloads: u64,
}

/// Bundled game logic.
#[derive(Debug, Default)]
pub struct BasicLogic {
    admin_password: String,
    variables: Mutex<BTreeMap<String, i32>>,
    game_time: Mutex<GameTime>,
    time_events: Mutex<Vec<TimeEvent>>,
    fired: Mutex<Vec<TimeEvent>>,
    next_event_id: AtomicU32,
    ticks: AtomicU64,
    messages: AtomicU64,
    events_fired: AtomicU64,
    reloads: AtomicU64,
}

impl BasicLogic {
    /// Creates the logic. An empty `admin_password` disables remote admin.
    #[must_use]
    pub fn new(admin_password: impl Into<String>) -> Self {
        Self {
            admin_password: admin_password.into(),
            ..Self::default()
        }
    }

    /// Schedules a time event. Returns its id.
    pub fn schedule_event(&self, fire_at: u64, handler: u32) -> u32 {
        let id = self.next_event_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.time_events.lock().push(TimeEvent {
            id,
            fire_at,
            handler,
        });
        id
    }

    /// Time events not yet fired.
    #[must_use]
    pub fn pending_events(&self) -> Vec<TimeEvent> {
        self.time_events.lock().clone()
    }

    /// Value of a variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<i32> {
        self.variables.lock().get(name).copied()
    }

    /// Sets a variable.
    pub fn set_variable(&self, name: impl Into<String>, value: i32) {
        self.variables.lock().insert(name.into(), value);
    }

    /// Current game time.
    #[must_use]
    pub fn game_time(&self) -> GameTime {
        *self.game_time.lock()
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> LogicStats {
        LogicStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            events_fired: self.events_fired.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
        }
    }

    fn get_access(&self, scope: &mut ClientScope<'_>, name: &str, password: &str) {
        if let Some(ban) = scope.server.bans().check_name(name, unix_now()) {
            scope.reply(&format!("Banned: {}", ban.reason));
            scope.connection.disconnect();
            return;
        }
        if self.admin_password.is_empty() || password != self.admin_password {
            scope.reply("Access denied.");
            return;
        }
        if scope.session.account.is_none() {
            if let Ok(record) = scope.server.clients().read(name) {
                scope.session.pass_hash = record.pass_hash;
                scope.session.data = record.state;
            }
            scope.session.account = Some(name.to_string());
        }
        scope.session.admin = true;
        scope.reply("Access granted.");
    }

    fn delete_account(scope: &mut ClientScope<'_>, pass_hash: &[u8; 32]) {
        let Some(name) = scope.session.account.clone() else {
            scope.reply("Not logged in.");
            return;
        };
        if *pass_hash != scope.session.pass_hash {
            scope.reply("Wrong password.");
            return;
        }
        match scope.server.clients().archive(&name) {
            Ok(path) => tracing::info!(account = %name, path = %path.display(), "account deleted"),
            Err(e) => tracing::warn!(account = %name, error = %e, "account record not archived"),
        }
        scope.session.account = None;
        scope.reply("Account deleted.");
        scope.connection.disconnect();
    }

    fn spawn(scope: &ClientScope<'_>, kind: EntityKind, proto: u32, data: Vec<u8>) {
        let entity = scope.server.world().spawn(kind, proto, data);
        scope.server.schedule_entity(kind, entity.id());
        scope.reply(&format!("Spawned {kind:?} {}.", entity.id()));
    }
}

impl GameLogic for BasicLogic {
    fn on_message(
        &self,
        scope: &mut ClientScope<'_>,
        opcode: u32,
        payload: &[u8],
    ) -> MessageOutcome {
        let mut echo = Vec::with_capacity(8 + payload.len());
        encode_message(opcode, payload, &mut echo);
        scope.connection.send(&echo);
        self.messages.fetch_add(1, Ordering::Relaxed);
        MessageOutcome::Handled
    }

    fn on_command(&self, scope: &mut ClientScope<'_>, command: &AdminCommand) {
        match command {
            AdminCommand::MyInfo => {
                let account = scope.session.account.as_deref().unwrap_or("-");
                scope.reply(&format!(
                    "Connection {}, account {account}, admin {}.",
                    scope.connection.id(),
                    scope.session.admin
                ));
            }
            AdminCommand::GameInfo { .. } => {
                let world = scope.server.world();
                scope.reply(&format!(
                    "Online {}, critters {}, maps {}, uptime {}s.",
                    scope.server.registry().online_count(),
                    world.len(EntityKind::Critter),
                    world.len(EntityKind::Map),
                    scope.server.uptime().as_secs()
                ));
            }
            AdminCommand::GetAccess { name, password } => self.get_access(scope, name, password),
            AdminCommand::DisconCrit { critter } => {
                match scope.server.registry().get(ConnectionId(*critter)) {
                    Some(target) if target.disconnect() => scope.reply("Client disconnected."),
                    _ => scope.reply("Client not found."),
                };
            }
            AdminCommand::Property { critter, name, value } => {
                self.set_variable(format!("{critter}.{name}"), *value);
                scope.reply("Property set.");
            }
            AdminCommand::AddNpc { hex_x, hex_y, dir, proto } => {
                let mut data = Vec::with_capacity(5);
                data.extend_from_slice(&hex_x.to_le_bytes());
                data.extend_from_slice(&hex_y.to_le_bytes());
                data.push(*dir);
                Self::spawn(scope, EntityKind::Critter, *proto, data);
            }
            AdminCommand::AddLocation { world_x, world_y, proto } => {
                let mut data = Vec::with_capacity(4);
                data.extend_from_slice(&world_x.to_le_bytes());
                data.extend_from_slice(&world_y.to_le_bytes());
                Self::spawn(scope, EntityKind::Map, *proto, data);
            }
            AdminCommand::SetTime(time) => {
                *self.game_time.lock() = *time;
                scope.reply("Time changed.");
            }
            AdminCommand::DeleteAccount { pass_hash } => Self::delete_account(scope, pass_hash),
            AdminCommand::ChangePassword { pass_hash, new_pass_hash } => {
                if scope.session.account.is_some() && *pass_hash == scope.session.pass_hash {
                    scope.session.pass_hash = *new_pass_hash;
                    scope.reply("Password changed.");
                } else {
                    scope.reply("Wrong password.");
                }
            }
            other => {
                tracing::debug!(command = ?other.id(), "command not supported");
                scope.reply("Command not supported.");
            }
        }
    }

    fn tick_critter(&self, record: &mut EntityRecord) -> TickOutcome {
        record.ticks += 1;
        self.ticks.fetch_add(1, Ordering::Relaxed);
        TickOutcome::Continue
    }

    fn tick_map(&self, record: &mut EntityRecord) -> TickOutcome {
        record.ticks += 1;
        self.ticks.fetch_add(1, Ordering::Relaxed);
        TickOutcome::Idle
    }

    fn process_time_events(&self, now: u64) -> usize {
        let due: Vec<TimeEvent> = {
            let mut events = self.time_events.lock();
            let (due, waiting) = std::mem::take(&mut *events)
                .into_iter()
                .partition(|e| e.fire_at <= now);
            *events = waiting;
            due
        };
        let count = due.len();
        if count > 0 {
            self.events_fired.fetch_add(count as u64, Ordering::Relaxed);
            self.fired.lock().extend(due);
        }
        count
    }

    fn collect_garbage(&self) -> usize {
        self.fired.lock().drain(..).count()
    }

    fn save_sections(&self, batch: &mut SaveBatch) {
        let out = batch.section_mut(SectionKind::Variables);
        let time = self.game_time();
        for field in [
            time.multiplier,
            time.year,
            time.month,
            time.day,
            time.hour,
            time.minute,
            time.second,
        ] {
            out.write_bytes(&field.to_le_bytes());
        }
        let variables = self.variables.lock();
        out.write_u32(u32::try_from(variables.len()).unwrap_or(u32::MAX));
        for (name, value) in variables.iter() {
            write_name(out, name);
            out.write_bytes(&value.to_le_bytes());
        }
        drop(variables);

        let out = batch.section_mut(SectionKind::TimeEvents);
        out.write_u32(self.next_event_id.load(Ordering::Relaxed));
        let events = self.time_events.lock();
        out.write_u32(u32::try_from(events.len()).unwrap_or(u32::MAX));
        for event in events.iter() {
            out.write_u32(event.id);
            out.write_u64(event.fire_at);
            out.write_u32(event.handler);
        }
    }

    fn load_sections(&self, world: &LoadedWorld) -> ServerResult<()> {
        let variables = world.section(SectionKind::Variables);
        if !variables.is_empty() {
            let (time, table) = read_variables(variables).ok_or_else(|| corrupt("variables"))?;
            *self.game_time.lock() = time;
            *self.variables.lock() = table;
        }
        let events = world.section(SectionKind::TimeEvents);
        if !events.is_empty() {
            let (next_id, list) = read_events(events).ok_or_else(|| corrupt("time events"))?;
            self.next_event_id.store(next_id, Ordering::Relaxed);
            *self.time_events.lock() = list;
        }
        Ok(())
    }

    fn client_record(&self, session: &Session) -> Option<ClientRecord> {
        let name = session.account.as_ref()?;
        let mut record = ClientRecord::new(name.clone(), session.pass_hash);
        record.state.clone_from(&session.data);
        Some(record)
    }

    fn reload(&self) -> ServerResult<()> {
        let count = self.reloads.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(reloads = count, "game content reloaded");
        Ok(())
    }
}

fn write_name(out: &mut SaveBuffer, name: &str) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(u32::MAX as usize);
    out.write_u32(len as u32);
    out.write_bytes(&bytes[..len]);
}

fn read_variables(bytes: &[u8]) -> Option<(GameTime, BTreeMap<String, i32>)> {
    let mut reader = MessageReader::new(bytes);
    let time = GameTime {
        multiplier: reader.read_i32()?,
        year: reader.read_i32()?,
        month: reader.read_i32()?,
        day: reader.read_i32()?,
        hour: reader.read_i32()?,
        minute: reader.read_i32()?,
        second: reader.read_i32()?,
    };
    let count = reader.read_u32()?;
    let mut table = BTreeMap::new();
    for _ in 0..count {
        let name = reader.read_string()?;
        table.insert(name, reader.read_i32()?);
    }
    (reader.remaining() == 0).then_some((time, table))
}

fn read_events(bytes: &[u8]) -> Option<(u32, Vec<TimeEvent>)> {
    let mut reader = MessageReader::new(bytes);
    let next_id = reader.read_u32()?;
    let count = reader.read_u32()?;
    let mut events = Vec::new();
    for _ in 0..count {
        events.push(TimeEvent {
            id: reader.read_u32()?,
            fire_at: reader.read_u64()?,
            handler: reader.read_u32()?,
        });
    }
    (reader.remaining() == 0).then_some((next_id, events))
}

fn corrupt(section: &'static str) -> ServerError {
    ServerError::CorruptSection {
        section,
        reason: "malformed logic data".to_string(),
    }
}
