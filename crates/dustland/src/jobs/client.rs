//! Per-connection processing.
//!
//! ```text
//!   lookup ── gone ───────────────────────> Missing
//!     │   ── shut down ── release ────────> Finished
//!     │   ── offline, still draining ─────> Idle
//!     │   ── idle too long ── disconnect ─> Idle
//!     │   ── session busy ────────────────> NotReady
//!     │   ── account banned ── disconnect > Idle
//!     ▼
//!   decode up to K messages
//!     PING            echo
//!     PING_INFO       answer, disconnect
//!     SEND_COMMAND    command table
//!     anything else   game logic (NotReady leaves the bytes buffered)
//! ```

use std::sync::Arc;

use dustland_core::{Job, JobHandler, JobOutcome, WorkerContext};
use dustland_networking::protocol::{ping_info_answer, ping_message, text_message};
use dustland_networking::{
    decode_frame, AdminCommand, Connection, ConnectionId, Frame, NetError, Session, PING,
    SEND_COMMAND,
};

use crate::bans::unix_now;
use crate::context::ServerContext;
use crate::logic::{ClientScope, MessageOutcome};

/// What the front of an in-buffer holds, copied out of the lock.
enum Decoded {
    Incomplete,
    PingInfo(usize),
    Message {
        opcode: u32,
        payload: Vec<u8>,
        used: usize,
    },
    Broken(NetError),
}

/// Handler for `Client` jobs. The job target is the connection id.
pub struct ClientJob {
    ctx: Arc<ServerContext>,
}

impl ClientJob {
    /// Creates the handler.
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    fn process(&self, connection: &Arc<Connection>, session: &mut Session) -> JobOutcome {
        let max_messages = self.ctx.tunables().max_messages_per_job;
        let flood_size = connection.limits().flood_size;
        let mut handled = 0;

        while handled < max_messages && !connection.is_offline() {
            let decoded = {
                let input = connection.input();
                match decode_frame(input.as_slice(), flood_size) {
                    Ok(None) => Decoded::Incomplete,
                    Ok(Some((Frame::PingInfo, used))) => Decoded::PingInfo(used),
                    Ok(Some((Frame::Message { opcode, payload }, used))) => {
                        Decoded::Message {
                            opcode,
                            payload: payload.to_vec(),
                            used,
                        }
                    }
                    Err(e) => Decoded::Broken(e),
                }
            };

            match decoded {
                Decoded::Incomplete => break,
                Decoded::Broken(e) => {
                    tracing::warn!(connection = %connection.id(), error = %e, "undecodable input, disconnecting");
                    connection.disconnect();
                    break;
                }
                Decoded::PingInfo(used) => {
                    connection.input().consume(used);
                    self.answer_ping_info(connection);
                    handled += 1;
                }
                Decoded::Message { opcode, payload, used } => {
                    let outcome = self.dispatch(connection, session, opcode, &payload);
                    if outcome == MessageOutcome::NotReady {
                        return JobOutcome::NotReady;
                    }
                    connection.input().consume(used);
                    if outcome == MessageOutcome::Disconnect {
                        connection.disconnect();
                    }
                    handled += 1;
                }
            }
        }

        if handled > 0 {
            JobOutcome::Done
        } else {
            JobOutcome::Idle
        }
    }

    fn dispatch(
        &self,
        connection: &Arc<Connection>,
        session: &mut Session,
        opcode: u32,
        payload: &[u8],
    ) -> MessageOutcome {
        if opcode == PING {
            let kind = payload.first().copied().unwrap_or_default();
            connection.send(&ping_message(kind));
            return MessageOutcome::Handled;
        }

        let mut scope = ClientScope {
            server: &self.ctx,
            connection,
            session,
        };
        if opcode == SEND_COMMAND {
            match AdminCommand::decode(payload) {
                Some(command) => self.ctx.commands().dispatch(&mut scope, &command),
                None => tracing::debug!(connection = %connection.id(), "unknown or truncated command ignored"),
            }
            return MessageOutcome::Handled;
        }
        self.ctx.logic().on_message(&mut scope, opcode, payload)
    }

    fn answer_ping_info(&self, connection: &Connection) {
        let online = u32::try_from(self.ctx.registry().online_count()).unwrap_or(u32::MAX);
        let uptime = u32::try_from(self.ctx.uptime().as_secs()).unwrap_or(u32::MAX);
        connection.disable_compression();
        connection.send(&ping_info_answer(online, uptime));
        connection.disconnect();
        tracing::debug!(connection = %connection.id(), "ping info answered");
    }
}

impl JobHandler for ClientJob {
    fn run(&self, job: &Job, _: &WorkerContext<'_>) -> JobOutcome {
        let Ok(raw) = u32::try_from(job.target) else {
            return JobOutcome::Missing;
        };
        let Some(connection) = self.ctx.registry().get(ConnectionId(raw)) else {
            return JobOutcome::Missing;
        };

        if connection.is_shut_down() {
            self.ctx.release_connection(&connection);
            return JobOutcome::Finished;
        }
        if connection.is_offline() {
            return JobOutcome::Idle;
        }

        let idle_timeout = self.ctx.tunables().idle_timeout;
        if connection.idle_for() > idle_timeout {
            tracing::info!(connection = %connection.id(), idle = ?connection.idle_for(), "idle timeout");
            connection.disconnect();
            return JobOutcome::Idle;
        }

        let Some(mut session) = connection.try_session() else {
            return JobOutcome::NotReady;
        };
        // Bans that could not reach a busy session are enforced here.
        let banned = session
            .account
            .as_deref()
            .and_then(|name| self.ctx.bans().check_name(name, unix_now()));
        if let Some(ban) = banned {
            tracing::info!(connection = %connection.id(), reason = %ban.reason, "banned account, disconnecting");
            connection.send(&text_message(&format!("You are banned: {}", ban.reason)));
            connection.disconnect();
            return JobOutcome::Idle;
        }
        self.process(&connection, &mut session)
    }
}
