//! # Administrative Commands
//!
//! `SEND_COMMAND` payloads decode to an [`AdminCommand`]. A table built once
//! at startup maps command ids to the handlers the server owns; every other
//! command goes to [`GameLogic::on_command`](crate::logic::GameLogic::on_command).
//!
//! | command | owner |
//! |---|---|
//! | Exit | server: disconnect the caller |
//! | ReloadScripts, ReloadProtos, ReloadDialogs, ReloadTexts | server: hot reload behind the barrier |
//! | Ban | server: ban list |
//! | everything else | game logic |

use std::time::Duration;

use dustland_networking::protocol::text_message;
use dustland_networking::{AdminCommand, CommandId, Session};

use crate::bans::{unix_now, BanEntry};
use crate::logic::ClientScope;

/// How long a ban waits for the target's own job to release its session.
const SESSION_WAIT: Duration = Duration::from_millis(250);

/// A server-owned command handler.
pub type CommandHandler = fn(&mut ClientScope<'_>, &AdminCommand);

/// Command id to handler lookup.
pub struct CommandTable {
    handlers: [Option<CommandHandler>; 256],
}

impl CommandTable {
    /// A table with no server-owned commands.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: [None; 256],
        }
    }

    /// The server's own commands.
    #[must_use]
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(CommandId::Exit, exit);
        for id in [
            CommandId::ReloadScripts,
            CommandId::ReloadProtos,
            CommandId::ReloadDialogs,
            CommandId::ReloadTexts,
        ] {
            table.register(id, request_reload);
        }
        table.register(CommandId::Ban, ban);
        table
    }

    /// Sets the handler for `id`, replacing any previous one.
    pub fn register(&mut self, id: CommandId, handler: CommandHandler) {
        self.handlers[id as usize] = Some(handler);
    }

    /// Whether the server owns `id`.
    #[must_use]
    pub fn owns(&self, id: CommandId) -> bool {
        self.handlers[id as usize].is_some()
    }

    /// Runs one command for the client in `scope`.
    ///
    /// Commands other than the player-level ones need an admin session.
    pub fn dispatch(&self, scope: &mut ClientScope<'_>, command: &AdminCommand) {
        let id = command.id();
        if requires_admin(id) && !scope.session.admin {
            tracing::info!(connection = %scope.connection.id(), command = ?id, "command refused");
            scope.reply("Access denied.");
            return;
        }
        tracing::debug!(connection = %scope.connection.id(), command = ?id, "command");
        let server = scope.server;
        match self.handlers[id as usize] {
            Some(handler) => handler(scope, command),
            None => server.logic().on_command(scope, command),
        }
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let owned = self.handlers.iter().filter(|h| h.is_some()).count();
        f.debug_struct("CommandTable").field("owned", &owned).finish()
    }
}

/// Commands any player may send.
fn requires_admin(id: CommandId) -> bool {
    !matches!(
        id,
        CommandId::Exit
            | CommandId::MyInfo
            | CommandId::GameInfo
            | CommandId::GetAccess
            | CommandId::ChangePassword
            | CommandId::DeleteAccount
    )
}

fn exit(scope: &mut ClientScope<'_>, _: &AdminCommand) {
    scope.connection.disconnect();
}

fn request_reload(scope: &mut ClientScope<'_>, _: &AdminCommand) {
    scope.server.request_reload();
    scope.reply("Reload scheduled.");
}

fn bound_to(session: &Session, name: &str) -> bool {
    session.account.as_deref().is_some_and(|account| account.eq_ignore_ascii_case(name))
}

fn ban(scope: &mut ClientScope<'_>, command: &AdminCommand) {
    let AdminCommand::Ban { name, params, hours, info } = command else {
        return;
    };
    let bans = scope.server.bans();
    match params.trim().to_ascii_lowercase().as_str() {
        "list" => {
            let entries = bans.entries();
            if entries.is_empty() {
                scope.reply("Ban list empty.");
            }
            for (index, entry) in entries.iter().enumerate() {
                scope.reply(&format!(
                    "{}: {} {:?} until {} by {}: {}",
                    index + 1,
                    entry.name,
                    entry.ip,
                    entry.expires_at,
                    entry.banned_by,
                    entry.reason
                ));
            }
        }
        mode @ ("add" | "add+") => {
            if name.is_empty() || *hours == 0 {
                scope.reply("Invalid arguments.");
                return;
            }
            let online = scope.server.registry().snapshot().into_iter().find(|c| {
                c.id() != scope.connection.id()
                    && c.try_session_for(SESSION_WAIT).is_some_and(|s| bound_to(&s, name))
            });
            let ip = if mode == "add+" { online.as_ref().map(|c| c.peer().ip()) } else { None };
            bans.add(BanEntry {
                name: name.clone(),
                ip,
                expires_at: unix_now() + u64::from(*hours) * 3600,
                banned_by: scope.session.account.clone().unwrap_or_default(),
                reason: info.clone(),
            });
            if let Some(target) = online {
                target.send(&text_message(&format!("You are banned: {info}")));
                target.disconnect();
            }
            scope.reply("User banned.");
        }
        "delete" => {
            if name.is_empty() {
                scope.reply("Invalid arguments.");
                return;
            }
            // "*" removes by position in the listing, 1-based.
            let removed = if name == "*" {
                usize::try_from(*hours)
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|index| bans.remove_index(index))
                    .map_or(0, |_| 1)
            } else {
                bans.remove_name(name)
            };
            if removed == 0 {
                scope.reply("User not found.");
            } else {
                scope.reply("User unbanned.");
            }
        }
        _ => {
            scope.reply("Unknown option.");
        }
    }
}
