//! # Administrative Commands
//!
//! Carried inside [`SEND_COMMAND`](super::SEND_COMMAND) messages:
//!
//! ```text
//!  ┌──────────────┬─────────────────────────────────┐
//!  │ u8 commandId │ arguments (fixed or len-prefixed)│
//!  └──────────────┴─────────────────────────────────┘
//! ```
//!
//! Unknown ids and truncated argument lists decode to `None` and are
//! ignored by the server.

use super::serialization::{MessageReader, MessageWriter};
use super::SEND_COMMAND;

/// Size of a password hash on the wire.
pub const PASS_HASH_SIZE: usize = 32;

/// A password hash as sent by the client.
pub type PassHash = [u8; PASS_HASH_SIZE];

/// Command ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    /// Leave the game.
    Exit = 1,
    /// Describe the caller.
    MyInfo = 2,
    /// Server statistics.
    GameInfo = 3,
    /// Resolve a critter name to an id.
    CritId = 4,
    /// Teleport a critter.
    MoveCrit = 5,
    /// Disconnect a critter.
    DisconCrit = 7,
    /// Send the caller to the global map.
    ToGlobal = 8,
    /// Set a critter property.
    Property = 10,
    /// Request elevated access.
    GetAccess = 11,
    /// Spawn an item on the map.
    AddItem = 12,
    /// Spawn an item in the caller's inventory.
    AddItemSelf = 14,
    /// Spawn a non-player critter.
    AddNpc = 15,
    /// Spawn a location.
    AddLocation = 16,
    /// Reload server scripts.
    ReloadScripts = 17,
    /// Rebuild client scripts.
    ReloadClientScripts = 19,
    /// Run a script function.
    RunScript = 20,
    /// Reload prototypes.
    ReloadProtos = 21,
    /// Regenerate the caller's map.
    RegenMap = 25,
    /// Reload all dialogs.
    ReloadDialogs = 26,
    /// Load one dialog.
    LoadDialog = 27,
    /// Reload text packs.
    ReloadTexts = 28,
    /// Change game time.
    SetTime = 32,
    /// Ban management.
    Ban = 33,
    /// Delete the caller's account.
    DeleteAccount = 34,
    /// Change the caller's password.
    ChangePassword = 35,
    /// Drop the caller's unique id.
    DropUid = 36,
    /// Attach or detach the log stream.
    Log = 37,
    /// Execute developer code.
    DevExec = 38,
    /// Call a developer function.
    DevFunc = 39,
    /// Read a developer global.
    DevGvar = 40,
}

impl TryFrom<u8> for CommandId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            1 => Self::Exit,
            2 => Self::MyInfo,
            3 => Self::GameInfo,
            4 => Self::CritId,
            5 => Self::MoveCrit,
            7 => Self::DisconCrit,
            8 => Self::ToGlobal,
            10 => Self::Property,
            11 => Self::GetAccess,
            12 => Self::AddItem,
            14 => Self::AddItemSelf,
            15 => Self::AddNpc,
            16 => Self::AddLocation,
            17 => Self::ReloadScripts,
            19 => Self::ReloadClientScripts,
            20 => Self::RunScript,
            21 => Self::ReloadProtos,
            25 => Self::RegenMap,
            26 => Self::ReloadDialogs,
            27 => Self::LoadDialog,
            28 => Self::ReloadTexts,
            32 => Self::SetTime,
            33 => Self::Ban,
            34 => Self::DeleteAccount,
            35 => Self::ChangePassword,
            36 => Self::DropUid,
            37 => Self::Log,
            38 => Self::DevExec,
            39 => Self::DevFunc,
            40 => Self::DevGvar,
            other => return Err(other),
        })
    }
}

/// Game time set by [`AdminCommand::SetTime`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GameTime {
    /// Game seconds per real second.
    pub multiplier: i32,
    /// Year.
    pub year: i32,
    /// Month.
    pub month: i32,
    /// Day.
    pub day: i32,
    /// Hour.
    pub hour: i32,
    /// Minute.
    pub minute: i32,
    /// Second.
    pub second: i32,
}

/// A decoded command with its arguments.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCommand {
    Exit,
    MyInfo,
    GameInfo { kind: i32 },
    CritId { name: String },
    MoveCrit {
        critter: u32,
        hex_x: u16,
        hex_y: u16,
    },
    DisconCrit { critter: u32 },
    ToGlobal,
    Property {
        critter: u32,
        name: String,
        value: i32,
    },
    GetAccess { name: String, password: String },
    AddItem {
        hex_x: u16,
        hex_y: u16,
        proto: u32,
        count: u32,
    },
    AddItemSelf { proto: u32, count: u32 },
    AddNpc {
        hex_x: u16,
        hex_y: u16,
        dir: u8,
        proto: u32,
    },
    AddLocation {
        world_x: u16,
        world_y: u16,
        proto: u32,
    },
    ReloadScripts,
    ReloadClientScripts,
    RunScript { function: String, args: [u32; 3] },
    ReloadProtos,
    RegenMap,
    ReloadDialogs,
    LoadDialog { name: String },
    ReloadTexts,
    SetTime(GameTime),
    Ban {
        name: String,
        params: String,
        hours: u32,
        info: String,
    },
    DeleteAccount { pass_hash: PassHash },
    ChangePassword {
        pass_hash: PassHash,
        new_pass_hash: PassHash,
    },
    DropUid,
    Log { flags: String },
    DevExec { text: String },
    DevFunc { text: String },
    DevGvar { text: String },
}

impl AdminCommand {
    /// The id this command travels under.
    #[must_use]
    pub fn id(&self) -> CommandId {
        match self {
            Self::Exit => CommandId::Exit,
            Self::MyInfo => CommandId::MyInfo,
            Self::GameInfo { .. } => CommandId::GameInfo,
            Self::CritId { .. } => CommandId::CritId,
            Self::MoveCrit { .. } => CommandId::MoveCrit,
            Self::DisconCrit { .. } => CommandId::DisconCrit,
            Self::ToGlobal => CommandId::ToGlobal,
            Self::Property { .. } => CommandId::Property,
            Self::GetAccess { .. } => CommandId::GetAccess,
            Self::AddItem { .. } => CommandId::AddItem,
            Self::AddItemSelf { .. } => CommandId::AddItemSelf,
            Self::AddNpc { .. } => CommandId::AddNpc,
            Self::AddLocation { .. } => CommandId::AddLocation,
            Self::ReloadScripts => CommandId::ReloadScripts,
            Self::ReloadClientScripts => CommandId::ReloadClientScripts,
            Self::RunScript { .. } => CommandId::RunScript,
            Self::ReloadProtos => CommandId::ReloadProtos,
            Self::RegenMap => CommandId::RegenMap,
            Self::ReloadDialogs => CommandId::ReloadDialogs,
            Self::LoadDialog { .. } => CommandId::LoadDialog,
            Self::ReloadTexts => CommandId::ReloadTexts,
            Self::SetTime(_) => CommandId::SetTime,
            Self::Ban { .. } => CommandId::Ban,
            Self::DeleteAccount { .. } => CommandId::DeleteAccount,
            Self::ChangePassword { .. } => CommandId::ChangePassword,
            Self::DropUid => CommandId::DropUid,
            Self::Log { .. } => CommandId::Log,
            Self::DevExec { .. } => CommandId::DevExec,
            Self::DevFunc { .. } => CommandId::DevFunc,
            Self::DevGvar { .. } => CommandId::DevGvar,
        }
    }

    /// Decodes the payload of a `SEND_COMMAND` message.
    #[must_use]
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let mut r = MessageReader::new(payload);
        let id = CommandId::try_from(r.read_u8()?).ok()?;
        let command = match id {
            CommandId::Exit => Self::Exit,
            CommandId::MyInfo => Self::MyInfo,
            CommandId::GameInfo => Self::GameInfo {
                kind: r.read_i32()?,
            },
            CommandId::CritId => Self::CritId {
                name: r.read_string()?,
            },
            CommandId::MoveCrit => Self::MoveCrit {
                critter: r.read_u32()?,
                hex_x: r.read_u16()?,
                hex_y: r.read_u16()?,
            },
            CommandId::DisconCrit => Self::DisconCrit {
                critter: r.read_u32()?,
            },
            CommandId::ToGlobal => Self::ToGlobal,
            CommandId::Property => Self::Property {
                critter: r.read_u32()?,
                name: r.read_string()?,
                value: r.read_i32()?,
            },
            CommandId::GetAccess => Self::GetAccess {
                name: r.read_string()?,
                password: r.read_string()?,
            },
            CommandId::AddItem => Self::AddItem {
                hex_x: r.read_u16()?,
                hex_y: r.read_u16()?,
                proto: r.read_u32()?,
                count: r.read_u32()?,
            },
            CommandId::AddItemSelf => Self::AddItemSelf {
                proto: r.read_u32()?,
                count: r.read_u32()?,
            },
            CommandId::AddNpc => Self::AddNpc {
                hex_x: r.read_u16()?,
                hex_y: r.read_u16()?,
                dir: r.read_u8()?,
                proto: r.read_u32()?,
            },
            CommandId::AddLocation => Self::AddLocation {
                world_x: r.read_u16()?,
                world_y: r.read_u16()?,
                proto: r.read_u32()?,
            },
            CommandId::ReloadScripts => Self::ReloadScripts,
            CommandId::ReloadClientScripts => Self::ReloadClientScripts,
            CommandId::RunScript => Self::RunScript {
                function: r.read_string()?,
                args: [r.read_u32()?, r.read_u32()?, r.read_u32()?],
            },
            CommandId::ReloadProtos => Self::ReloadProtos,
            CommandId::RegenMap => Self::RegenMap,
            CommandId::ReloadDialogs => Self::ReloadDialogs,
            CommandId::LoadDialog => Self::LoadDialog {
                name: r.read_string()?,
            },
            CommandId::ReloadTexts => Self::ReloadTexts,
            CommandId::SetTime => Self::SetTime(GameTime {
                multiplier: r.read_i32()?,
                year: r.read_i32()?,
                month: r.read_i32()?,
                day: r.read_i32()?,
                hour: r.read_i32()?,
                minute: r.read_i32()?,
                second: r.read_i32()?,
            }),
            CommandId::Ban => Self::Ban {
                name: r.read_string()?,
                params: r.read_string()?,
                hours: r.read_u32()?,
                info: r.read_string()?,
            },
            CommandId::DeleteAccount => Self::DeleteAccount {
                pass_hash: r.read_array()?,
            },
            CommandId::ChangePassword => Self::ChangePassword {
                pass_hash: r.read_array()?,
                new_pass_hash: r.read_array()?,
            },
            CommandId::DropUid => Self::DropUid,
            CommandId::Log => Self::Log {
                flags: r.read_string()?,
            },
            CommandId::DevExec => Self::DevExec {
                text: r.read_string()?,
            },
            CommandId::DevFunc => Self::DevFunc {
                text: r.read_string()?,
            },
            CommandId::DevGvar => Self::DevGvar {
                text: r.read_string()?,
            },
        };
        Some(command)
    }

    /// Encodes a complete `SEND_COMMAND` message.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = MessageWriter::new(SEND_COMMAND);
        w.write_u8(self.id() as u8);
        match self {
            Self::Exit
            | Self::MyInfo
            | Self::ToGlobal
            | Self::ReloadScripts
            | Self::ReloadClientScripts
            | Self::ReloadProtos
            | Self::RegenMap
            | Self::ReloadDialogs
            | Self::ReloadTexts
            | Self::DropUid => {}
            Self::GameInfo { kind } => {
                w.write_i32(*kind);
            }
            Self::CritId { name } | Self::LoadDialog { name } => {
                w.write_str(name);
            }
            Self::MoveCrit { critter, hex_x, hex_y } => {
                w.write_u32(*critter).write_u16(*hex_x).write_u16(*hex_y);
            }
            Self::DisconCrit { critter } => {
                w.write_u32(*critter);
            }
            Self::Property { critter, name, value } => {
                w.write_u32(*critter).write_str(name).write_i32(*value);
            }
            Self::GetAccess { name, password } => {
                w.write_str(name).write_str(password);
            }
            Self::AddItem { hex_x, hex_y, proto, count } => {
                w.write_u16(*hex_x).write_u16(*hex_y).write_u32(*proto).write_u32(*count);
            }
            Self::AddItemSelf { proto, count } => {
                w.write_u32(*proto).write_u32(*count);
            }
            Self::AddNpc { hex_x, hex_y, dir, proto } => {
                w.write_u16(*hex_x).write_u16(*hex_y).write_u8(*dir).write_u32(*proto);
            }
            Self::AddLocation { world_x, world_y, proto } => {
                w.write_u16(*world_x).write_u16(*world_y).write_u32(*proto);
            }
            Self::RunScript { function, args } => {
                w.write_str(function);
                for arg in args {
                    w.write_u32(*arg);
                }
            }
            Self::SetTime(t) => {
                for value in [t.multiplier, t.year, t.month, t.day, t.hour, t.minute, t.second] {
                    w.write_i32(value);
                }
            }
            Self::Ban { name, params, hours, info } => {
                w.write_str(name).write_str(params).write_u32(*hours).write_str(info);
            }
            Self::DeleteAccount { pass_hash } => {
                w.write_bytes(pass_hash);
            }
            Self::ChangePassword { pass_hash, new_pass_hash } => {
                w.write_bytes(pass_hash).write_bytes(new_pass_hash);
            }
            Self::Log { flags } => {
                w.write_str(flags);
            }
            Self::DevExec { text } | Self::DevFunc { text } | Self::DevGvar { text } => {
                w.write_str(text);
            }
        }
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_frame, Frame, HEADER_SIZE};

    fn payload_of(message: &[u8]) -> &[u8] {
        match decode_frame(message, usize::MAX).unwrap().unwrap().0 {
            Frame::Message { opcode, payload } => {
                assert_eq!(opcode, SEND_COMMAND);
                payload
            }
            Frame::PingInfo => panic!("not a command"),
        }
    }

    #[test]
    fn test_move_crit_layout() {
        let bytes = AdminCommand::MoveCrit { critter: 0x0102_0304, hex_x: 10, hex_y: 20 }.encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 1 + 4 + 2 + 2);
        assert_eq!(bytes[HEADER_SIZE], 5);
        assert_eq!(&bytes[HEADER_SIZE + 1..HEADER_SIZE + 5], &[4, 3, 2, 1]);
    }

    #[test]
    fn test_decode_ban() {
        let command = AdminCommand::Ban {
            name: "raider".into(),
            params: "add".into(),
            hours: 48,
            info: "griefing".into(),
        };
        let bytes = command.encode();
        assert_eq!(AdminCommand::decode(payload_of(&bytes)), Some(command));
    }

    #[test]
    fn test_unknown_id_ignored() {
        assert_eq!(AdminCommand::decode(&[6]), None);
        assert_eq!(AdminCommand::decode(&[200, 1, 2, 3]), None);
        assert_eq!(AdminCommand::decode(&[]), None);
    }

    #[test]
    fn test_truncated_arguments_ignored() {
        let time = GameTime {
            multiplier: 20,
            year: 2246,
            ..GameTime::default()
        };
        let bytes = AdminCommand::SetTime(time).encode();
        let payload = payload_of(&bytes);
        assert!(AdminCommand::decode(payload).is_some());
        assert_eq!(AdminCommand::decode(&payload[..payload.len() - 1]), None);
    }

    #[test]
    fn test_password_hash_is_raw() {
        let command = AdminCommand::ChangePassword {
            pass_hash: [1; 32],
            new_pass_hash: [2; 32],
        };
        let bytes = command.encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 1 + 64);
        assert_eq!(AdminCommand::decode(payload_of(&bytes)), Some(command));
    }

    #[test]
    fn test_id_table_is_consistent() {
        for raw in 0..=u8::MAX {
            if let Ok(id) = CommandId::try_from(raw) {
                assert_eq!(id as u8, raw);
            }
        }
    }
}
