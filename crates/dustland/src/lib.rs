//! # Dustland - The Server
//!
//! A multiplayer game server built on three libraries:
//!
//! - `dustland_core`: job queue, logic worker pool, barrier, deferred release
//! - `dustland_networking`: framing, connections, acceptor, I/O backends
//! - `dustland_persistence`: save formats and the save thread
//!
//! This crate supplies what they schedule and save: the connection and
//! entity jobs, the ban list, the administrative command table, and the
//! control loop that freezes the pool for saves and reloads.
//!
//! ## Threads
//!
//! ```text
//!   acceptor ──> registry ──> I/O backend
//!                   │
//!             Client jobs ──┐
//!   world ──> Critter/Map ──┼──> JobQueue ──> logic-N ──> GameLogic
//!   periodic passes ────────┘        ▲
//!                                    │ Synchronize x N
//!   control loop ── barrier ─────────┘──> SaveBatch ──> world-save
//! ```
//!
//! ## Game content
//!
//! Everything the scheduler does not own lives behind [`GameLogic`].
//! [`BasicLogic`] is the stock implementation: it echoes messages, keeps
//! game variables and time events, and answers the player commands.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod bans;
pub mod commands;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod jobs;
pub mod logic;
pub mod server;
pub mod world;

pub use bans::{BanEntry, BanList};
pub use commands::{CommandHandler, CommandTable};
pub use config::{ServerConfig, Tunables};
pub use context::ServerContext;
pub use control::ControlLoop;
pub use error::{ConfigError, ConfigResult, ServerError, ServerResult};
pub use logic::{BasicLogic, ClientScope, GameLogic, LogicStats, MessageOutcome, TickOutcome};
pub use server::Server;
pub use world::{Entity, EntityKind, EntityRecord, World};
