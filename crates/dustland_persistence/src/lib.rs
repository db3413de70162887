//! # Dustland Persistence - The Archive
//!
//! Save formats and the thread that puts them on disk.
//!
//! ## Flow
//!
//! ```text
//!   world frozen ──> SaveBatch (chunked SaveBuffers + ClientRecords)
//!   world resumes
//!   "world-save" ──> world_NNNN.sav.tmp ──rename──> world_NNNN.sav
//!               └──> <name>.client.tmp  ──rename──> <name>.client
//! ```
//!
//! ## Guarantees
//!
//! - The barrier is held only while a batch is filled in memory
//! - A file is replaced only after its successor is fully written and synced
//! - Loading picks the newest save that passes every check

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod client_record;
pub mod error;
pub mod pipeline;
pub mod save_buffer;
pub mod store;
pub mod world_file;

pub use client_record::{ClientRecord, ClientStore, TimeEvent};
pub use error::{PersistenceError, PersistenceResult};
pub use pipeline::{PipelineState, PipelineStats, SaveBatch, SavePipeline};
pub use save_buffer::{SaveBuffer, CHUNK_SIZE};
pub use store::WorldStore;
pub use world_file::{read_world, write_world, LoadedWorld, SectionKind, Sections, WORLD_VERSION};
