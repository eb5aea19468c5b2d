//! Real-time engine: render-side decks, signal graphs and mixer, plus the
//! control-side scheduler and tempo sync that drive them
//!
//! ```text
//! control thread                         audio callback
//! ┌──────────────────┐   rtrb SPSC     ┌────────────────────────────┐
//! │ LoopScheduler    │ ──commands────► │ Deck → AudioGraph ─┐       │
//! │ TempoSyncEngine  │                 │ Deck → AudioGraph ─┴► Mixer│
//! │ MixBus           │ ──atomics─────► │                            │
//! └──────────────────┘ ◄──atomics───── └────────────────────────────┘
//! ```

mod command;
mod deck;
mod engine;
mod graph;
mod mixer;
pub mod scheduler;
pub mod sync;

pub use command::*;
pub use deck::*;
pub use engine::*;
pub use graph::*;
pub use mixer::*;
pub use scheduler::{LoopScheduler, ScheduleEntry, SchedulerState};
pub use sync::{SyncConfig, SyncDeck, SyncState, SyncUpdate, TempoSyncEngine};
