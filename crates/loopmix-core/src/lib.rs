//! Loopmix Core - Dual-deck loop mixing engine
//!
//! The engine is split into two execution contexts:
//! - **Render path** ([`engine::AudioEngine`]): owned by the audio callback,
//!   never blocks, allocates or locks
//! - **Control path** ([`controller::Console`]): loop scheduling, tempo sync
//!   ramps and parameter setters, ticked by a [`controller::ControlThread`]
//!
//! Control talks to render through per-deck lock-free command queues and
//! atomic parameter snapshots. Everything that needs the output sample rate
//! or the render clock receives an explicit [`context::AudioContext`].

pub mod analysis;
pub mod audio;
pub mod audio_file;
pub mod config;
pub mod context;
pub mod controller;
pub mod engine;
pub mod error;
pub mod loader;
pub mod timestretch;
pub mod track;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use types::*;
