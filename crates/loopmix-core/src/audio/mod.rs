//! Audio output backend
//!
//! A single cpal output stream hosts the render-side
//! [`AudioEngine`](crate::engine::AudioEngine). Starting the system returns
//! the stream handle, the [`AudioContext`](crate::context::AudioContext) it
//! runs on and the [`EngineLink`](crate::engine::EngineLink) the control side
//! drives it through.
//!
//! ```ignore
//! let audio = start_audio_system(&config.audio)?;
//! let console = Console::new(audio.context.clone(), audio.link, &config);
//! ```

pub mod config;
mod cpal_backend;
mod device;
mod error;

pub use config::{
    AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE, LOW_LATENCY_BUFFER_SIZE,
    MAX_BUFFER_SIZE,
};
pub use cpal_backend::{start_audio_system, AudioHandle, AudioSystemResult};
pub use device::{find_device_by_id, get_default_device, get_output_devices, AudioDevice};
pub use error::{AudioError, AudioResult};
