//! CPAL output stream hosting the render engine
//!
//! ```text
//! ┌──────────────────┐   push()   ┌──────────────────┐
//! │  Control thread  │──────────► │ per-deck command │
//! │  (25ms ticks)    │            │ queues (SPSC)    │
//! └──────────────────┘            └────────┬─────────┘
//!          ▲                               │ pop()
//!          │ relaxed atomics               ▼
//! ┌──────────────────┐            ┌──────────────────┐
//! │   DeckAtomics    │◄───────────│ CPAL callback    │
//! │   MixParams      │            │ (owns engine)    │
//! └──────────────────┘            └──────────────────┘
//! ```
//!
//! The engine is moved into the callback closure, so the audio thread is its
//! only owner and no lock sits on the render path.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use super::config::{AudioConfig, MAX_BUFFER_SIZE};
use super::device::{find_device_by_id, get_default_device};
use super::error::{AudioError, AudioResult};
use crate::context::AudioContext;
use crate::engine::{AudioEngine, EngineLink};
use crate::types::{StereoBuffer, DEFAULT_SAMPLE_RATE};

/// Keeps the output stream alive; drop it to stop audio
pub struct AudioHandle {
    _stream: Stream,
    ctx: AudioContext,
    sample_rate: u32,
    buffer_size: u32,
}

impl AudioHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Negotiated buffer size in frames
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// One-way output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

impl Drop for AudioHandle {
    fn drop(&mut self) {
        self.ctx.suspend();
        log::info!("Audio stream stopped");
    }
}

/// Everything the control side needs once audio is running
pub struct AudioSystemResult {
    pub handle: AudioHandle,
    pub context: AudioContext,
    pub link: EngineLink,
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub latency_ms: f32,
}

/// Open the configured device, build the engine and start streaming
///
/// The returned context is resumed once the stream plays; until then
/// `play()` calls are rejected.
pub fn start_audio_system(config: &AudioConfig) -> AudioResult<AudioSystemResult> {
    let device = match &config.device {
        Some(id) => find_device_by_id(id)?,
        None => get_default_device()?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let (supported, buffer_size) = get_output_config(&device, config)?;
    let sample_rate = supported.sample_rate().0;
    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(buffer_size),
    };
    let latency_ms = config.buffer_size.latency_ms(sample_rate);

    log::info!(
        "Audio config: {} channels, {}Hz, {} frames (~{:.1}ms latency)",
        stream_config.channels,
        sample_rate,
        buffer_size,
        latency_ms
    );

    let context = AudioContext::new(sample_rate);
    let (engine, link) = AudioEngine::new(context.clone());
    let callback = OutputCallback::new(engine);

    let stream = build_output_stream(&device, &stream_config, callback)?;
    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;
    context.resume();
    log::info!("Audio stream started");

    Ok(AudioSystemResult {
        handle: AudioHandle {
            _stream: stream,
            ctx: context.clone(),
            sample_rate,
            buffer_size,
        },
        context,
        link,
        sample_rate,
        buffer_size,
        latency_ms,
    })
}

/// Pick an f32 stereo config at the preferred rate
///
/// Returns the config and the buffer size in frames.
fn get_output_config(
    device: &cpal::Device,
    config: &AudioConfig,
) -> AudioResult<(cpal::SupportedStreamConfig, u32)> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    if supported.is_empty() {
        return Err(AudioError::UnsupportedFormat(
            "device offers no f32 output".to_string(),
        ));
    }

    let target_rate = config.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    let in_range =
        |c: &cpal::SupportedStreamConfigRange| (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_rate);

    let best = supported
        .iter()
        .find(|c| c.channels() >= 2 && in_range(c))
        .or_else(|| supported.iter().find(|c| c.channels() >= 2))
        .or_else(|| supported.first())
        .ok_or_else(|| AudioError::ConfigError("No suitable output configuration".to_string()))?;

    let sample_rate = if in_range(best) {
        cpal::SampleRate(target_rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "Device doesn't support {}Hz, using {}Hz",
            target_rate,
            fallback.0
        );
        fallback
    };

    let buffer_size = config.buffer_size.frames();
    log::debug!(
        "Selected buffer size: {} frames for {:?}",
        buffer_size,
        config.buffer_size
    );

    Ok((best.clone().with_sample_rate(sample_rate), buffer_size))
}

/// Render state owned by the stream callback
pub(crate) struct OutputCallback {
    engine: AudioEngine,
    master: StereoBuffer,
}

impl OutputCallback {
    pub(crate) fn new(engine: AudioEngine) -> Self {
        Self {
            engine,
            master: StereoBuffer::silence(MAX_BUFFER_SIZE),
        }
    }

    /// Fill an interleaved device buffer with `channels` channels
    ///
    /// Devices that ask for more than [`MAX_BUFFER_SIZE`] frames are served
    /// in chunks. Channels past the first two are silent.
    pub(crate) fn render(&mut self, data: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        for chunk in data.chunks_mut(MAX_BUFFER_SIZE * channels) {
            let n_frames = chunk.len() / channels;
            self.master.set_len_from_capacity(n_frames);
            self.engine.process(&mut self.master);

            for (frame, sample) in chunk.chunks_mut(channels).zip(self.master.iter()) {
                frame[0] = sample.left;
                if channels > 1 {
                    frame[1] = sample.right;
                }
                for ch in frame.iter_mut().skip(2) {
                    *ch = 0.0;
                }
            }
        }
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut callback: OutputCallback,
) -> AudioResult<Stream> {
    let channels = config.channels as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                callback.render(data, channels);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::PcmBuffer;
    use crate::engine::EngineCommand;
    use basedrop::Shared;

    #[test]
    fn test_render_interleaves_and_silences_extra_channels() {
        let ctx = AudioContext::new(48000);
        let (engine, mut link) = AudioEngine::new(ctx.clone());
        let pcm = Shared::new(ctx.gc_handle(), PcmBuffer::mono(48000, vec![0.25; 48000]));
        link.commands[0].send(EngineCommand::LoadTrack { pcm }).unwrap();
        link.commands[0]
            .send(EngineCommand::Play {
                at_frame: 0,
                from: Some(0.0),
            })
            .unwrap();

        let mut callback = OutputCallback::new(engine);
        let mut data = vec![1.0f32; 64 * 4];
        callback.render(&mut data, 4);

        for frame in data.chunks(4) {
            assert!((frame[0] - 0.25).abs() < 1e-6);
            assert!((frame[1] - 0.25).abs() < 1e-6);
            assert_eq!(frame[2], 0.0);
            assert_eq!(frame[3], 0.0);
        }
        assert_eq!(ctx.frame_clock().frames(), 64);
    }

    #[test]
    fn test_oversized_device_buffer_is_chunked() {
        let ctx = AudioContext::new(48000);
        let (engine, _link) = AudioEngine::new(ctx.clone());
        let mut callback = OutputCallback::new(engine);

        let frames = MAX_BUFFER_SIZE + 100;
        let mut data = vec![0.5f32; frames * 2];
        callback.render(&mut data, 2);

        assert!(data.iter().all(|&s| s == 0.0));
        assert_eq!(ctx.frame_clock().frames(), frames as u64);
    }
}
