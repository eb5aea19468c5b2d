//! Audio file decoding
//!
//! Decodes any container/codec symphonia supports into planar `f32` PCM at
//! the file's own sample rate. Resampling is not done here; decks read the
//! buffer with a rate step that absorbs the difference to the output rate.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::types::{StereoSample, StereoBuffer};

/// Errors that can occur while decoding audio
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Container or codec not recognised
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Stream recognised but produced no decodable audio
    #[error("Corrupt audio data: {0}")]
    Corrupt(String),

    #[error("Decoding was cancelled")]
    Cancelled,
}

/// Decoded audio, one `Vec<f32>` per channel
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl PcmBuffer {
    /// Shorter channels are padded with silence to the longest one
    pub fn new(sample_rate: u32, mut channels: Vec<Vec<f32>>) -> Self {
        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        for channel in &mut channels {
            channel.resize(frames, 0.0);
        }
        Self {
            sample_rate,
            channels,
        }
    }

    /// Mono buffer, mostly for tests and generated material
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(sample_rate, vec![samples])
    }

    /// Frames per channel
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// First channel, the one boundary analysis looks at
    pub fn first_channel(&self) -> &[f32] {
        self.channels.first().map_or(&[], Vec::as_slice)
    }

    /// Stereo frame at `index`; mono is duplicated, extra channels ignored
    #[inline]
    pub fn frame(&self, index: usize) -> StereoSample {
        match self.channels.as_slice() {
            [] => StereoSample::silence(),
            [mono] => StereoSample::mono(mono[index]),
            [left, right, ..] => StereoSample::new(left[index], right[index]),
        }
    }

    /// Copy out as an interleaved stereo buffer
    pub fn to_stereo(&self) -> StereoBuffer {
        StereoBuffer::from_vec((0..self.len()).map(|i| self.frame(i)).collect())
    }
}

/// Decode a file from disk
pub fn decode_file(path: &Path, cancel: &AtomicBool) -> Result<PcmBuffer, DecodeError> {
    let file = File::open(path).map_err(|e| DecodeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    log::debug!("Decoding {}", path.display());
    decode_source(Box::new(file), hint, cancel)
}

/// Decode an in-memory file (e.g. fetched over the network)
pub fn decode_bytes(
    bytes: Vec<u8>,
    extension: Option<&str>,
    cancel: &AtomicBool,
) -> Result<PcmBuffer, DecodeError> {
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }
    decode_source(Box::new(Cursor::new(bytes)), hint, cancel)
}

fn decode_source(
    source: Box<dyn MediaSource>,
    hint: Hint,
    cancel: &AtomicBool,
) -> Result<PcmBuffer, DecodeError> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::UnsupportedFormat("No audio track found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::UnsupportedFormat("Unknown sample rate".to_string()))?;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut channels: Vec<Vec<f32>> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut bad_packets = 0usize;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(DecodeError::Cancelled);
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                log::warn!("Error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                bad_packets += 1;
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
        };

        // Recreate the conversion buffer if a packet is larger than any before
        let packet_channels = decoded.spec().channels.count().max(1);
        let needed = decoded.capacity() * packet_channels;
        let needs_alloc = sample_buf
            .as_ref()
            .map_or(true, |buf| buf.capacity() < needed);
        if needs_alloc {
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, *decoded.spec()));
        }

        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            deinterleave_into(&mut channels, buf.samples(), packet_channels);
        }
    }

    let pcm = PcmBuffer::new(sample_rate, channels);
    if pcm.is_empty() {
        return Err(DecodeError::Corrupt(format!(
            "no decodable audio frames ({} bad packets)",
            bad_packets
        )));
    }

    log::debug!(
        "Decoded {} frames x {} channels @ {} Hz",
        pcm.len(),
        pcm.channel_count(),
        pcm.sample_rate
    );
    Ok(pcm)
}

/// Append interleaved samples, keeping every channel the same length
///
/// Channels a packet does not carry are filled with silence.
fn deinterleave_into(channels: &mut Vec<Vec<f32>>, samples: &[f32], channel_count: usize) {
    let start = channels.first().map_or(0, Vec::len);
    if channels.len() < channel_count {
        channels.resize(channel_count, vec![0.0; start]);
    }
    for (i, sample) in samples.iter().enumerate() {
        channels[i % channel_count].push(*sample);
    }
    let end = start + samples.len() / channel_count;
    for channel in channels.iter_mut() {
        channel.resize(end, 0.0);
    }
}
