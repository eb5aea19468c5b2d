//! Pitch shifting via signalsmith-stretch
//!
//! Transposes a deck's output without touching its tempo. Input and output
//! blocks always have the same length, so the stretcher runs at a 1:1 time
//! ratio and only the transpose factor changes. Loop timing is therefore
//! unaffected by pitch.

use signalsmith_stretch::Stretch;

use crate::audio::config::MAX_BUFFER_SIZE;
use crate::types::StereoBuffer;

/// Number of channels (stereo)
const CHANNELS: u32 = 2;

/// Pitch range exposed to the deck controls
pub const MAX_PITCH_SEMITONES: f32 = 8.0;

/// Tempo-independent pitch shifter
///
/// At 0 semitones the shifter is bypassed and the block passes through
/// untouched. Leaving bypass resets the stretcher so stale analysis frames
/// from an earlier shift are not replayed.
pub struct PitchShifter {
    stretcher: Stretch,
    pitch_semitones: f32,
    /// Pre-allocated copy of the block being shifted
    scratch: StereoBuffer,
}

impl PitchShifter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            stretcher: Stretch::preset_default(CHANNELS, sample_rate),
            pitch_semitones: 0.0,
            scratch: StereoBuffer::silence(MAX_BUFFER_SIZE),
        }
    }

    /// Clamp a requested shift to the supported range
    pub fn clamp_semitones(semitones: f32) -> f32 {
        if semitones.is_nan() {
            return 0.0;
        }
        semitones.clamp(-MAX_PITCH_SEMITONES, MAX_PITCH_SEMITONES)
    }

    /// Set the shift in semitones, returning the applied (clamped) value
    pub fn set_pitch_semitones(&mut self, semitones: f32) -> f32 {
        let semitones = Self::clamp_semitones(semitones);
        if semitones == self.pitch_semitones {
            return semitones;
        }
        if self.is_bypassed() {
            self.stretcher.reset();
        }
        self.pitch_semitones = semitones;
        // None for tonality_limit: no formant preservation limit
        self.stretcher
            .set_transpose_factor_semitones(semitones, None);
        semitones
    }

    pub fn pitch_semitones(&self) -> f32 {
        self.pitch_semitones
    }

    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.pitch_semitones == 0.0
    }

    /// Latency in samples while shifting
    pub fn latency(&self) -> usize {
        self.stretcher.input_latency() + self.stretcher.output_latency()
    }

    pub fn reset(&mut self) {
        self.stretcher.reset();
    }

    /// Shift a block in place
    ///
    /// Uses zero-copy format conversion via bytemuck: both buffers are viewed
    /// as interleaved f32.
    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        if self.is_bypassed() || buffer.is_empty() {
            return;
        }

        let len = buffer.len();
        self.scratch.copy_from(buffer);

        let input = self.scratch.as_interleaved();
        let output = buffer.as_interleaved_mut();
        output[..len * 2].fill(0.0);
        self.stretcher
            .process(&input[..len * 2], &mut output[..len * 2]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    #[test]
    fn test_clamps_to_range() {
        let mut shifter = PitchShifter::new(48000);
        assert_eq!(shifter.set_pitch_semitones(20.0), 8.0);
        assert_eq!(shifter.pitch_semitones(), 8.0);
        assert_eq!(shifter.set_pitch_semitones(-9.5), -8.0);
        assert_eq!(PitchShifter::clamp_semitones(f32::NAN), 0.0);
    }

    #[test]
    fn test_zero_is_bypass() {
        let mut shifter = PitchShifter::new(48000);
        assert!(shifter.is_bypassed());

        let mut buffer = StereoBuffer::from_vec(vec![StereoSample::new(0.25, -0.25); 256]);
        shifter.process(&mut buffer);
        assert!(buffer.iter().all(|s| *s == StereoSample::new(0.25, -0.25)));
    }

    #[test]
    fn test_shifted_block_keeps_length() {
        let mut shifter = PitchShifter::new(48000);
        shifter.set_pitch_semitones(3.0);
        assert!(shifter.latency() > 0);

        let mut buffer = StereoBuffer::from_vec(
            (0..512)
                .map(|i| StereoSample::mono((i as f32 * 0.05).sin() * 0.5))
                .collect(),
        );
        shifter.process(&mut buffer);
        assert_eq!(buffer.len(), 512);
    }
}
