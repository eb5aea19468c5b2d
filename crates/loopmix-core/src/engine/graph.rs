//! Per-deck signal chain
//!
//! ```text
//! source → low-cut (HP) → high-cut (LP) → pitch shift → gain → analyzer → mix bus
//! ```
//!
//! The control side writes targets into [`GraphParams`]; the render side
//! [`AudioGraph`] reads them once per block and smooths every change:
//! filter cutoffs glide exponentially over the configured ramp time, gain
//! ramps linearly across one block.

use std::sync::Arc;

use crate::timestretch::PitchShifter;
use crate::types::{AtomicF32, StereoBuffer};

use super::DeckAtomics;

/// Cutoff at which the low-cut filter is fully open
pub const LOW_CUT_OPEN_HZ: f32 = 20.0;
/// Cutoff at which the high-cut filter is fully open
pub const HIGH_CUT_OPEN_HZ: f32 = 20000.0;
/// Default cutoff glide time
pub const DEFAULT_FILTER_RAMP_MS: f32 = 15.0;

/// Butterworth Q for both filters
const FILTER_Q: f32 = 0.707;
/// Filter coefficients are recomputed every this many samples while gliding
const COEFF_STEP: usize = 16;

/// Control → render parameter snapshot for one deck
///
/// Every field is an independent relaxed atomic; the render path picks up
/// whatever values are current at the start of a block.
#[derive(Debug)]
pub struct GraphParams {
    volume: AtomicF32,
    crossfade_gain: AtomicF32,
    low_cut_hz: AtomicF32,
    high_cut_hz: AtomicF32,
    filter_ramp_ms: AtomicF32,
    pitch_semitones: AtomicF32,
    playback_rate: AtomicF32,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            volume: AtomicF32::new(1.0),
            crossfade_gain: AtomicF32::new(1.0),
            low_cut_hz: AtomicF32::new(LOW_CUT_OPEN_HZ),
            high_cut_hz: AtomicF32::new(HIGH_CUT_OPEN_HZ),
            filter_ramp_ms: AtomicF32::new(DEFAULT_FILTER_RAMP_MS),
            pitch_semitones: AtomicF32::new(0.0),
            playback_rate: AtomicF32::new(1.0),
        }
    }
}

impl GraphParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel volume, clamped to [0, 1]
    pub fn set_volume(&self, volume: f32) {
        self.volume.store(clamp_unit(volume));
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    /// Crossfader gain for this deck, written by the mix bus
    pub fn set_crossfade_gain(&self, gain: f32) {
        self.crossfade_gain.store(clamp_unit(gain));
    }

    pub fn crossfade_gain(&self) -> f32 {
        self.crossfade_gain.load()
    }

    /// High-pass cutoff; `LOW_CUT_OPEN_HZ` disables the filter
    pub fn set_low_cut_hz(&self, hz: f32) {
        self.low_cut_hz.store(hz.clamp(LOW_CUT_OPEN_HZ, HIGH_CUT_OPEN_HZ));
    }

    pub fn low_cut_hz(&self) -> f32 {
        self.low_cut_hz.load()
    }

    /// Low-pass cutoff; `HIGH_CUT_OPEN_HZ` disables the filter
    pub fn set_high_cut_hz(&self, hz: f32) {
        self.high_cut_hz.store(hz.clamp(LOW_CUT_OPEN_HZ, HIGH_CUT_OPEN_HZ));
    }

    pub fn high_cut_hz(&self) -> f32 {
        self.high_cut_hz.load()
    }

    pub fn set_filter_ramp_ms(&self, ms: f32) {
        self.filter_ramp_ms.store(ms.max(0.0));
    }

    pub fn filter_ramp_ms(&self) -> f32 {
        self.filter_ramp_ms.load()
    }

    /// Pitch shift in semitones, clamped; returns the applied value
    pub fn set_pitch_semitones(&self, semitones: f32) -> f32 {
        let applied = PitchShifter::clamp_semitones(semitones);
        self.pitch_semitones.store(applied);
        applied
    }

    pub fn pitch_semitones(&self) -> f32 {
        self.pitch_semitones.load()
    }

    /// Source playback rate multiplier (1.0 = nominal tempo)
    pub fn set_playback_rate(&self, rate: f32) {
        if rate.is_finite() && rate > 0.0 {
            self.playback_rate.store(rate);
        }
    }

    pub fn playback_rate(&self) -> f32 {
        self.playback_rate.load()
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterMode {
    LowPass,
    HighPass,
}

/// Two-pole (12dB/octave) state-variable filter
#[derive(Debug)]
struct SvfFilter {
    ic1eq_l: f32,
    ic2eq_l: f32,
    ic1eq_r: f32,
    ic2eq_r: f32,
    g: f32,
    k: f32,
    a1: f32,
    a2: f32,
    a3: f32,
}

impl SvfFilter {
    fn new() -> Self {
        Self {
            ic1eq_l: 0.0,
            ic2eq_l: 0.0,
            ic1eq_r: 0.0,
            ic2eq_r: 0.0,
            g: 0.0,
            k: 0.0,
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
        }
    }

    fn set_params(&mut self, cutoff: f32, q: f32, sample_rate: f32) {
        let nyquist_guard = sample_rate * 0.45;
        let cutoff = cutoff.clamp(LOW_CUT_OPEN_HZ, HIGH_CUT_OPEN_HZ.min(nyquist_guard));

        self.g = (std::f32::consts::PI * cutoff / sample_rate).tan();
        self.k = 1.0 / q;
        self.a1 = 1.0 / (1.0 + self.g * (self.g + self.k));
        self.a2 = self.g * self.a1;
        self.a3 = self.g * self.a2;
    }

    /// Process one frame, returning the requested response
    #[inline]
    fn process(&mut self, left: f32, right: f32, mode: FilterMode) -> (f32, f32) {
        let v3_l = left - self.ic2eq_l;
        let v1_l = self.a1 * self.ic1eq_l + self.a2 * v3_l;
        let v2_l = self.ic2eq_l + self.a2 * self.ic1eq_l + self.a3 * v3_l;
        self.ic1eq_l = 2.0 * v1_l - self.ic1eq_l;
        self.ic2eq_l = 2.0 * v2_l - self.ic2eq_l;

        let v3_r = right - self.ic2eq_r;
        let v1_r = self.a1 * self.ic1eq_r + self.a2 * v3_r;
        let v2_r = self.ic2eq_r + self.a2 * self.ic1eq_r + self.a3 * v3_r;
        self.ic1eq_r = 2.0 * v1_r - self.ic1eq_r;
        self.ic2eq_r = 2.0 * v2_r - self.ic2eq_r;

        match mode {
            FilterMode::LowPass => (v2_l, v2_r),
            FilterMode::HighPass => (
                left - self.k * v1_l - v2_l,
                right - self.k * v1_r - v2_r,
            ),
        }
    }

    fn reset(&mut self) {
        self.ic1eq_l = 0.0;
        self.ic2eq_l = 0.0;
        self.ic1eq_r = 0.0;
        self.ic2eq_r = 0.0;
    }
}

/// SVF whose cutoff glides exponentially towards a target
#[derive(Debug)]
struct RampedFilter {
    svf: SvfFilter,
    mode: FilterMode,
    /// Cutoff at which the filter is transparent and skipped
    open_hz: f32,
    current_hz: f32,
    target_hz: f32,
    /// Per-step cutoff multiplier while gliding
    step_ratio: f32,
    steps_left: usize,
    /// Samples into the current coefficient step
    step_phase: usize,
}

impl RampedFilter {
    fn new(mode: FilterMode, open_hz: f32, sample_rate: f32) -> Self {
        let mut svf = SvfFilter::new();
        svf.set_params(open_hz, FILTER_Q, sample_rate);
        Self {
            svf,
            mode,
            open_hz,
            current_hz: open_hz,
            target_hz: open_hz,
            step_ratio: 1.0,
            steps_left: 0,
            step_phase: 0,
        }
    }

    fn is_bypassed(&self) -> bool {
        self.steps_left == 0 && self.current_hz == self.open_hz
    }

    fn set_target(&mut self, target_hz: f32, ramp_ms: f32, sample_rate: f32) {
        if target_hz == self.target_hz {
            return;
        }
        if self.is_bypassed() {
            // Start from a clean state when leaving bypass
            self.svf.reset();
        }
        self.target_hz = target_hz;

        let ramp_samples = (ramp_ms / 1000.0 * sample_rate) as usize;
        let steps = ramp_samples.div_ceil(COEFF_STEP);
        if steps == 0 {
            self.current_hz = target_hz;
            self.steps_left = 0;
            self.svf.set_params(self.current_hz, FILTER_Q, sample_rate);
        } else {
            self.step_ratio = (target_hz / self.current_hz).powf(1.0 / steps as f32);
            self.steps_left = steps;
        }
        self.step_phase = 0;
    }

    fn process(&mut self, buffer: &mut StereoBuffer, sample_rate: f32) {
        if self.is_bypassed() {
            return;
        }

        for sample in buffer.iter_mut() {
            if self.steps_left > 0 && self.step_phase == 0 {
                self.steps_left -= 1;
                self.current_hz = if self.steps_left == 0 {
                    self.target_hz
                } else {
                    self.current_hz * self.step_ratio
                };
                self.svf.set_params(self.current_hz, FILTER_Q, sample_rate);
            }
            self.step_phase = (self.step_phase + 1) % COEFF_STEP;

            let (l, r) = self.svf.process(sample.left, sample.right, self.mode);
            sample.left = l;
            sample.right = r;
        }
    }

    fn reset(&mut self) {
        self.svf.reset();
    }
}

/// Render-side signal chain of one deck
pub struct AudioGraph {
    params: Arc<GraphParams>,
    sample_rate: f32,
    low_cut: RampedFilter,
    high_cut: RampedFilter,
    pitch: PitchShifter,
    /// Gain applied at the end of the previous block
    gain: f32,
}

impl AudioGraph {
    pub fn new(sample_rate: u32, params: Arc<GraphParams>) -> Self {
        let sr = sample_rate as f32;
        let gain = params.volume() * params.crossfade_gain();
        Self {
            params,
            sample_rate: sr,
            low_cut: RampedFilter::new(FilterMode::HighPass, LOW_CUT_OPEN_HZ, sr),
            high_cut: RampedFilter::new(FilterMode::LowPass, HIGH_CUT_OPEN_HZ, sr),
            pitch: PitchShifter::new(sample_rate),
            gain,
        }
    }

    pub fn params(&self) -> &Arc<GraphParams> {
        &self.params
    }

    /// Process one block in place and publish its levels
    pub fn process(&mut self, buffer: &mut StereoBuffer, meters: &DeckAtomics) {
        let ramp_ms = self.params.filter_ramp_ms();
        self.low_cut
            .set_target(self.params.low_cut_hz(), ramp_ms, self.sample_rate);
        self.high_cut
            .set_target(self.params.high_cut_hz(), ramp_ms, self.sample_rate);
        self.low_cut.process(buffer, self.sample_rate);
        self.high_cut.process(buffer, self.sample_rate);

        let semitones = self.params.pitch_semitones();
        if semitones != self.pitch.pitch_semitones() {
            self.pitch.set_pitch_semitones(semitones);
        }
        self.pitch.process(buffer);

        let target = self.params.volume() * self.params.crossfade_gain();
        apply_gain_ramp(buffer, self.gain, target);
        self.gain = target;

        meters.peak.store(buffer.peak());
        meters.rms.store(buffer.rms());
    }

    /// Clear filter and pitch state (new track, stop)
    pub fn reset(&mut self) {
        self.low_cut.reset();
        self.high_cut.reset();
        self.pitch.reset();
    }
}

/// Multiply a block by a gain moving linearly from `from` to `to`
pub(crate) fn apply_gain_ramp(buffer: &mut StereoBuffer, from: f32, to: f32) {
    let len = buffer.len();
    if len == 0 {
        return;
    }
    if from == to {
        if to != 1.0 {
            for sample in buffer.iter_mut() {
                *sample *= to;
            }
        }
        return;
    }
    let step = (to - from) / len as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        *sample *= from + step * (i + 1) as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    const SR: u32 = 48000;

    fn sine(freq: f32, len: usize) -> StereoBuffer {
        StereoBuffer::from_vec(
            (0..len)
                .map(|i| {
                    StereoSample::mono(
                        (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin() * 0.5,
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_params_clamp() {
        let params = GraphParams::new();
        params.set_volume(1.5);
        assert_eq!(params.volume(), 1.0);
        params.set_volume(f32::NAN);
        assert_eq!(params.volume(), 0.0);
        assert_eq!(params.set_pitch_semitones(20.0), 8.0);
        params.set_playback_rate(-1.0);
        assert_eq!(params.playback_rate(), 1.0);
    }

    #[test]
    fn test_open_filters_are_transparent() {
        let params = Arc::new(GraphParams::new());
        let mut graph = AudioGraph::new(SR, params);
        let meters = DeckAtomics::new();

        let original = sine(440.0, 512);
        let mut buffer = original.clone();
        graph.process(&mut buffer, &meters);

        assert_eq!(buffer.as_slice(), original.as_slice());
        assert!((meters.peak.load() - original.peak()).abs() < 1e-6);
    }

    #[test]
    fn test_high_cut_attenuates_treble() {
        let params = Arc::new(GraphParams::new());
        params.set_high_cut_hz(2000.0);
        let mut graph = AudioGraph::new(SR, params);
        let meters = DeckAtomics::new();

        // Let the 15ms ramp finish and the filter settle
        for _ in 0..3 {
            graph.process(&mut sine(10_000.0, 4096), &meters);
        }
        let mut buffer = sine(10_000.0, 4096);
        graph.process(&mut buffer, &meters);
        assert!(buffer.rms() < sine(10_000.0, 4096).rms() * 0.2);
    }

    #[test]
    fn test_low_cut_passes_treble() {
        let params = Arc::new(GraphParams::new());
        params.set_low_cut_hz(500.0);
        let mut graph = AudioGraph::new(SR, params);
        let meters = DeckAtomics::new();

        for _ in 0..3 {
            graph.process(&mut sine(8000.0, 4096), &meters);
        }
        let mut buffer = sine(8000.0, 4096);
        graph.process(&mut buffer, &meters);
        let ratio = buffer.rms() / sine(8000.0, 4096).rms();
        assert!(ratio > 0.9 && ratio < 1.1, "ratio {}", ratio);
    }

    #[test]
    fn test_cutoff_glides_to_target() {
        let mut filter = RampedFilter::new(FilterMode::LowPass, HIGH_CUT_OPEN_HZ, SR as f32);
        filter.set_target(2000.0, 15.0, SR as f32);
        assert!(!filter.is_bypassed());

        // 15ms = 720 samples = 45 steps
        let mut buffer = StereoBuffer::silence(360);
        filter.process(&mut buffer, SR as f32);
        assert!(filter.current_hz < HIGH_CUT_OPEN_HZ && filter.current_hz > 2000.0);

        filter.process(&mut buffer, SR as f32);
        assert_eq!(filter.current_hz, 2000.0);

        // Opening again glides back and ends in bypass
        filter.set_target(HIGH_CUT_OPEN_HZ, 15.0, SR as f32);
        let mut long = StereoBuffer::silence(1024);
        filter.process(&mut long, SR as f32);
        assert!(filter.is_bypassed());
    }

    #[test]
    fn test_gain_ramp_reaches_target() {
        let mut buffer = StereoBuffer::from_vec(vec![StereoSample::mono(1.0); 100]);
        apply_gain_ramp(&mut buffer, 1.0, 0.0);
        assert!(buffer[0].left < 1.0 && buffer[0].left > 0.9);
        assert_eq!(buffer[99].left, 0.0);
        // Monotonic fade
        assert!(buffer.iter().zip(buffer.iter().skip(1)).all(|(a, b)| b.left <= a.left));
    }

    #[test]
    fn test_crossfade_gain_applied() {
        let params = Arc::new(GraphParams::new());
        let mut graph = AudioGraph::new(SR, params.clone());
        let meters = DeckAtomics::new();

        params.set_crossfade_gain(0.0);
        let mut buffer = StereoBuffer::from_vec(vec![StereoSample::mono(0.5); 256]);
        graph.process(&mut buffer, &meters); // ramp block
        let mut buffer = StereoBuffer::from_vec(vec![StereoSample::mono(0.5); 256]);
        graph.process(&mut buffer, &meters);
        assert_eq!(buffer.peak(), 0.0);
        assert_eq!(meters.peak.load(), 0.0);
    }
}
