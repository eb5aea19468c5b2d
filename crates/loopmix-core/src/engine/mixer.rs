//! Mix bus - equal-power crossfader and master output
//!
//! The control side ([`MixBus`]) turns a crossfader position into per-deck
//! gains and writes them into each deck's [`GraphParams`], where the deck's
//! gain stage ramps to them. The render side ([`Mixer`]) sums the decks and
//! applies the master gain.

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use crate::types::{AtomicF32, DeckId, StereoBuffer, NUM_DECKS};

use super::graph::{apply_gain_ramp, GraphParams};

/// Equal-power gains `(cos(p·π/2), sin(p·π/2))` for position `p` in [0, 1]
pub fn crossfade_gains(position: f32) -> (f32, f32) {
    let p = if position.is_nan() {
        0.5
    } else {
        position.clamp(0.0, 1.0)
    };
    let angle = p * FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// Master section shared between control and render
#[derive(Debug)]
pub struct MixParams {
    master_volume: AtomicF32,
    /// Peak of the last master block
    pub master_peak: AtomicF32,
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            master_volume: AtomicF32::new(1.0),
            master_peak: AtomicF32::new(0.0),
        }
    }
}

impl MixParams {
    pub fn master_volume(&self) -> f32 {
        self.master_volume.load()
    }
}

/// Control-side crossfader and master volume
pub struct MixBus {
    decks: [Arc<GraphParams>; NUM_DECKS],
    params: Arc<MixParams>,
    position: f32,
}

impl MixBus {
    /// Create a mix bus centred at 0.5
    pub fn new(decks: [Arc<GraphParams>; NUM_DECKS], params: Arc<MixParams>) -> Self {
        let mut bus = Self {
            decks,
            params,
            position: 0.5,
        };
        bus.set_crossfade(0.5);
        bus
    }

    /// Set the crossfader: 0 = deck A only, 1 = deck B only
    ///
    /// Returns the applied `(gain_a, gain_b)`.
    pub fn set_crossfade(&mut self, position: f32) -> (f32, f32) {
        let (gain_a, gain_b) = crossfade_gains(position);
        self.position = if position.is_nan() {
            0.5
        } else {
            position.clamp(0.0, 1.0)
        };
        self.decks[DeckId::A.index()].set_crossfade_gain(gain_a);
        self.decks[DeckId::B.index()].set_crossfade_gain(gain_b);
        log::debug!(
            "Crossfade {:.3} -> A {:.4}, B {:.4}",
            self.position,
            gain_a,
            gain_b
        );
        (gain_a, gain_b)
    }

    pub fn crossfade(&self) -> f32 {
        self.position
    }

    /// Crossfader gain currently applied to `deck`
    pub fn deck_gain(&self, deck: DeckId) -> f32 {
        self.decks[deck.index()].crossfade_gain()
    }

    /// Master volume, clamped to [0, 1]
    pub fn set_master_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.params.master_volume.store(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.params.master_volume()
    }

    pub fn master_peak(&self) -> f32 {
        self.params.master_peak.load()
    }
}

/// Render-side summing stage
pub struct Mixer {
    params: Arc<MixParams>,
    /// Master gain applied at the end of the previous block
    master_gain: f32,
}

impl Mixer {
    pub fn new(params: Arc<MixParams>) -> Self {
        let master_gain = params.master_volume();
        Self {
            params,
            master_gain,
        }
    }

    /// Sum the deck buffers (already gain-staged) into `master_out`
    pub fn process(&mut self, deck_buffers: &[StereoBuffer; NUM_DECKS], master_out: &mut StereoBuffer) {
        master_out.fill_silence();
        for buffer in deck_buffers {
            master_out.add_scaled(buffer, 1.0);
        }

        let target = self.params.master_volume();
        apply_gain_ramp(master_out, self.master_gain, target);
        self.master_gain = target;

        self.params.master_peak.store(master_out.peak());
    }
}
