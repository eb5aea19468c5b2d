//! Tempo sync between the two decks
//!
//! One deck (the master) dictates the tempo; the other (the slave) has its
//! playback rate glided to `master_bpm / slave_bpm`. Rate changes are sampled
//! on the control tick with a cubic ease-out, and the render path follows the
//! rate parameter per block. Once a ramp settles the slave's loop period is
//! recomputed and its loop phase snapped to the master's if they drifted apart.
//!
//! The engine talks to decks through [`SyncDeck`] so it never holds them.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{DeckId, NUM_DECKS};

/// Sync timing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rate ramp length in milliseconds
    pub transition_ms: f64,
    /// Circular loop-phase distance tolerated before realigning
    pub phase_tolerance: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transition_ms: 800.0,
            phase_tolerance: 0.01,
        }
    }
}

/// What a deck has to expose to be synced
pub trait SyncDeck {
    /// Source BPM from track metadata (or user override)
    fn nominal_bpm(&self) -> Option<f64>;
    /// Current playback rate multiplier
    fn playback_rate(&self) -> f64;
    /// Push a new playback rate to the render path
    fn apply_rate(&mut self, rate: f64);
    /// Record the tempo the deck now effectively runs at
    fn set_effective_bpm(&mut self, bpm: f64);
    fn is_looping(&self) -> bool;
    /// Normalized loop position at clock time `at`
    fn loop_phase(&self, at: f64) -> Option<f64>;
    /// Restart the loop at clock time `at`, resuming at `phase`
    fn align_to_phase(&mut self, now: f64, at: f64, phase: f64) -> EngineResult<()>;

    fn effective_bpm(&self) -> Option<f64> {
        self.nominal_bpm().map(|bpm| bpm * self.playback_rate())
    }
}

/// Why a ramp is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampPurpose {
    /// Initial sync onto the master
    Engage,
    /// Master tempo changed while synced
    Retarget,
    /// Returning the slave to its own tempo
    Release,
}

/// A rate transition sampled on the control tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateRamp {
    pub start_time: f64,
    pub start_rate: f64,
    pub target_rate: f64,
    pub duration: f64,
    pub purpose: RampPurpose,
}

impl RateRamp {
    /// Linear progress 0 → 1
    pub fn progress(&self, now: f64) -> f64 {
        if self.duration <= 0.0 {
            return 1.0;
        }
        ((now - self.start_time) / self.duration).clamp(0.0, 1.0)
    }

    /// Eased rate at `now`
    pub fn rate_at(&self, now: f64) -> f64 {
        let eased = ease_out_cubic(self.progress(now));
        self.start_rate + (self.target_rate - self.start_rate) * eased
    }

    pub fn is_complete(&self, now: f64) -> bool {
        self.progress(now) >= 1.0
    }
}

/// `1 - (1 - t)^3`
pub fn ease_out_cubic(t: f64) -> f64 {
    let inv = 1.0 - t.clamp(0.0, 1.0);
    1.0 - inv * inv * inv
}

/// Circular distance between two phases in [0, 1)
pub fn phase_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(1.0);
    d.min(1.0 - d)
}

/// Snapshot of the sync relationship
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    pub master: Option<DeckId>,
    pub slave: Option<DeckId>,
    pub target_ratio: f64,
    pub ramp: Option<RateRamp>,
    pub active: bool,
}

/// Result of a master tempo change
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncUpdate {
    /// A retarget ramp started toward the new ratio
    Started { target_rate: f64 },
    /// A ramp was already in flight; nothing changed
    Ignored,
    /// Sync is not active
    Inactive,
}

/// Cross-deck tempo coordinator
#[derive(Debug)]
pub struct TempoSyncEngine {
    config: SyncConfig,
    /// How far ahead a phase-alignment restart is placed (seconds)
    lookahead: f64,
    state: SyncState,
}

impl TempoSyncEngine {
    pub fn new(config: SyncConfig, lookahead_seconds: f64) -> Self {
        Self {
            config,
            lookahead: lookahead_seconds.max(0.0),
            state: SyncState::default(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn is_ramping(&self) -> bool {
        self.state.ramp.is_some()
    }

    fn transition_seconds(&self) -> f64 {
        self.config.transition_ms.max(0.0) / 1000.0
    }

    fn start_ramp(&mut self, now: f64, start_rate: f64, target_rate: f64, purpose: RampPurpose) {
        self.state.ramp = Some(RateRamp {
            start_time: now,
            start_rate,
            target_rate,
            duration: self.transition_seconds(),
            purpose,
        });
    }

    /// Glide `slave` onto `master`'s tempo
    pub fn enable_sync<D: SyncDeck>(
        &mut self,
        master: DeckId,
        slave: DeckId,
        now: f64,
        decks: &mut [D; NUM_DECKS],
    ) -> EngineResult<()> {
        if master == slave {
            return Err(EngineError::InvalidParameter(format!(
                "deck {} cannot sync to itself",
                master
            )));
        }
        if self.state.active && self.state.master != Some(master) {
            if let Some(current) = self.state.master {
                return Err(EngineError::SyncConflict { master: current });
            }
        }

        let master_bpm = decks[master.index()].effective_bpm();
        let slave_bpm = decks[slave.index()].nominal_bpm();
        let (Some(master_bpm), Some(slave_bpm)) = (master_bpm, slave_bpm) else {
            return Err(EngineError::InsufficientMetadata { master, slave });
        };

        let target = master_bpm / slave_bpm;
        let start = decks[slave.index()].playback_rate();
        self.state.master = Some(master);
        self.state.slave = Some(slave);
        self.state.target_ratio = target;
        self.state.active = true;
        self.start_ramp(now, start, target, RampPurpose::Engage);

        log::info!(
            "Sync {} -> {}: {:.2} BPM onto {:.2} BPM, rate {:.4} -> {:.4}",
            slave,
            master,
            slave_bpm,
            master_bpm,
            start,
            target
        );
        Ok(())
    }

    /// React to a tempo change on the master deck
    pub fn update_master_bpm<D: SyncDeck>(
        &mut self,
        new_bpm: f64,
        now: f64,
        decks: &mut [D; NUM_DECKS],
    ) -> SyncUpdate {
        let Some(slave) = self.state.slave.filter(|_| self.state.active) else {
            return SyncUpdate::Inactive;
        };
        if self.state.ramp.is_some() {
            log::warn!(
                "Master BPM change to {:.2} ignored: sync ramp in flight",
                new_bpm
            );
            return SyncUpdate::Ignored;
        }
        let Some(slave_bpm) = decks[slave.index()].nominal_bpm() else {
            return SyncUpdate::Ignored;
        };
        if !(new_bpm > 0.0 && new_bpm.is_finite()) {
            return SyncUpdate::Ignored;
        }

        let target = new_bpm / slave_bpm;
        let start = decks[slave.index()].playback_rate();
        self.state.target_ratio = target;
        self.start_ramp(now, start, target, RampPurpose::Retarget);
        log::info!("Sync retarget {}: rate {:.4} -> {:.4}", slave, start, target);
        SyncUpdate::Started {
            target_rate: target,
        }
    }

    /// Glide the slave back to its own tempo
    pub fn disable_sync<D: SyncDeck>(&mut self, now: f64, decks: &mut [D; NUM_DECKS]) {
        let Some(slave) = self.state.slave.filter(|_| self.state.active) else {
            return;
        };
        let start = decks[slave.index()].playback_rate();
        self.state.target_ratio = 1.0;
        self.start_ramp(now, start, 1.0, RampPurpose::Release);
        log::info!("Sync release {}: rate {:.4} -> 1.0", slave, start);
    }

    /// Forget the sync relationship without touching deck rates
    ///
    /// Used when a synced deck gets a new track.
    pub fn reset(&mut self) {
        if self.state.active {
            log::info!("Sync reset");
        }
        self.state = SyncState::default();
    }

    /// Whether `deck` is master or slave of the active sync
    pub fn involves(&self, deck: DeckId) -> bool {
        self.state.active && (self.state.master == Some(deck) || self.state.slave == Some(deck))
    }

    /// Settle the ramp at its target when its slave stops
    ///
    /// The phase check is skipped. A stopping master leaves the ramp running,
    /// so the still-playing slave keeps gliding.
    pub fn cancel_for<D: SyncDeck>(&mut self, deck: DeckId, decks: &mut [D; NUM_DECKS]) {
        if self.state.slave != Some(deck) {
            return;
        }
        if let Some(ramp) = self.state.ramp.take() {
            log::debug!("Sync ramp cancelled by deck {}", deck);
            self.finish_ramp(ramp, decks);
        }
    }

    /// Advance the active ramp; run phase alignment when it settles
    pub fn tick<D: SyncDeck>(&mut self, now: f64, decks: &mut [D; NUM_DECKS]) {
        let (Some(ramp), Some(slave)) = (self.state.ramp, self.state.slave) else {
            return;
        };

        decks[slave.index()].apply_rate(ramp.rate_at(now));
        if !ramp.is_complete(now) {
            return;
        }

        self.state.ramp = None;
        let purpose = ramp.purpose;
        self.finish_ramp(ramp, decks);
        if purpose != RampPurpose::Release {
            self.align_phase(now, decks);
        }
    }

    fn finish_ramp<D: SyncDeck>(&mut self, ramp: RateRamp, decks: &mut [D; NUM_DECKS]) {
        let Some(slave) = self.state.slave else {
            return;
        };
        let deck = &mut decks[slave.index()];
        deck.apply_rate(ramp.target_rate);

        match ramp.purpose {
            RampPurpose::Engage | RampPurpose::Retarget => {
                if let Some(bpm) = deck.effective_bpm() {
                    deck.set_effective_bpm(bpm);
                    log::debug!("Deck {} locked at {:.2} BPM", slave, bpm);
                }
            }
            RampPurpose::Release => {
                if let Some(bpm) = deck.nominal_bpm() {
                    deck.set_effective_bpm(bpm);
                }
                log::info!("Sync disabled, deck {} back at its own tempo", slave);
                self.state = SyncState::default();
            }
        }
    }

    fn align_phase<D: SyncDeck>(&mut self, now: f64, decks: &mut [D; NUM_DECKS]) {
        let (Some(master), Some(slave)) = (self.state.master, self.state.slave) else {
            return;
        };
        let (m, s) = (&decks[master.index()], &decks[slave.index()]);
        if !m.is_looping() || !s.is_looping() {
            return;
        }
        let (Some(master_phase), Some(slave_phase)) = (m.loop_phase(now), s.loop_phase(now)) else {
            return;
        };

        let distance = phase_distance(master_phase, slave_phase);
        if distance <= self.config.phase_tolerance {
            return;
        }

        let at = now + self.lookahead;
        let Some(target_phase) = m.loop_phase(at) else {
            return;
        };
        log::info!(
            "Deck {} phase off by {:.3}, realigning to {:.4}",
            slave,
            distance,
            target_phase
        );
        if let Err(e) = decks[slave.index()].align_to_phase(now, at, target_phase) {
            log::warn!("Phase alignment of deck {} failed: {}", slave, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct MockDeck {
        bpm: Option<f64>,
        rate: f64,
        effective: Option<f64>,
        looping: bool,
        /// Phase at t = 0 and loop period in seconds
        phase_origin: f64,
        period: f64,
        aligned: Vec<(f64, f64)>,
    }

    impl MockDeck {
        fn new(bpm: Option<f64>) -> Self {
            Self {
                bpm,
                rate: 1.0,
                period: 4.0,
                ..Default::default()
            }
        }
    }

    impl SyncDeck for MockDeck {
        fn nominal_bpm(&self) -> Option<f64> {
            self.bpm
        }
        fn playback_rate(&self) -> f64 {
            self.rate
        }
        fn apply_rate(&mut self, rate: f64) {
            self.rate = rate;
        }
        fn set_effective_bpm(&mut self, bpm: f64) {
            self.effective = Some(bpm);
        }
        fn is_looping(&self) -> bool {
            self.looping
        }
        fn loop_phase(&self, at: f64) -> Option<f64> {
            Some((self.phase_origin + at / self.period).rem_euclid(1.0))
        }
        fn align_to_phase(&mut self, _now: f64, at: f64, phase: f64) -> EngineResult<()> {
            self.aligned.push((at, phase));
            Ok(())
        }
    }

    fn run(sync: &mut TempoSyncEngine, decks: &mut [MockDeck; 2], from: f64, to: f64) {
        let mut now = from;
        while now <= to + 1e-9 {
            sync.tick(now, decks);
            now += 0.025;
        }
    }

    #[test]
    fn test_ease_out_cubic() {
        assert_eq!(ease_out_cubic(0.0), 0.0);
        assert_eq!(ease_out_cubic(1.0), 1.0);
        assert!((ease_out_cubic(0.5) - 0.875).abs() < 1e-12);
        assert_eq!(ease_out_cubic(2.0), 1.0);
    }

    #[test]
    fn test_phase_distance_wraps() {
        assert!((phase_distance(0.99, 0.01) - 0.02).abs() < 1e-12);
        assert!((phase_distance(0.25, 0.75) - 0.5).abs() < 1e-12);
        assert_eq!(phase_distance(0.3, 0.3), 0.0);
    }

    #[test]
    fn test_sync_converges_to_ratio() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(Some(100.0))];

        sync.enable_sync(DeckId::A, DeckId::B, 0.0, &mut decks).unwrap();
        run(&mut sync, &mut decks, 0.0, 0.4);
        assert!(decks[1].rate > 1.0 && decks[1].rate < 1.28);

        run(&mut sync, &mut decks, 0.425, 0.85);
        assert!((decks[1].rate - 1.28).abs() < 0.0128);
        assert!(!sync.is_ramping());
        assert!(sync.is_active());
        assert_eq!(decks[1].effective, Some(128.0));
        assert_eq!(decks[0].rate, 1.0);
    }

    #[test]
    fn test_ramp_is_monotonic_ease_out() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(Some(100.0))];
        sync.enable_sync(DeckId::A, DeckId::B, 0.0, &mut decks).unwrap();

        let mut last = 1.0;
        let mut steps = Vec::new();
        let mut now = 0.025;
        while now < 0.8 {
            sync.tick(now, &mut decks);
            assert!(decks[1].rate >= last);
            steps.push(decks[1].rate - last);
            last = decks[1].rate;
            now += 0.025;
        }
        // Ease-out: early steps are larger than late ones
        assert!(steps[0] > steps[steps.len() - 1]);
    }

    #[test]
    fn test_missing_bpm_changes_nothing() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(None)];

        let err = sync.enable_sync(DeckId::A, DeckId::B, 0.0, &mut decks);
        assert!(matches!(err, Err(EngineError::InsufficientMetadata { .. })));
        assert_eq!(sync.state(), &SyncState::default());
        assert_eq!(decks[1].rate, 1.0);
    }

    #[test]
    fn test_self_sync_rejected() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(Some(100.0))];
        assert!(sync.enable_sync(DeckId::A, DeckId::A, 0.0, &mut decks).is_err());
    }

    #[test]
    fn test_reverse_sync_while_active_conflicts() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(Some(100.0))];
        sync.enable_sync(DeckId::A, DeckId::B, 0.0, &mut decks).unwrap();

        let err = sync.enable_sync(DeckId::B, DeckId::A, 0.1, &mut decks);
        assert!(matches!(
            err,
            Err(EngineError::SyncConflict { master: DeckId::A })
        ));
    }

    #[test]
    fn test_master_update_ignored_during_ramp() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(Some(100.0))];
        sync.enable_sync(DeckId::A, DeckId::B, 0.0, &mut decks).unwrap();
        sync.tick(0.2, &mut decks);

        assert_eq!(
            sync.update_master_bpm(140.0, 0.2, &mut decks),
            SyncUpdate::Ignored
        );
        assert!((sync.state().target_ratio - 1.28).abs() < 1e-12);

        run(&mut sync, &mut decks, 0.2, 1.0);
        match sync.update_master_bpm(140.0, 1.0, &mut decks) {
            SyncUpdate::Started { target_rate } => assert!((target_rate - 1.4).abs() < 1e-12),
            other => panic!("unexpected {:?}", other),
        }
        run(&mut sync, &mut decks, 1.0, 1.9);
        assert!((decks[1].rate - 1.4).abs() < 1e-9);
    }

    #[test]
    fn test_update_without_sync_is_inactive() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(Some(100.0))];
        assert_eq!(
            sync.update_master_bpm(140.0, 0.0, &mut decks),
            SyncUpdate::Inactive
        );
    }

    #[test]
    fn test_disable_ramps_back_to_unity() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(Some(100.0))];
        sync.enable_sync(DeckId::A, DeckId::B, 0.0, &mut decks).unwrap();
        run(&mut sync, &mut decks, 0.0, 1.0);

        sync.disable_sync(1.0, &mut decks);
        sync.tick(1.2, &mut decks);
        assert!(decks[1].rate > 1.0 && decks[1].rate < 1.28);

        run(&mut sync, &mut decks, 1.2, 2.0);
        assert_eq!(decks[1].rate, 1.0);
        assert_eq!(decks[1].effective, Some(100.0));
        assert!(!sync.is_active());
    }

    #[test]
    fn test_phase_realigned_after_ramp() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(Some(100.0))];
        decks[0].looping = true;
        decks[1].looping = true;
        decks[1].phase_origin = 0.3;

        sync.enable_sync(DeckId::A, DeckId::B, 0.0, &mut decks).unwrap();
        sync.tick(0.8, &mut decks);

        assert_eq!(decks[1].aligned.len(), 1);
        let (at, phase) = decks[1].aligned[0];
        assert!((at - 0.9).abs() < 1e-12);
        assert!((phase - 0.9 / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_phase_within_tolerance_left_alone() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(Some(100.0))];
        decks[0].looping = true;
        decks[1].looping = true;
        decks[1].phase_origin = 0.005;

        sync.enable_sync(DeckId::A, DeckId::B, 0.0, &mut decks).unwrap();
        sync.tick(0.8, &mut decks);
        assert!(decks[1].aligned.is_empty());
    }

    #[test]
    fn test_cancel_settles_at_target() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(Some(100.0))];
        sync.enable_sync(DeckId::A, DeckId::B, 0.0, &mut decks).unwrap();
        sync.tick(0.1, &mut decks);

        sync.cancel_for(DeckId::B, &mut decks);
        assert!(!sync.is_ramping());
        assert!(sync.is_active());
        assert!((decks[1].rate - 1.28).abs() < 1e-12);
    }

    #[test]
    fn test_master_stop_keeps_ramp_running() {
        let mut sync = TempoSyncEngine::new(SyncConfig::default(), 0.1);
        let mut decks = [MockDeck::new(Some(128.0)), MockDeck::new(Some(100.0))];
        sync.enable_sync(DeckId::A, DeckId::B, 0.0, &mut decks).unwrap();
        sync.tick(0.05, &mut decks);
        let rate = decks[1].rate;

        sync.cancel_for(DeckId::A, &mut decks);
        assert!(sync.is_ramping());
        assert_eq!(decks[1].rate, rate);

        run(&mut sync, &mut decks, 0.075, 0.85);
        assert!((decks[1].rate - 1.28).abs() < 1e-9);
        assert_eq!(decks[1].effective, Some(128.0));
    }
}
