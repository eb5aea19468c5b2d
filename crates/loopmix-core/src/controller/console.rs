//! The control-path root object
//!
//! A [`Console`] owns both deck controllers, the tempo sync engine and the mix
//! bus. It is the only object that touches both decks, and the one the
//! control thread ticks.

use crate::audio_file::PcmBuffer;
use crate::config::EngineConfig;
use crate::context::AudioContext;
use crate::engine::{EngineLink, MixBus, SyncDeck, SyncState, SyncUpdate, TempoSyncEngine};
use crate::error::EngineResult;
use crate::loader::PreparedTrack;
use crate::track::Track;
use crate::types::{DeckId, NUM_DECKS};

use super::deck::{DeckController, DeckEvent, DeckStatus};

/// Callback for deck state changes
pub type EventListener = Box<dyn FnMut(DeckEvent) + Send>;

/// Both decks, sync and mixer behind one control surface
pub struct Console {
    ctx: AudioContext,
    decks: [DeckController; NUM_DECKS],
    sync: TempoSyncEngine,
    mix: MixBus,
    listener: Option<EventListener>,
}

impl Console {
    pub fn new(ctx: AudioContext, link: EngineLink, config: &EngineConfig) -> Self {
        let EngineLink {
            commands,
            deck_atomics,
            deck_params,
            mix_params,
        } = link;
        let [commands_a, commands_b] = commands;
        let [atomics_a, atomics_b] = deck_atomics;

        let decks = [
            DeckController::new(
                DeckId::A,
                ctx.clone(),
                commands_a,
                atomics_a,
                deck_params[0].clone(),
                config,
            ),
            DeckController::new(
                DeckId::B,
                ctx.clone(),
                commands_b,
                atomics_b,
                deck_params[1].clone(),
                config,
            ),
        ];

        Self {
            sync: TempoSyncEngine::new(config.sync.clone(), config.scheduler.lookahead_seconds()),
            ctx,
            decks,
            mix: MixBus::new(deck_params, mix_params),
            listener: None,
        }
    }

    pub fn context(&self) -> &AudioContext {
        &self.ctx
    }

    pub fn deck(&self, deck: DeckId) -> &DeckController {
        &self.decks[deck.index()]
    }

    /// Direct access for per-deck setters (volume, filters, pitch, loop)
    pub fn deck_mut(&mut self, deck: DeckId) -> &mut DeckController {
        &mut self.decks[deck.index()]
    }

    pub fn set_listener(&mut self, listener: impl FnMut(DeckEvent) + Send + 'static) {
        self.listener = Some(Box::new(listener));
    }

    fn emit(&mut self, event: DeckEvent) {
        log::debug!("{:?}", event);
        if let Some(listener) = self.listener.as_mut() {
            listener(event);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────

    /// Install a prepared track; a sync involving the deck is dropped
    pub fn install(&mut self, deck: DeckId, prepared: PreparedTrack) -> EngineResult<()> {
        if self.sync.involves(deck) {
            self.sync.reset();
        }
        self.decks[deck.index()].install(prepared)?;
        self.emit(DeckEvent::Loaded(deck));
        Ok(())
    }

    /// Analyze and install already-decoded PCM
    pub fn load(&mut self, deck: DeckId, track: Track, pcm: PcmBuffer) -> EngineResult<()> {
        if self.sync.involves(deck) {
            self.sync.reset();
        }
        self.decks[deck.index()].load(track, pcm)?;
        self.emit(DeckEvent::Loaded(deck));
        Ok(())
    }

    pub fn play(&mut self, deck: DeckId) -> EngineResult<()> {
        let was_playing = self.decks[deck.index()].is_playing();
        self.decks[deck.index()].play()?;
        if !was_playing {
            self.emit(DeckEvent::Started(deck));
        }
        Ok(())
    }

    pub fn pause(&mut self, deck: DeckId) -> EngineResult<()> {
        let was_playing = self.decks[deck.index()].is_playing();
        self.sync.cancel_for(deck, &mut self.decks);
        self.decks[deck.index()].pause()?;
        if was_playing {
            self.emit(DeckEvent::Stopped(deck));
        }
        Ok(())
    }

    /// Stop and rewind one deck; the other deck is untouched
    pub fn stop(&mut self, deck: DeckId) -> EngineResult<()> {
        let was_playing = self.decks[deck.index()].is_playing();
        self.sync.cancel_for(deck, &mut self.decks);
        self.decks[deck.index()].stop()?;
        if was_playing {
            self.emit(DeckEvent::Stopped(deck));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tempo sync
    // ─────────────────────────────────────────────────────────────────────

    pub fn enable_sync(&mut self, master: DeckId, slave: DeckId) -> EngineResult<()> {
        let now = self.ctx.now();
        self.sync.enable_sync(master, slave, now, &mut self.decks)
    }

    pub fn disable_sync(&mut self) {
        let now = self.ctx.now();
        self.sync.disable_sync(now, &mut self.decks);
    }

    pub fn sync_state(&self) -> &SyncState {
        self.sync.state()
    }

    /// Change a deck's BPM, retargeting the sync if the deck takes part
    pub fn set_bpm(&mut self, deck: DeckId, bpm: f64) -> EngineResult<SyncUpdate> {
        self.decks[deck.index()].set_bpm(bpm)?;
        if !self.sync.involves(deck) {
            return Ok(SyncUpdate::Inactive);
        }
        let Some(master) = self.sync.state().master else {
            return Ok(SyncUpdate::Inactive);
        };
        let Some(master_bpm) = self.decks[master.index()].effective_bpm() else {
            return Ok(SyncUpdate::Inactive);
        };
        let now = self.ctx.now();
        Ok(self.sync.update_master_bpm(master_bpm, now, &mut self.decks))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mix
    // ─────────────────────────────────────────────────────────────────────

    /// Equal-power crossfade; returns `(gain_a, gain_b)`
    pub fn set_crossfade(&mut self, position: f32) -> (f32, f32) {
        self.mix.set_crossfade(position)
    }

    pub fn crossfade(&self) -> f32 {
        self.mix.crossfade()
    }

    pub fn mix(&self) -> &MixBus {
        &self.mix
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.mix.set_master_volume(volume);
    }

    pub fn status(&self, deck: DeckId) -> DeckStatus {
        self.decks[deck.index()].status()
    }

    /// One control tick: sync ramps first, then restart scheduling
    pub fn tick(&mut self) {
        let now = self.ctx.now();
        self.sync.tick(now, &mut self.decks);

        for i in 0..NUM_DECKS {
            if let Some(event) = self.decks[i].tick(now) {
                if let DeckEvent::TrackEnded(deck) = event {
                    self.sync.cancel_for(deck, &mut self.decks);
                }
                self.emit(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sync::phase_distance;
    use crate::engine::AudioEngine;
    use crate::track::TrackKind;
    use crate::types::{PlayState, StereoBuffer};
    use std::sync::{Arc, Mutex};

    const SR: u32 = 48000;
    /// 25ms at 48kHz
    const BLOCK: usize = 1200;

    fn rig() -> (AudioEngine, Console) {
        let ctx = AudioContext::new(SR);
        ctx.resume();
        let (engine, link) = AudioEngine::new(ctx.clone());
        let console = Console::new(ctx, link, &EngineConfig::default());
        (engine, console)
    }

    /// Render and tick for `seconds`, one tick per 25ms block
    fn run(engine: &mut AudioEngine, console: &mut Console, seconds: f64) {
        let mut out = StereoBuffer::silence(BLOCK);
        let blocks = (seconds * SR as f64 / BLOCK as f64).round() as usize;
        for _ in 0..blocks {
            console.tick();
            engine.process(&mut out);
        }
    }

    fn tone(seconds: f64) -> PcmBuffer {
        PcmBuffer::mono(SR, vec![0.5; (seconds * SR as f64) as usize])
    }

    /// Length of an 8-bar loop
    fn eight_bars(bpm: f64) -> f64 {
        32.0 * 60.0 / bpm
    }

    /// Like `run`, counting blocks in which `deck` rendered nothing
    fn run_counting_silence(
        engine: &mut AudioEngine,
        console: &mut Console,
        deck: DeckId,
        seconds: f64,
    ) -> usize {
        let mut out = StereoBuffer::silence(BLOCK);
        let blocks = (seconds * SR as f64 / BLOCK as f64).round() as usize;
        let mut silent = 0;
        for _ in 0..blocks {
            console.tick();
            engine.process(&mut out);
            if console.status(deck).peak == 0.0 {
                silent += 1;
            }
        }
        silent
    }

    fn phase_gap(console: &Console) -> f64 {
        let now = console.context().now();
        let a = console.deck(DeckId::A).loop_phase(now).unwrap();
        let b = console.deck(DeckId::B).loop_phase(now).unwrap();
        phase_distance(a, b)
    }

    #[test]
    fn test_sync_converges_on_master_tempo() {
        let (mut engine, mut console) = rig();
        console
            .load(DeckId::A, Track::looped("A", 128.0, Some(8)), tone(15.0))
            .unwrap();
        console
            .load(DeckId::B, Track::looped("B", 100.0, Some(8)), tone(19.2))
            .unwrap();
        console.play(DeckId::A).unwrap();
        console.play(DeckId::B).unwrap();
        run(&mut engine, &mut console, 0.5);

        console.enable_sync(DeckId::A, DeckId::B).unwrap();
        run(&mut engine, &mut console, 1.0);

        let b = console.status(DeckId::B);
        assert!((b.playback_rate - 1.28).abs() < 0.0128, "rate {}", b.playback_rate);
        assert_eq!(b.effective_bpm.map(|bpm| bpm.round()), Some(128.0));
        assert_eq!(console.status(DeckId::A).playback_rate, 1.0);
        assert!(console.sync_state().active);
        assert!(console.sync_state().ramp.is_none());
    }

    #[test]
    fn test_synced_slave_restarts_when_its_audio_ends() {
        let (mut engine, mut console) = rig();
        console
            .load(DeckId::A, Track::looped("A", 104.0, Some(8)), tone(eight_bars(104.0)))
            .unwrap();
        console
            .load(DeckId::B, Track::looped("B", 100.0, Some(8)), tone(eight_bars(100.0)))
            .unwrap();
        console.set_crossfade(0.5);
        console.play(DeckId::A).unwrap();
        console.play(DeckId::B).unwrap();
        console.enable_sync(DeckId::A, DeckId::B).unwrap();

        // Two full loops at the synced tempo
        let silent = run_counting_silence(&mut engine, &mut console, DeckId::B, 40.0);
        assert_eq!(silent, 0);

        let b = console.status(DeckId::B);
        assert!((b.playback_rate - 1.04).abs() < 1e-9);
        assert!(b.restarts_executed >= 2);
        let gap = phase_gap(&console);
        assert!(gap < 0.01, "phase gap {}", gap);
    }

    #[test]
    fn test_sync_realigns_late_slave_to_master_phase() {
        let (mut engine, mut console) = rig();
        console
            .load(DeckId::A, Track::looped("A", 104.0, Some(8)), tone(eight_bars(104.0)))
            .unwrap();
        console
            .load(DeckId::B, Track::looped("B", 100.0, Some(8)), tone(eight_bars(100.0)))
            .unwrap();
        console.set_crossfade(0.5);
        console.play(DeckId::A).unwrap();
        run(&mut engine, &mut console, 2.0);

        // B enters on its own beat grid, well behind A's loop
        console.play(DeckId::B).unwrap();
        run(&mut engine, &mut console, 1.0);
        assert!(phase_gap(&console) > 0.1);

        console.enable_sync(DeckId::A, DeckId::B).unwrap();
        run(&mut engine, &mut console, 1.0);
        assert!(phase_gap(&console) < 0.01, "phase gap {}", phase_gap(&console));

        let silent = run_counting_silence(&mut engine, &mut console, DeckId::B, 36.0);
        assert_eq!(silent, 0);
        let gap = phase_gap(&console);
        assert!(gap < 0.01, "phase gap {}", gap);
    }

    #[test]
    fn test_master_stop_leaves_slave_ramp_gliding() {
        let (mut engine, mut console) = rig();
        console
            .load(DeckId::A, Track::looped("A", 128.0, Some(8)), tone(15.0))
            .unwrap();
        console
            .load(DeckId::B, Track::looped("B", 100.0, Some(8)), tone(19.2))
            .unwrap();
        console.play(DeckId::A).unwrap();
        console.play(DeckId::B).unwrap();
        run(&mut engine, &mut console, 0.5);

        console.enable_sync(DeckId::A, DeckId::B).unwrap();
        run(&mut engine, &mut console, 0.05);
        let before = console.status(DeckId::B).playback_rate;
        assert!(before > 1.0 && before < 1.1);

        console.stop(DeckId::A).unwrap();
        assert_eq!(console.status(DeckId::B).playback_rate, before);
        assert!(console.sync_state().ramp.is_some());

        run(&mut engine, &mut console, 0.05);
        let gliding = console.status(DeckId::B).playback_rate;
        assert!(gliding > before && gliding < 1.1, "rate {}", gliding);
        assert_eq!(console.status(DeckId::B).state, PlayState::Playing);

        run(&mut engine, &mut console, 1.0);
        let b = console.status(DeckId::B);
        assert!((b.playback_rate - 1.28).abs() < 1e-9);
        assert_eq!(b.state, PlayState::Playing);
        assert_eq!(console.status(DeckId::A).state, PlayState::Stopped);
    }

    #[test]
    fn test_slave_stop_settles_ramp() {
        let (mut engine, mut console) = rig();
        console
            .load(DeckId::A, Track::looped("A", 128.0, Some(8)), tone(15.0))
            .unwrap();
        console
            .load(DeckId::B, Track::looped("B", 100.0, Some(8)), tone(19.2))
            .unwrap();
        console.play(DeckId::A).unwrap();
        console.play(DeckId::B).unwrap();
        run(&mut engine, &mut console, 0.5);

        console.enable_sync(DeckId::A, DeckId::B).unwrap();
        run(&mut engine, &mut console, 0.05);
        console.stop(DeckId::B).unwrap();

        assert!(console.sync_state().ramp.is_none());
        assert!((console.status(DeckId::B).playback_rate - 1.28).abs() < 1e-9);
        assert_eq!(console.status(DeckId::A).playback_rate, 1.0);
    }

    #[test]
    fn test_sync_needs_both_bpms() {
        let (_engine, mut console) = rig();
        console
            .load(DeckId::A, Track::looped("A", 128.0, None), tone(2.0))
            .unwrap();
        console
            .load(
                DeckId::B,
                Track::new("B", TrackKind::FullSong { bpm: None }),
                tone(2.0),
            )
            .unwrap();

        assert!(console.enable_sync(DeckId::A, DeckId::B).is_err());
        assert!(!console.sync_state().active);
        assert_eq!(console.status(DeckId::B).playback_rate, 1.0);
    }

    #[test]
    fn test_restarts_execute_on_render_path() {
        let (mut engine, mut console) = rig();
        // One bar at 120 BPM is a 2s loop; the clip runs 3s
        console
            .load(DeckId::A, Track::looped("Loop", 120.0, Some(1)), tone(3.0))
            .unwrap();
        console.deck_mut(DeckId::A).set_loop_length_bars(1).unwrap();
        console.play(DeckId::A).unwrap();
        run(&mut engine, &mut console, 5.0);

        let status = console.status(DeckId::A);
        assert_eq!(status.state, PlayState::Playing);
        assert!(status.restarts_executed >= 2);
        assert_eq!(status.late_restarts, 0);
        assert_eq!(status.scheduler_drift, 0);
        assert!(status.position_seconds < 2.0);
        assert!((status.loop_duration_seconds.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_loop_disable_twice_keeps_position() {
        let (mut engine, mut console) = rig();
        console
            .load(DeckId::A, Track::looped("Loop", 120.0, Some(1)), tone(10.0))
            .unwrap();
        console.play(DeckId::A).unwrap();
        run(&mut engine, &mut console, 0.5);

        console.deck_mut(DeckId::A).set_loop_enabled(false).unwrap();
        console.deck_mut(DeckId::A).set_loop_enabled(false).unwrap();
        let restarts = console.status(DeckId::A).restarts_executed;
        run(&mut engine, &mut console, 3.0);

        let status = console.status(DeckId::A);
        assert_eq!(status.restarts_executed, restarts);
        assert!(status.position_seconds > 3.0);
    }

    #[test]
    fn test_crossfade_center() {
        let (_engine, mut console) = rig();
        let (a, b) = console.set_crossfade(0.5);
        assert!((a - 0.70711).abs() < 1e-5);
        assert!((b - 0.70711).abs() < 1e-5);

        let (a, b) = console.set_crossfade(0.0);
        assert_eq!((a, b), (1.0, 0.0));
        assert_eq!(console.mix().deck_gain(DeckId::B), 0.0);
    }

    #[test]
    fn test_stop_leaves_other_deck_alone() {
        let (mut engine, mut console) = rig();
        console
            .load(DeckId::A, Track::looped("A", 120.0, Some(1)), tone(4.0))
            .unwrap();
        console
            .load(DeckId::B, Track::looped("B", 120.0, Some(1)), tone(4.0))
            .unwrap();
        console.play(DeckId::A).unwrap();
        console.play(DeckId::B).unwrap();
        run(&mut engine, &mut console, 0.5);

        console.stop(DeckId::A).unwrap();
        run(&mut engine, &mut console, 0.1);
        assert_eq!(console.status(DeckId::A).state, PlayState::Stopped);
        assert_eq!(console.status(DeckId::B).state, PlayState::Playing);
    }

    #[test]
    fn test_listener_sees_lifecycle() {
        let (mut engine, mut console) = rig();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        console.set_listener(move |event| sink.lock().unwrap().push(event));

        console
            .load(
                DeckId::B,
                Track::new("Short", TrackKind::FullSong { bpm: Some(120.0) }),
                tone(0.1),
            )
            .unwrap();
        console.play(DeckId::B).unwrap();
        run(&mut engine, &mut console, 0.5);

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                DeckEvent::Loaded(DeckId::B),
                DeckEvent::Started(DeckId::B),
                DeckEvent::TrackEnded(DeckId::B),
            ]
        );
    }
}
