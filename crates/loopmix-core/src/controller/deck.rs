//! Control-side deck façade
//!
//! A [`DeckController`] holds everything the host can change about one deck
//! (track, tempo, loop geometry, filters, pitch, volume) and turns it into
//! render commands and parameter stores. Loop scheduling runs here too: each
//! [`tick`](DeckController::tick) forwards the scheduler's restarts as
//! sample-accurate `ScheduleRestart` commands.

use std::sync::Arc;

use basedrop::Shared;

use crate::analysis::{
    BoundaryDetector, ContentAnalysis, LoopBoundaries, LoopDurationResolver, LoopStrategy,
};
use crate::audio_file::PcmBuffer;
use crate::config::{EngineConfig, FilterConfig};
use crate::context::AudioContext;
use crate::engine::{
    CommandSender, DeckAtomics, EngineCommand, GraphParams, LoopScheduler, ScheduleEntry, SyncDeck,
    HIGH_CUT_OPEN_HZ, LOW_CUT_OPEN_HZ,
};
use crate::error::{EngineError, EngineResult};
use crate::loader::PreparedTrack;
use crate::track::{Track, TrackKind};
use crate::types::{DeckId, PlayState, BEATS_PER_BAR};

/// BPM shown for decks without tempo metadata (display only)
pub const DISPLAY_FALLBACK_BPM: f64 = 120.0;

/// State changes reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckEvent {
    Loaded(DeckId),
    Started(DeckId),
    Stopped(DeckId),
    /// A non-looping deck played to the end of its track
    TrackEnded(DeckId),
}

/// Snapshot of one deck for the host
#[derive(Debug, Clone, PartialEq)]
pub struct DeckStatus {
    pub deck: DeckId,
    pub title: Option<String>,
    pub state: PlayState,
    pub position_seconds: f64,
    pub loop_enabled: bool,
    pub loop_bars: u32,
    pub loop_offset_bars: u32,
    pub loop_duration_seconds: Option<f64>,
    pub bpm: Option<f64>,
    pub effective_bpm: Option<f64>,
    pub playback_rate: f64,
    pub pitch_semitones: f32,
    pub volume: f32,
    pub hi_cut: bool,
    pub lo_cut: bool,
    pub peak: f32,
    pub rms: f32,
    pub restarts_executed: u64,
    pub late_restarts: u64,
    /// Restarts lost because the render-side queue was full
    pub dropped_restarts: u64,
    pub scheduler_drift: u64,
}

/// Track-dependent deck data, replaced on every load
#[derive(Debug)]
struct LoadedTrack {
    track: Track,
    sample_rate: u32,
    frames: usize,
    analysis: ContentAnalysis,
    boundaries: Option<LoopBoundaries>,
}

impl LoadedTrack {
    fn duration_seconds(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

/// Public control surface for one deck
pub struct DeckController {
    id: DeckId,
    ctx: AudioContext,
    commands: CommandSender,
    atomics: Arc<DeckAtomics>,
    params: Arc<GraphParams>,
    scheduler: LoopScheduler,
    detector: BoundaryDetector,
    resolver: LoopDurationResolver,
    filters: FilterConfig,
    default_loop_bars: u32,

    loaded: Option<LoadedTrack>,
    state: PlayState,
    loop_bars: u32,
    loop_enabled: bool,
    loop_offset_bars: u32,
    playback_rate: f64,
    /// Tempo the loop period is computed for; follows sync lock-in
    effective_bpm: Option<f64>,
    pitch_semitones: f32,
    volume: f32,
    hi_cut: bool,
    lo_cut: bool,
    /// `tracks_ended` counter value already reported
    seen_tracks_ended: u64,
}

impl DeckController {
    pub fn new(
        id: DeckId,
        ctx: AudioContext,
        commands: CommandSender,
        atomics: Arc<DeckAtomics>,
        params: Arc<GraphParams>,
        config: &EngineConfig,
    ) -> Self {
        params.set_filter_ramp_ms(config.filters.ramp_ms);
        let seen_tracks_ended = atomics.tracks_ended();
        Self {
            id,
            ctx,
            commands,
            scheduler: LoopScheduler::new(id, config.scheduler.lookahead_seconds()),
            detector: BoundaryDetector::new(config.analysis.clone()),
            resolver: LoopDurationResolver::new(config.resolver.clone()),
            filters: config.filters.clone(),
            default_loop_bars: config.default_loop_bars.max(1),
            loaded: None,
            state: PlayState::Stopped,
            loop_bars: config.default_loop_bars.max(1),
            loop_enabled: false,
            loop_offset_bars: 0,
            playback_rate: 1.0,
            effective_bpm: None,
            pitch_semitones: 0.0,
            volume: params.volume(),
            hi_cut: false,
            lo_cut: false,
            seen_tracks_ended,
            atomics,
            params,
        }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    fn send(&mut self, cmd: EngineCommand) -> EngineResult<()> {
        self.commands.send(cmd).map_err(|cmd| {
            log::warn!("Deck {}: command queue full, dropped {:?}", self.id, cmd);
            EngineError::QueueFull(self.id)
        })
    }

    fn loaded(&self) -> EngineResult<&LoadedTrack> {
        self.loaded.as_ref().ok_or(EngineError::NoTrack(self.id))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Track
    // ─────────────────────────────────────────────────────────────────────

    /// Analyze decoded PCM and install it
    pub fn load(&mut self, track: Track, pcm: PcmBuffer) -> EngineResult<()> {
        let prepared = PreparedTrack::prepare(track, pcm, &self.detector);
        self.install(prepared)
    }

    /// Install a track the loader already decoded and analyzed
    ///
    /// Any playing track is stopped. Loop length comes from the track's
    /// authored bar count, or the configured default.
    pub fn install(&mut self, prepared: PreparedTrack) -> EngineResult<()> {
        let PreparedTrack {
            track,
            pcm,
            analysis,
        } = prepared;

        if pcm.is_empty() || pcm.sample_rate == 0 {
            return Err(EngineError::Decode(crate::audio_file::DecodeError::Corrupt(
                "no audio frames".to_string(),
            )));
        }

        let sample_rate = pcm.sample_rate;
        let frames = pcm.len();
        let shared = Shared::new(self.ctx.gc_handle(), pcm);

        self.send(EngineCommand::LoadTrack { pcm: shared })?;
        self.scheduler.stop_looping();

        self.loop_bars = track.kind.authored_bars().unwrap_or(self.default_loop_bars);
        self.loop_offset_bars = 0;
        self.loop_enabled = matches!(track.kind, TrackKind::Loop { .. });
        self.state = PlayState::Stopped;
        self.playback_rate = 1.0;
        self.params.set_playback_rate(1.0);
        self.effective_bpm = track.bpm();
        self.seen_tracks_ended = self.atomics.tracks_ended();

        log::info!(
            "Deck {}: '{}' installed ({:.2}s, {} bars, loop {})",
            self.id,
            track.title,
            frames as f64 / sample_rate as f64,
            self.loop_bars,
            if self.loop_enabled { "on" } else { "off" }
        );

        self.loaded = Some(LoadedTrack {
            track,
            sample_rate,
            frames,
            analysis,
            boundaries: None,
        });
        self.resolve_boundaries();

        let looping = self.loop_enabled;
        self.send(EngineCommand::SetLooping(looping))
    }

    /// Remove the track; the deck goes silent
    pub fn unload(&mut self) -> EngineResult<()> {
        if self.loaded.is_none() {
            return Ok(());
        }
        self.send(EngineCommand::UnloadTrack)?;
        self.scheduler.stop_looping();
        self.loaded = None;
        self.state = PlayState::Stopped;
        self.effective_bpm = None;
        log::info!("Deck {}: unloaded", self.id);
        Ok(())
    }

    pub fn track(&self) -> Option<&Track> {
        self.loaded.as_ref().map(|l| &l.track)
    }

    pub fn has_track(&self) -> bool {
        self.loaded.is_some()
    }

    /// Recompute loop geometry from BPM, bars and the stored analysis
    fn resolve_boundaries(&mut self) {
        let bars = self.loop_bars;
        let Some(loaded) = self.loaded.as_mut() else {
            return;
        };
        loaded.boundaries = match loaded.track.bpm() {
            Some(bpm) if loaded.track.kind.is_loopable() => {
                match self.resolver.resolve(bpm, bars, &loaded.analysis) {
                    Ok(boundaries) => {
                        log::debug!(
                            "Deck {}: loop {:.4}s ({})",
                            self.id,
                            boundaries.actual_loop_duration_seconds,
                            boundaries.strategy
                        );
                        Some(boundaries)
                    }
                    Err(e) => {
                        log::warn!("Deck {}: cannot resolve loop: {}", self.id, e);
                        None
                    }
                }
            }
            _ => None,
        };
    }

    pub fn loop_boundaries(&self) -> Option<&LoopBoundaries> {
        self.loaded.as_ref().and_then(|l| l.boundaries.as_ref())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    /// Start playback
    ///
    /// A looping deck enters on the next beat of the shared grid at its loop
    /// start; any other deck resumes where it was paused.
    pub fn play(&mut self) -> EngineResult<()> {
        if !self.ctx.is_running() {
            return Err(EngineError::PlaybackBlocked);
        }
        let loaded = self.loaded()?;
        if self.state == PlayState::Playing {
            return Ok(());
        }

        if self.loop_enabled && loaded.track.kind.is_loopable() {
            self.start_looping()?;
        } else {
            self.send(EngineCommand::Play {
                at_frame: 0,
                from: None,
            })?;
        }

        self.state = PlayState::Playing;
        log::info!("Deck {}: playing", self.id);
        Ok(())
    }

    fn start_looping(&mut self) -> EngineResult<()> {
        let (period, beat) = self.loop_timing()?;
        let now = self.ctx.now();
        let Some(first) = self.scheduler.start_looping(now, period, beat, true) else {
            return Err(EngineError::InvalidParameter(format!(
                "loop period {:.4}s",
                period
            )));
        };
        let from = self.restart_source_frame(0.0)?;
        self.send(EngineCommand::Play {
            at_frame: self.ctx.seconds_to_frame(first),
            from: Some(from),
        })?;
        self.schedule(now);
        Ok(())
    }

    /// Stop output, keeping the position
    pub fn pause(&mut self) -> EngineResult<()> {
        if self.state != PlayState::Playing {
            return Ok(());
        }
        self.send(EngineCommand::CancelRestarts)?;
        self.send(EngineCommand::Pause)?;
        self.scheduler.stop_looping();
        self.state = PlayState::Stopped;
        log::info!("Deck {}: paused", self.id);
        Ok(())
    }

    /// Stop output and rewind; pending restarts are dropped
    pub fn stop(&mut self) -> EngineResult<()> {
        if self.loaded.is_none() {
            return Ok(());
        }
        self.send(EngineCommand::Stop)?;
        self.scheduler.stop_looping();
        self.state = PlayState::Stopped;
        log::info!("Deck {}: stopped", self.id);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tempo and loop geometry
    // ─────────────────────────────────────────────────────────────────────

    pub fn bpm(&self) -> Option<f64> {
        self.loaded.as_ref().and_then(|l| l.track.bpm())
    }

    /// BPM for display; unknown tempo shows as 120
    pub fn display_bpm(&self) -> f64 {
        self.effective_bpm
            .or_else(|| self.bpm())
            .unwrap_or(DISPLAY_FALLBACK_BPM)
    }

    /// Override the nominal BPM
    ///
    /// Loop length is re-resolved and the new period applies from the next
    /// restart that has not been queued yet.
    pub fn set_bpm(&mut self, bpm: f64) -> EngineResult<()> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(EngineError::InvalidParameter(format!("bpm {}", bpm)));
        }
        let rate = self.playback_rate;
        let loaded = self.loaded.as_mut().ok_or(EngineError::NoTrack(self.id))?;
        if !loaded.track.kind.is_loopable() {
            return Err(EngineError::InvalidParameter(format!(
                "deck {} source has no tempo",
                self.id
            )));
        }
        loaded.track.kind.set_bpm(bpm);
        self.effective_bpm = Some(bpm * rate);
        self.resolve_boundaries();
        self.refresh_period();
        log::info!("Deck {}: BPM set to {:.2}", self.id, bpm);
        Ok(())
    }

    pub fn loop_length_bars(&self) -> u32 {
        self.loop_bars
    }

    pub fn set_loop_length_bars(&mut self, bars: u32) -> EngineResult<()> {
        if bars == 0 {
            return Err(EngineError::InvalidParameter("loop length must be >= 1 bar".into()));
        }
        self.loop_bars = bars;
        self.resolve_boundaries();
        self.refresh_period();
        log::debug!("Deck {}: loop length {} bars", self.id, bars);
        Ok(())
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    /// Turn looping on or off; repeated calls with the same value do nothing
    ///
    /// Turning it off drops queued restarts and leaves playback running from
    /// where it is.
    pub fn set_loop_enabled(&mut self, enabled: bool) -> EngineResult<()> {
        if enabled == self.loop_enabled {
            return Ok(());
        }

        if enabled {
            if let Some(loaded) = &self.loaded {
                if !loaded.track.kind.is_loopable() {
                    return Err(EngineError::InvalidParameter(format!(
                        "deck {} source cannot loop",
                        self.id
                    )));
                }
            }
            if self.state == PlayState::Playing {
                let (period, beat) = self.loop_timing()?;
                self.scheduler
                    .start_looping(self.ctx.now(), period, beat, true);
            }
            self.loop_enabled = true;
            self.send(EngineCommand::SetLooping(true))?;
            if self.scheduler.is_looping() {
                self.schedule(self.ctx.now());
            }
        } else {
            self.loop_enabled = false;
            self.scheduler.stop_looping();
            self.send(EngineCommand::CancelRestarts)?;
            self.send(EngineCommand::SetLooping(false))?;
        }

        log::info!(
            "Deck {}: loop {}",
            self.id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub fn loop_position_bars(&self) -> u32 {
        self.loop_offset_bars
    }

    /// Move the loop start `bars` bars into the track
    pub fn set_loop_position_bars(&mut self, bars: u32) -> EngineResult<()> {
        let loaded = self.loaded()?;
        let bpm = loaded.track.bpm().ok_or(EngineError::MissingBpm(self.id))?;
        let offset = bars_to_seconds(bars, bpm);
        if offset >= loaded.duration_seconds() {
            return Err(EngineError::InvalidParameter(format!(
                "loop start at bar {} is past the end of the track",
                bars
            )));
        }
        self.loop_offset_bars = bars;
        log::debug!("Deck {}: loop start at bar {}", self.id, bars);
        Ok(())
    }

    /// `(wall-clock loop period, beat period)` at the current tempo
    fn loop_timing(&self) -> EngineResult<(f64, f64)> {
        let loaded = self.loaded()?;
        let nominal = loaded.track.bpm().ok_or(EngineError::MissingBpm(self.id))?;
        let boundaries = loaded.boundaries.ok_or(EngineError::MissingBpm(self.id))?;
        let effective = self.effective_bpm.unwrap_or(nominal);
        let period = boundaries.actual_loop_duration_seconds * nominal / effective;
        Ok((period, 60.0 / effective))
    }

    fn refresh_period(&mut self) {
        if let Ok((period, _)) = self.loop_timing() {
            self.scheduler.set_period(period);
        }
    }

    /// Source frame a restart at loop `phase` jumps to
    ///
    /// The loop start is the bar offset converted with the nominal BPM. For
    /// silence-padded clips it is shifted to where the content begins.
    fn restart_source_frame(&self, phase: f64) -> EngineResult<f64> {
        let loaded = self.loaded()?;
        let bpm = loaded.track.bpm().ok_or(EngineError::MissingBpm(self.id))?;
        let boundaries = loaded.boundaries.ok_or(EngineError::MissingBpm(self.id))?;

        let mut start = bars_to_seconds(self.loop_offset_bars, bpm);
        if boundaries.strategy == LoopStrategy::SilencePadded {
            start += boundaries.content_start_seconds;
        }
        let seconds = start + phase * boundaries.actual_loop_duration_seconds;
        Ok(seconds * loaded.sample_rate as f64)
    }

    /// Fraction of the loop played at clock time `at`, from the render position
    ///
    /// Not wrapped: a loop that overran its restart reads past 1. `None` until
    /// the render path has started the deck, or while it holds silence at the
    /// end of the clip.
    fn played_fraction(&self, at: f64) -> Option<f64> {
        let loaded = self.loaded.as_ref()?;
        let loop_seconds = loaded.boundaries?.actual_loop_duration_seconds;
        if !(loop_seconds > 0.0) || !self.atomics.is_playing() {
            return None;
        }
        let position = self.atomics.position();
        if position as usize >= loaded.frames {
            return None;
        }

        let sample_rate = loaded.sample_rate as f64;
        let start = self.restart_source_frame(0.0).ok()? / sample_rate;
        let played = position as f64 / sample_rate - start
            + (at - self.ctx.now()) * self.playback_rate;
        Some(played / loop_seconds)
    }

    /// Move the next restart to where the audible loop ends at the current rate
    ///
    /// Restarts queued before a rate change were timed for the old period.
    fn rebase_next_restart(&mut self) {
        if self.state != PlayState::Playing || !self.scheduler.is_looping() {
            return;
        }
        let now = self.ctx.now();
        let Some(played) = self.played_fraction(now) else {
            return;
        };
        let next = now + (1.0 - played.clamp(0.0, 1.0)) * self.scheduler.period();
        if self.send(EngineCommand::CancelRestarts).is_err() {
            return;
        }
        self.scheduler.realign(now, next, 0.0);
        self.schedule(now);
    }

    fn send_restart(&mut self, entry: ScheduleEntry) -> EngineResult<()> {
        let source_frame = self.restart_source_frame(entry.phase)?;
        let at_frame = self.ctx.seconds_to_frame(entry.start_time);
        self.send(EngineCommand::ScheduleRestart {
            at_frame,
            source_frame,
        })
    }

    /// Forward due scheduler entries to the render path
    fn schedule(&mut self, now: f64) -> usize {
        let entries = self.scheduler.tick(now);
        let mut sent = 0;
        for entry in entries {
            match self.send_restart(entry) {
                Ok(()) => sent += 1,
                Err(e) => log::warn!("Deck {}: restart at {:.4}s lost: {}", self.id, entry.start_time, e),
            }
        }
        sent
    }

    /// Control tick: queue upcoming restarts and pick up render-side changes
    pub fn tick(&mut self, now: f64) -> Option<DeckEvent> {
        if self.state == PlayState::Playing && self.scheduler.is_looping() {
            self.schedule(now);
        }

        let ended = self.atomics.tracks_ended();
        if ended != self.seen_tracks_ended {
            self.seen_tracks_ended = ended;
            if self.state == PlayState::Playing && !self.loop_enabled {
                self.state = PlayState::Stopped;
                log::info!("Deck {}: track ended", self.id);
                return Some(DeckEvent::TrackEnded(self.id));
            }
        }
        None
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sound shaping
    // ─────────────────────────────────────────────────────────────────────

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Deck volume, clamped to [0, 1]
    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.volume = volume;
        self.params.set_volume(volume);
    }

    /// Low-pass to the configured hi-cut frequency, or fully open
    pub fn set_hi_cut(&mut self, on: bool) {
        self.hi_cut = on;
        let hz = if on { self.filters.hi_cut_hz } else { HIGH_CUT_OPEN_HZ };
        self.params.set_high_cut_hz(hz);
    }

    /// High-pass to the configured lo-cut frequency, or fully open
    pub fn set_lo_cut(&mut self, on: bool) {
        self.lo_cut = on;
        let hz = if on { self.filters.lo_cut_hz } else { LOW_CUT_OPEN_HZ };
        self.params.set_low_cut_hz(hz);
    }

    pub fn hi_cut(&self) -> bool {
        self.hi_cut
    }

    pub fn lo_cut(&self) -> bool {
        self.lo_cut
    }

    /// Tempo-independent transposition; returns the clamped value applied
    pub fn set_pitch_semitones(&mut self, semitones: f32) -> f32 {
        let applied = self.params.set_pitch_semitones(semitones);
        self.pitch_semitones = applied;
        applied
    }

    pub fn pitch_semitones(&self) -> f32 {
        self.pitch_semitones
    }

    // ─────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────

    pub fn atomics(&self) -> &Arc<DeckAtomics> {
        &self.atomics
    }

    pub fn status(&self) -> DeckStatus {
        let position_seconds = self
            .loaded
            .as_ref()
            .map(|l| self.atomics.position() as f64 / l.sample_rate as f64)
            .unwrap_or(0.0);

        DeckStatus {
            deck: self.id,
            title: self.track().map(|t| t.title.clone()),
            state: self.atomics.play_state(),
            position_seconds,
            loop_enabled: self.loop_enabled,
            loop_bars: self.loop_bars,
            loop_offset_bars: self.loop_offset_bars,
            loop_duration_seconds: self
                .loop_boundaries()
                .map(|b| b.actual_loop_duration_seconds),
            bpm: self.bpm(),
            effective_bpm: self.effective_bpm,
            playback_rate: self.playback_rate,
            pitch_semitones: self.pitch_semitones,
            volume: self.volume,
            hi_cut: self.hi_cut,
            lo_cut: self.lo_cut,
            peak: self.atomics.peak.load(),
            rms: self.atomics.rms.load(),
            restarts_executed: self.atomics.restarts_executed(),
            late_restarts: self.atomics.late_restarts(),
            dropped_restarts: self.atomics.dropped_restarts(),
            scheduler_drift: self.scheduler.drift_count(),
        }
    }
}

impl SyncDeck for DeckController {
    fn nominal_bpm(&self) -> Option<f64> {
        self.bpm()
    }

    fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    fn apply_rate(&mut self, rate: f64) {
        if rate > 0.0 && rate.is_finite() {
            self.playback_rate = rate;
            self.params.set_playback_rate(rate as f32);
        }
    }

    fn set_effective_bpm(&mut self, bpm: f64) {
        if bpm > 0.0 && bpm.is_finite() {
            self.effective_bpm = Some(bpm);
            self.refresh_period();
            self.rebase_next_restart();
        }
    }

    fn is_looping(&self) -> bool {
        self.state == PlayState::Playing && self.scheduler.is_looping()
    }

    /// Phase from the source position; the schedule history is the fallback
    /// while the render path has not reported one
    fn loop_phase(&self, at: f64) -> Option<f64> {
        if !self.is_looping() {
            return None;
        }
        self.played_fraction(at)
            .map(|played| played.rem_euclid(1.0))
            .or_else(|| self.scheduler.current_phase(at))
    }

    fn align_to_phase(&mut self, now: f64, at: f64, phase: f64) -> EngineResult<()> {
        if !self.is_looping() {
            return Ok(());
        }
        self.send(EngineCommand::CancelRestarts)?;
        self.scheduler.realign(now, at, phase);
        self.schedule(now);
        Ok(())
    }
}

fn bars_to_seconds(bars: u32, bpm: f64) -> f64 {
    bars as f64 * BEATS_PER_BAR as f64 * 60.0 / bpm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ManualClock;
    use crate::engine::command_channel;

    const SR: u32 = 48000;

    struct Rig {
        deck: DeckController,
        rx: rtrb::Consumer<EngineCommand>,
        clock: Arc<ManualClock>,
        params: Arc<GraphParams>,
    }

    impl Rig {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new());
            let ctx = AudioContext::with_clock(SR, clock.clone());
            ctx.resume();
            let (tx, rx) = command_channel();
            let params = Arc::new(GraphParams::new());
            let deck = DeckController::new(
                DeckId::A,
                ctx,
                tx,
                Arc::new(DeckAtomics::new()),
                params.clone(),
                &EngineConfig::default(),
            );
            Self {
                deck,
                rx,
                clock,
                params,
            }
        }

        fn drain(&mut self) -> Vec<EngineCommand> {
            let mut out = Vec::new();
            while let Ok(cmd) = self.rx.pop() {
                out.push(cmd);
            }
            out
        }

        fn restarts(&mut self) -> Vec<(u64, f64)> {
            self.drain()
                .into_iter()
                .filter_map(|cmd| match cmd {
                    EngineCommand::ScheduleRestart {
                        at_frame,
                        source_frame,
                    } => Some((at_frame, source_frame)),
                    _ => None,
                })
                .collect()
        }
    }

    /// 120 BPM, 8 bars of full-scale tone: 16s
    fn full_loop() -> PcmBuffer {
        PcmBuffer::mono(SR, vec![0.5; SR as usize * 16])
    }

    #[test]
    fn test_play_without_track() {
        let mut rig = Rig::new();
        assert!(matches!(rig.deck.play(), Err(EngineError::NoTrack(DeckId::A))));
    }

    #[test]
    fn test_play_blocked_while_suspended() {
        let mut rig = Rig::new();
        rig.deck
            .load(Track::looped("Loop", 120.0, Some(8)), full_loop())
            .unwrap();
        rig.deck.ctx.suspend();
        assert!(matches!(rig.deck.play(), Err(EngineError::PlaybackBlocked)));
        assert_eq!(rig.deck.state(), PlayState::Stopped);
    }

    #[test]
    fn test_looping_requires_bpm() {
        let mut rig = Rig::new();
        rig.deck
            .load(
                Track::new("Song", TrackKind::FullSong { bpm: None }),
                full_loop(),
            )
            .unwrap();
        assert_eq!(rig.deck.display_bpm(), DISPLAY_FALLBACK_BPM);
        assert!(!rig.deck.loop_enabled());

        // Straight playback needs no tempo
        rig.deck.play().unwrap();
        rig.deck.stop().unwrap();

        rig.deck.set_loop_enabled(true).unwrap();
        assert!(matches!(rig.deck.play(), Err(EngineError::MissingBpm(DeckId::A))));
    }

    #[test]
    fn test_load_resolves_loop() {
        let mut rig = Rig::new();
        rig.deck
            .load(Track::looped("Loop", 120.0, Some(8)), full_loop())
            .unwrap();

        let boundaries = rig.deck.loop_boundaries().unwrap();
        assert!((boundaries.actual_loop_duration_seconds - 16.0).abs() < 1e-9);
        assert!(rig.deck.loop_enabled());

        let cmds = rig.drain();
        assert!(matches!(cmds[0], EngineCommand::LoadTrack { .. }));
        assert!(matches!(cmds[1], EngineCommand::SetLooping(true)));
    }

    #[test]
    fn test_play_enters_on_beat_and_schedules() {
        let mut rig = Rig::new();
        rig.deck
            .load(Track::looped("Loop", 120.0, Some(8)), full_loop())
            .unwrap();
        rig.drain();

        rig.clock.set(1.3);
        rig.deck.play().unwrap();
        let cmds = rig.drain();
        match cmds[0] {
            EngineCommand::Play { at_frame, from } => {
                assert_eq!(at_frame, 72000); // 1.5s, next beat at 120 BPM
                assert_eq!(from, Some(0.0));
            }
            ref other => panic!("unexpected {:?}", other),
        }

        // Successive restarts every 16s
        let mut restarts = Vec::new();
        let mut now = 1.3;
        while now < 50.0 {
            rig.clock.set(now);
            rig.deck.tick(now);
            restarts.extend(rig.restarts());
            now += 0.025;
        }
        assert!(restarts.len() >= 3);
        for pair in restarts.windows(2) {
            assert_eq!(pair[1].0 - pair[0].0, 16 * SR as u64);
            assert_eq!(pair[1].1, 0.0);
        }
    }

    #[test]
    fn test_loop_disable_is_idempotent() {
        let mut rig = Rig::new();
        rig.deck
            .load(Track::looped("Loop", 120.0, Some(8)), full_loop())
            .unwrap();
        rig.deck.play().unwrap();
        rig.drain();

        rig.deck.set_loop_enabled(false).unwrap();
        let first = rig.drain();
        assert!(first
            .iter()
            .any(|c| matches!(c, EngineCommand::CancelRestarts)));

        rig.deck.set_loop_enabled(false).unwrap();
        assert!(rig.drain().is_empty());

        for step in 0..2000 {
            rig.deck.tick(step as f64 * 0.025);
        }
        assert!(rig.restarts().is_empty());
        assert!(rig.deck.is_playing());
    }

    #[test]
    fn test_loop_position_moves_restart_source() {
        let mut rig = Rig::new();
        rig.deck
            .load(Track::looped("Loop", 120.0, Some(4)), full_loop())
            .unwrap();
        rig.deck.set_loop_position_bars(2).unwrap();
        rig.deck.play().unwrap();

        let restarts = rig.restarts();
        // 2 bars at 120 BPM = 4s
        assert_eq!(restarts[0].1, 4.0 * SR as f64);

        assert!(rig.deck.set_loop_position_bars(8).is_err());
        assert_eq!(rig.deck.loop_position_bars(), 2);
    }

    #[test]
    fn test_set_bpm_changes_future_period() {
        let mut rig = Rig::new();
        rig.deck
            .load(Track::looped("Loop", 120.0, Some(1)), full_loop())
            .unwrap();
        rig.deck.play().unwrap();
        let first = rig.restarts();
        assert_eq!(first.len(), 1);

        rig.deck.set_bpm(60.0).unwrap();
        assert_eq!(rig.deck.display_bpm(), 60.0);
        let boundaries = rig.deck.loop_boundaries().unwrap();
        assert!((boundaries.actual_loop_duration_seconds - 4.0).abs() < 1e-9);

        assert!(rig.deck.set_bpm(0.0).is_err());
        assert!(rig.deck.set_bpm(f64::NAN).is_err());
    }

    #[test]
    fn test_filters_and_pitch() {
        let mut rig = Rig::new();
        rig.deck.set_hi_cut(true);
        assert_eq!(rig.params.high_cut_hz(), 2000.0);
        rig.deck.set_lo_cut(true);
        assert_eq!(rig.params.low_cut_hz(), 500.0);
        rig.deck.set_hi_cut(false);
        assert_eq!(rig.params.high_cut_hz(), HIGH_CUT_OPEN_HZ);

        assert_eq!(rig.deck.set_pitch_semitones(20.0), 8.0);
        assert_eq!(rig.deck.set_pitch_semitones(-3.5), -3.5);
        assert_eq!(rig.params.pitch_semitones(), -3.5);

        rig.deck.set_volume(1.7);
        assert_eq!(rig.params.volume(), 1.0);
    }

    #[test]
    fn test_pitch_leaves_loop_alone() {
        let mut rig = Rig::new();
        rig.deck
            .load(Track::looped("Loop", 120.0, Some(8)), full_loop())
            .unwrap();
        let before = *rig.deck.loop_boundaries().unwrap();
        rig.deck.set_pitch_semitones(5.0);
        assert_eq!(*rig.deck.loop_boundaries().unwrap(), before);
        assert_eq!(rig.params.playback_rate(), 1.0);
    }

    #[test]
    fn test_pause_cancels_restarts() {
        let mut rig = Rig::new();
        rig.deck
            .load(Track::looped("Loop", 120.0, Some(8)), full_loop())
            .unwrap();
        rig.deck.play().unwrap();
        rig.drain();

        rig.deck.pause().unwrap();
        let cmds = rig.drain();
        assert!(matches!(cmds[0], EngineCommand::CancelRestarts));
        assert!(matches!(cmds[1], EngineCommand::Pause));
        assert_eq!(rig.deck.tick(40.0), None);
        assert!(rig.restarts().is_empty());
    }

    #[test]
    fn test_tempo_lock_moves_next_restart() {
        use std::sync::atomic::Ordering;

        let mut rig = Rig::new();
        rig.deck
            .load(Track::looped("Loop", 120.0, Some(8)), full_loop())
            .unwrap();
        rig.deck.play().unwrap();
        assert_eq!(rig.restarts(), vec![(0, 0.0)]);

        // Render has played 5s of source by t=4s while speeding up
        rig.clock.set(4.0);
        let atomics = rig.deck.atomics().clone();
        atomics.state.store(1, Ordering::Relaxed);
        atomics.position.store(5 * SR as u64, Ordering::Relaxed);

        rig.deck.apply_rate(1.25);
        assert!((rig.deck.loop_phase(4.0).unwrap() - 0.3125).abs() < 1e-12);
        assert!((rig.deck.loop_phase(5.0).unwrap() - 0.390625).abs() < 1e-12);

        rig.deck.set_effective_bpm(150.0);
        let cmds = rig.drain();
        assert!(matches!(cmds[0], EngineCommand::CancelRestarts));

        // 11s of source left at 1.25x: the loop ends at 12.8s, not 16s
        rig.clock.set(12.75);
        rig.deck.tick(12.75);
        assert_eq!(rig.restarts(), vec![(614400, 0.0)]);
    }

    #[test]
    fn test_radio_cannot_loop() {
        let mut rig = Rig::new();
        rig.deck
            .load(
                Track::new(
                    "Radio",
                    TrackKind::RadioStation {
                        station: "fm".into(),
                    },
                ),
                full_loop(),
            )
            .unwrap();
        assert!(rig.deck.loop_boundaries().is_none());
        assert!(rig.deck.set_loop_enabled(true).is_err());
        assert!(rig.deck.set_bpm(120.0).is_err());
    }
}
