//! Render-side deck: sample-accurate playback of one decoded track
//!
//! The deck reads its PCM buffer with a fractional position, so a playback
//! rate (tempo sync) and a sample-rate difference between file and device
//! are both absorbed by the read step:
//!
//! ```text
//! step = playback_rate * pcm_sample_rate / output_sample_rate
//! ```
//!
//! Timed commands are kept in a small fixed queue and executed at their exact
//! output frame: a block is split into segments at every due restart.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use basedrop::Shared;

use crate::audio_file::PcmBuffer;
use crate::types::{AtomicF32, DeckId, PlayState, StereoBuffer, StereoSample};

use super::EngineCommand;

/// Maximum number of restarts a deck can hold ahead of time
pub const RESTART_QUEUE_LEN: usize = 32;

/// Lock-free deck state for host/controller reads
///
/// Written only by the render path. All loads are `Relaxed`: values are
/// independent snapshots polled at control rate.
#[derive(Debug, Default)]
pub struct DeckAtomics {
    /// Source position in frames of the loaded PCM
    pub position: AtomicU64,
    /// 0 = Stopped, 1 = Playing
    pub state: AtomicU8,
    pub has_track: AtomicBool,
    pub loop_active: AtomicBool,
    /// Analyzer peak of the last block (post-gain)
    pub peak: AtomicF32,
    /// Analyzer RMS of the last block (post-gain)
    pub rms: AtomicF32,
    /// Loop restarts executed
    pub restarts_executed: AtomicU64,
    /// Restarts whose frame had already passed when they were executed
    pub late_restarts: AtomicU64,
    /// Restarts dropped because the queue was full
    pub dropped_restarts: AtomicU64,
    /// Times a non-looping deck ran off the end of its track
    pub tracks_ended: AtomicU64,
}

impl DeckAtomics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn play_state(&self) -> PlayState {
        match self.state.load(Ordering::Relaxed) {
            1 => PlayState::Playing,
            _ => PlayState::Stopped,
        }
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.play_state() == PlayState::Playing
    }

    #[inline]
    pub fn has_track(&self) -> bool {
        self.has_track.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn restarts_executed(&self) -> u64 {
        self.restarts_executed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn late_restarts(&self) -> u64 {
        self.late_restarts.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped_restarts(&self) -> u64 {
        self.dropped_restarts.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tracks_ended(&self) -> u64 {
        self.tracks_ended.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: PlayState) {
        let value = match state {
            PlayState::Stopped => 0,
            PlayState::Playing => 1,
        };
        self.state.store(value, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Restart {
    at_frame: u64,
    source_frame: f64,
}

/// Fixed-capacity restart queue ordered by frame (no allocation)
#[derive(Debug)]
struct RestartQueue {
    items: [Restart; RESTART_QUEUE_LEN],
    len: usize,
}

impl RestartQueue {
    fn new() -> Self {
        Self {
            items: [Restart::default(); RESTART_QUEUE_LEN],
            len: 0,
        }
    }

    /// Insert in frame order; false if full
    fn push(&mut self, restart: Restart) -> bool {
        if self.len == RESTART_QUEUE_LEN {
            return false;
        }
        let idx = self.items[..self.len]
            .iter()
            .position(|r| r.at_frame > restart.at_frame)
            .unwrap_or(self.len);
        self.items.copy_within(idx..self.len, idx + 1);
        self.items[idx] = restart;
        self.len += 1;
        true
    }

    fn front(&self) -> Option<&Restart> {
        self.items[..self.len].first()
    }

    fn pop_front(&mut self) -> Option<Restart> {
        if self.len == 0 {
            return None;
        }
        let first = self.items[0];
        self.items.copy_within(1..self.len, 0);
        self.len -= 1;
        Some(first)
    }

    fn clear(&mut self) {
        self.len = 0;
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingStart {
    at_frame: u64,
    from: Option<f64>,
}

/// Render-side player for one deck
pub struct Deck {
    id: DeckId,
    pcm: Option<Shared<PcmBuffer>>,
    state: PlayState,
    /// Fractional read position in source frames
    position: f64,
    /// pcm_sample_rate / output_sample_rate
    rate_scale: f64,
    output_sample_rate: u32,
    looping: bool,
    pending_start: Option<PendingStart>,
    restarts: RestartQueue,
    atomics: Arc<DeckAtomics>,
}

impl Deck {
    pub fn new(id: DeckId, output_sample_rate: u32) -> Self {
        Self {
            id,
            pcm: None,
            state: PlayState::Stopped,
            position: 0.0,
            rate_scale: 1.0,
            output_sample_rate,
            looping: false,
            pending_start: None,
            restarts: RestartQueue::new(),
            atomics: Arc::new(DeckAtomics::new()),
        }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    /// Shared atomics for lock-free reads
    pub fn atomics(&self) -> Arc<DeckAtomics> {
        Arc::clone(&self.atomics)
    }

    /// Borrowed atomics for the render-side analyzer
    pub fn meters(&self) -> &DeckAtomics {
        &self.atomics
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn has_track(&self) -> bool {
        self.pcm.is_some()
    }

    /// Apply one command from the control path
    pub fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::LoadTrack { pcm } => {
                self.rate_scale = pcm.sample_rate as f64 / self.output_sample_rate as f64;
                // The previous buffer is released through the collector
                self.pcm = Some(pcm);
                self.reset_transport();
                self.atomics.has_track.store(true, Ordering::Relaxed);
            }
            EngineCommand::UnloadTrack => {
                self.pcm = None;
                self.reset_transport();
                self.atomics.has_track.store(false, Ordering::Relaxed);
            }
            EngineCommand::Play { at_frame, from } => {
                if self.pcm.is_some() {
                    self.pending_start = Some(PendingStart { at_frame, from });
                }
            }
            EngineCommand::Pause => {
                self.pending_start = None;
                self.set_state(PlayState::Stopped);
            }
            EngineCommand::Stop => {
                self.reset_transport();
            }
            EngineCommand::SetLooping(on) => {
                self.looping = on;
                self.atomics.loop_active.store(on, Ordering::Relaxed);
            }
            EngineCommand::ScheduleRestart {
                at_frame,
                source_frame,
            } => {
                if !self.restarts.push(Restart {
                    at_frame,
                    source_frame,
                }) {
                    self.atomics.dropped_restarts.fetch_add(1, Ordering::Relaxed);
                }
            }
            EngineCommand::CancelRestarts => self.restarts.clear(),
        }
    }

    fn reset_transport(&mut self) {
        self.pending_start = None;
        self.restarts.clear();
        self.position = 0.0;
        self.set_state(PlayState::Stopped);
        self.atomics.position.store(0, Ordering::Relaxed);
    }

    fn set_state(&mut self, state: PlayState) {
        self.state = state;
        self.atomics.set_state(state);
    }

    /// Render one block starting at absolute output frame `block_start`
    ///
    /// Real-time safe: no allocation, no locks.
    pub fn process(&mut self, output: &mut StereoBuffer, block_start: u64, playback_rate: f64) {
        let len = output.len();
        let Some(pcm) = self.pcm.clone() else {
            output.fill_silence();
            return;
        };
        let step = playback_rate * self.rate_scale;

        let mut offset = 0;
        while offset < len {
            let frame = block_start + offset as u64;
            self.run_due_events(frame, block_start);

            let next_event = self.next_event_frame();
            let seg_end = match next_event {
                Some(at) if at > frame => len.min((at - block_start) as usize),
                _ => len,
            };

            let segment = &mut output.as_mut_slice()[offset..seg_end];
            if self.state == PlayState::Playing {
                self.render_segment(&pcm, segment, step);
            } else {
                segment.fill(StereoSample::silence());
            }
            offset = seg_end;
        }

        self.atomics
            .position
            .store(self.position.max(0.0) as u64, Ordering::Relaxed);
    }

    fn run_due_events(&mut self, frame: u64, block_start: u64) {
        if let Some(start) = self.pending_start {
            if start.at_frame <= frame {
                if let Some(from) = start.from {
                    self.position = from.max(0.0);
                }
                self.pending_start = None;
                self.set_state(PlayState::Playing);
            }
        }

        while let Some(restart) = self.restarts.front().copied() {
            if restart.at_frame > frame {
                break;
            }
            self.restarts.pop_front();
            if self.state != PlayState::Playing {
                continue;
            }
            if restart.at_frame < block_start {
                self.atomics.late_restarts.fetch_add(1, Ordering::Relaxed);
            }
            self.position = restart.source_frame.max(0.0);
            self.atomics.restarts_executed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn next_event_frame(&self) -> Option<u64> {
        let start = self.pending_start.map(|s| s.at_frame);
        let restart = self.restarts.front().map(|r| r.at_frame);
        match (start, restart) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn render_segment(&mut self, pcm: &PcmBuffer, segment: &mut [StereoSample], step: f64) {
        let total = pcm.len();
        for i in 0..segment.len() {
            let index = self.position as usize;
            if index >= total {
                // Looping decks hold at the end until the next restart
                self.position = total as f64;
                if !self.looping {
                    self.set_state(PlayState::Stopped);
                    self.atomics.tracks_ended.fetch_add(1, Ordering::Relaxed);
                }
                segment[i..].fill(StereoSample::silence());
                return;
            }

            let frac = (self.position - index as f64) as f32;
            let current = pcm.frame(index);
            segment[i] = if frac > 0.0 && index + 1 < total {
                current.lerp(&pcm.frame(index + 1), frac)
            } else {
                current
            };
            self.position += step;
        }
    }
}
