//! Lookahead loop scheduler
//!
//! Runs on the control thread. Every tick it emits restart entries for all
//! loop boundaries that fall within the lookahead window, so the render path
//! always holds the next restart before it is due and can execute it at the
//! exact frame. Times are seconds on the [`AudioContext`](crate::context::AudioContext)
//! clock.
//!
//! ```text
//!   now          now + lookahead
//!    |================|
//!         ^ entry emitted here, executed sample-accurately later
//! ```
//!
//! The first boundary is the next beat on a grid anchored at clock zero, so
//! two decks started at different times still restart on shared beats.

use std::collections::VecDeque;

use crate::types::DeckId;

/// Emitted entries kept for phase queries
const HISTORY_LEN: usize = 8;

/// One scheduled loop restart
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleEntry {
    pub deck: DeckId,
    /// Absolute clock time of the restart
    pub start_time: f64,
    /// Wall-clock time until the following restart
    pub duration: f64,
    /// Loop phase playback restarts at; 0 except for phase alignment
    pub phase: f64,
}

impl ScheduleEntry {
    /// Full loop period this entry belongs to
    pub fn period(&self) -> f64 {
        self.duration / (1.0 - self.phase)
    }

    /// Loop phase at `time`, assuming playback continues from this entry
    pub fn phase_at(&self, time: f64) -> f64 {
        (self.phase + (time - self.start_time) / self.period()).rem_euclid(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Looping,
}

/// Per-deck lookahead scheduler
#[derive(Debug)]
pub struct LoopScheduler {
    deck: DeckId,
    lookahead: f64,
    state: SchedulerState,
    /// Wall-clock loop period used for the next entries
    period: f64,
    next_loop_time: f64,
    /// Phase for the next entry (consumed once)
    next_phase: f64,
    history: VecDeque<ScheduleEntry>,
    drift_count: u64,
}

impl LoopScheduler {
    pub fn new(deck: DeckId, lookahead_seconds: f64) -> Self {
        Self {
            deck,
            lookahead: lookahead_seconds.max(0.0),
            state: SchedulerState::Idle,
            period: 0.0,
            next_loop_time: 0.0,
            next_phase: 0.0,
            history: VecDeque::with_capacity(HISTORY_LEN),
            drift_count: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_looping(&self) -> bool {
        self.state == SchedulerState::Looping
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn next_loop_time(&self) -> Option<f64> {
        self.is_looping().then_some(self.next_loop_time)
    }

    /// Entries whose restart time already elapsed when they were emitted
    pub fn drift_count(&self) -> u64 {
        self.drift_count
    }

    /// Start looping on the next beat boundary after `now`
    ///
    /// Returns the first boundary, or `None` if `enabled` is false or the
    /// period is not usable.
    pub fn start_looping(
        &mut self,
        now: f64,
        period: f64,
        beat_period: f64,
        enabled: bool,
    ) -> Option<f64> {
        if !enabled || !(period > 0.0 && period.is_finite()) {
            return None;
        }

        let first = if beat_period > 0.0 && beat_period.is_finite() {
            let boundary = (now / beat_period).ceil() * beat_period;
            if boundary < now {
                boundary + beat_period
            } else {
                boundary
            }
        } else {
            now
        };

        self.state = SchedulerState::Looping;
        self.period = period;
        self.next_loop_time = first;
        self.next_phase = 0.0;
        self.history.clear();

        log::debug!(
            "Deck {} looping every {:.4}s from t={:.4}",
            self.deck,
            period,
            first
        );
        Some(first)
    }

    /// Back to idle; pending entries are forgotten
    pub fn stop_looping(&mut self) {
        if self.state == SchedulerState::Looping {
            log::debug!("Deck {} loop scheduling stopped", self.deck);
        }
        self.state = SchedulerState::Idle;
        self.next_phase = 0.0;
        self.history.clear();
    }

    /// Change the period for entries not yet emitted
    pub fn set_period(&mut self, period: f64) {
        if period > 0.0 && period.is_finite() {
            self.period = period;
        }
    }

    /// Emit every restart due before `now + lookahead`
    pub fn tick(&mut self, now: f64) -> Vec<ScheduleEntry> {
        let mut entries = Vec::new();
        if self.state != SchedulerState::Looping {
            return entries;
        }

        let horizon = now + self.lookahead;
        while self.next_loop_time < horizon {
            let phase = self.next_phase;
            let entry = ScheduleEntry {
                deck: self.deck,
                start_time: self.next_loop_time,
                duration: self.period * (1.0 - phase),
                phase,
            };

            if entry.start_time < now {
                self.drift_count += 1;
                log::debug!(
                    "Deck {} restart {:.4}s late (drift #{})",
                    self.deck,
                    now - entry.start_time,
                    self.drift_count
                );
            }

            self.next_loop_time += entry.duration;
            self.next_phase = 0.0;

            if self.history.len() == HISTORY_LEN {
                self.history.pop_front();
            }
            self.history.push_back(entry);
            entries.push(entry);
        }
        entries
    }

    /// Normalized position within the loop playing at `now`
    ///
    /// `None` before the first restart or while idle.
    pub fn current_phase(&self, now: f64) -> Option<f64> {
        if self.state != SchedulerState::Looping {
            return None;
        }
        self.history
            .iter()
            .rev()
            .find(|e| e.start_time <= now)
            .map(|e| e.phase_at(now))
    }

    /// Replace pending entries with a restart at `at` that resumes at `phase`
    ///
    /// Entries already emitted for times after `now` are dropped from the
    /// history; the caller cancels them on the render side.
    pub fn realign(&mut self, now: f64, at: f64, phase: f64) {
        if self.state != SchedulerState::Looping {
            return;
        }
        self.history.retain(|e| e.start_time <= now);
        self.next_loop_time = at.max(now);
        self.next_phase = phase.rem_euclid(1.0);
        log::debug!(
            "Deck {} realigned to phase {:.4} at t={:.4}",
            self.deck,
            self.next_phase,
            self.next_loop_time
        );
    }
}
