//! Shared audio context
//!
//! One `AudioContext` is created at startup and handed to every component that
//! needs the output sample rate, the render clock, the playback gate or the
//! deferred-deallocation collector. Cloning is cheap (`Arc` inside).
//!
//! ## Clock
//!
//! The render path advances a [`FrameClock`] by the number of frames it
//! produced in each callback, so `now()` on the control thread is the exact
//! position of the output stream in seconds. Restart times computed against
//! this clock convert back to sample frames without drift.
//!
//! ## Deferred deallocation
//!
//! Decoded PCM reaches the audio thread as `basedrop::Shared<T>`. Dropping the
//! last reference there only enqueues the pointer; the collector thread owned
//! by this context frees it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle};

/// Interval between collector passes
const GC_INTERVAL: Duration = Duration::from_millis(100);

/// Monotonic time source in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Clock driven by the render path's frame counter
#[derive(Debug)]
pub struct FrameClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Called once per render block with the frames just produced
    #[inline]
    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Release);
    }

    /// Frames rendered so far
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

impl Clock for FrameClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Manually stepped clock for headless runs and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.nanos
            .store((seconds.max(0.0) * 1e9).round() as u64, Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.nanos
            .fetch_add((seconds.max(0.0) * 1e9).round() as u64, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.nanos.load(Ordering::Acquire) as f64 / 1e9
    }
}

struct ContextInner {
    sample_rate: u32,
    frame_clock: Arc<FrameClock>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    gc: Handle,
}

/// Explicit engine-wide audio context
#[derive(Clone)]
pub struct AudioContext {
    inner: Arc<ContextInner>,
}

impl AudioContext {
    /// Create a context whose clock follows the render frame counter
    pub fn new(sample_rate: u32) -> Self {
        let frame_clock = Arc::new(FrameClock::new(sample_rate));
        let clock: Arc<dyn Clock> = frame_clock.clone();
        Self::build(sample_rate, frame_clock, clock)
    }

    /// Create a context driven by an external clock
    ///
    /// The render path still advances its frame counter, but control-path
    /// timing reads `clock`.
    pub fn with_clock(sample_rate: u32, clock: Arc<dyn Clock>) -> Self {
        let frame_clock = Arc::new(FrameClock::new(sample_rate));
        Self::build(sample_rate, frame_clock, clock)
    }

    fn build(sample_rate: u32, frame_clock: Arc<FrameClock>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                sample_rate,
                frame_clock,
                clock,
                running: AtomicBool::new(false),
                gc: spawn_collector(),
            }),
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Current time in seconds on the control clock
    #[inline]
    pub fn now(&self) -> f64 {
        self.inner.clock.now()
    }

    pub fn frame_clock(&self) -> &Arc<FrameClock> {
        &self.inner.frame_clock
    }

    /// Convert a clock time to an absolute output frame
    #[inline]
    pub fn seconds_to_frame(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.inner.sample_rate as f64).round() as u64
    }

    /// Open the playback gate (output stream started)
    pub fn resume(&self) {
        if !self.inner.running.swap(true, Ordering::AcqRel) {
            log::info!("Audio context resumed");
        }
    }

    /// Close the playback gate; `play()` fails until resumed
    pub fn suspend(&self) {
        if self.inner.running.swap(false, Ordering::AcqRel) {
            log::info!("Audio context suspended");
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Handle for wrapping render-bound data in `basedrop::Shared`
    pub fn gc_handle(&self) -> &Handle {
        &self.inner.gc
    }
}

impl std::fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContext")
            .field("sample_rate", &self.inner.sample_rate)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Spawn the collector thread and return a handle to it
///
/// The thread exits once every handle and every allocation made through them
/// has been released.
fn spawn_collector() -> Handle {
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives on this thread
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }
            log::debug!("Audio GC thread started");

            loop {
                collector.collect();
                thread::sleep(GC_INTERVAL);
                match collector.try_cleanup() {
                    Ok(()) => break,
                    Err(c) => collector = c,
                }
            }
            log::debug!("Audio GC thread finished");
        });

    match spawned.ok().and_then(|_| rx.recv().ok()) {
        Some(handle) => handle,
        None => {
            // Without a thread the collector lives here and is leaked so the
            // handle stays valid; deferred drops are then never reclaimed.
            log::warn!("Failed to spawn audio GC thread, deferred drops will leak");
            let collector = Box::leak(Box::new(Collector::new()));
            collector.handle()
        }
    }
}
