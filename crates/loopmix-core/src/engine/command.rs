//! Lock-free command queue from the control path to the render path
//!
//! Each deck has its own SPSC `rtrb` queue. The deck controller is the only
//! producer and the render-side deck the only consumer, so pushes and pops
//! never block and never allocate.
//!
//! Commands carry absolute output frame numbers. The render path executes
//! them at exactly that frame within the block that contains it, or at the
//! start of the current block if the frame has already passed.

use basedrop::Shared;

use crate::audio_file::PcmBuffer;

/// Commands sent from the control path to one render deck
///
/// Processed at the start of each audio block. Timed commands (`Play`,
/// `ScheduleRestart`) are then held until their frame comes up.
pub enum EngineCommand {
    /// Install decoded audio
    ///
    /// `Shared` keeps the command pointer-sized and defers freeing the
    /// previous buffer to the collector thread.
    LoadTrack { pcm: Shared<PcmBuffer> },
    /// Drop the current track and go silent
    UnloadTrack,

    /// Start playback at output frame `at_frame` (0 = now)
    ///
    /// `from` repositions the source (in source frames) first; `None`
    /// resumes where the deck paused.
    Play { at_frame: u64, from: Option<f64> },
    /// Stop output, keeping the source position
    Pause,
    /// Stop output, rewind, and drop pending restarts
    Stop,

    /// When looping, the end of the buffer plays silence until the next
    /// scheduled restart instead of ending the track
    SetLooping(bool),

    /// Jump to `source_frame` at output frame `at_frame`
    ScheduleRestart { at_frame: u64, source_frame: f64 },
    /// Drop all pending restarts
    CancelRestarts,
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineCommand::LoadTrack { pcm } => write!(f, "LoadTrack({} frames)", pcm.len()),
            EngineCommand::UnloadTrack => write!(f, "UnloadTrack"),
            EngineCommand::Play { at_frame, from } => {
                write!(f, "Play {{ at_frame: {}, from: {:?} }}", at_frame, from)
            }
            EngineCommand::Pause => write!(f, "Pause"),
            EngineCommand::Stop => write!(f, "Stop"),
            EngineCommand::SetLooping(on) => write!(f, "SetLooping({})", on),
            EngineCommand::ScheduleRestart {
                at_frame,
                source_frame,
            } => write!(
                f,
                "ScheduleRestart {{ at_frame: {}, source_frame: {} }}",
                at_frame, source_frame
            ),
            EngineCommand::CancelRestarts => write!(f, "CancelRestarts"),
        }
    }
}

/// Capacity of each deck's command queue
///
/// The control tick emits at most a handful of restarts per deck, so this
/// leaves ample room for bursts of transport commands.
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Create a new command channel (producer/consumer pair)
pub fn command_channel() -> (CommandSender, rtrb::Consumer<EngineCommand>) {
    let (producer, consumer) = rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY);
    (CommandSender { producer }, consumer)
}

/// Control-side end of a deck's command queue
pub struct CommandSender {
    producer: rtrb::Producer<EngineCommand>,
}

impl CommandSender {
    /// Queue a command (non-blocking)
    ///
    /// Returns the command back if the queue is full.
    pub fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineCommand> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(value) => value,
        })
    }

    /// Free slots in the queue
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_channel_roundtrip() {
        let (mut tx, mut rx) = command_channel();

        tx.send(EngineCommand::ScheduleRestart {
            at_frame: 48000,
            source_frame: 0.0,
        })
        .unwrap();

        let cmd = rx.pop().unwrap();
        assert!(matches!(
            cmd,
            EngineCommand::ScheduleRestart { at_frame: 48000, .. }
        ));
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_full_queue_returns_command() {
        let (mut tx, _rx) = command_channel();
        for _ in 0..COMMAND_QUEUE_CAPACITY {
            tx.send(EngineCommand::Pause).unwrap();
        }
        assert_eq!(tx.slots(), 0);
        assert!(matches!(tx.send(EngineCommand::Stop), Err(EngineCommand::Stop)));
    }

    #[test]
    fn test_command_size() {
        // Stays within half a cache line; large payloads go through Shared
        let size = std::mem::size_of::<EngineCommand>();
        assert!(size <= 32, "EngineCommand is {} bytes, expected <= 32", size);
    }
}
