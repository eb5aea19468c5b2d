//! Control-path error types

use thiserror::Error;

use crate::audio::AudioError;
use crate::audio_file::DecodeError;
use crate::types::DeckId;

/// Errors returned by deck, sync and console operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Audio could not be decoded; the deck keeps its previous track
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Output is suspended until the host resumes the audio context
    #[error("Playback blocked: audio context is suspended")]
    PlaybackBlocked,

    /// Looping requires a known BPM
    #[error("Deck {0} has no BPM and cannot be scheduled")]
    MissingBpm(DeckId),

    /// Tempo sync needs a BPM on both decks
    #[error("Cannot sync deck {slave} to deck {master}: BPM missing")]
    InsufficientMetadata { master: DeckId, slave: DeckId },

    /// Sync is already engaged on a different deck pair
    #[error("Sync already active (master {master}); disable it first")]
    SyncConflict { master: DeckId },

    /// Operation needs a loaded track
    #[error("No track loaded on deck {0}")]
    NoTrack(DeckId),

    /// Render command queue is saturated
    #[error("Command queue for deck {0} is full")]
    QueueFull(DeckId),

    /// Parameter outside its accepted domain (NaN, zero BPM, ...)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Result type for control-path operations
pub type EngineResult<T> = Result<T, EngineError>;
