//! Main audio engine - ties together decks, signal graphs and the mixer

use std::sync::Arc;

use crate::audio::config::MAX_BUFFER_SIZE;
use crate::context::AudioContext;
use crate::types::{DeckId, StereoBuffer, NUM_DECKS};

use super::{
    command_channel, AudioGraph, CommandSender, Deck, DeckAtomics, EngineCommand, GraphParams,
    MixParams, Mixer,
};

/// Control-side handles to a freshly created engine
///
/// Everything the control path needs to drive the render path: one command
/// queue per deck plus the shared atomics.
pub struct EngineLink {
    pub commands: [CommandSender; NUM_DECKS],
    pub deck_atomics: [Arc<DeckAtomics>; NUM_DECKS],
    pub deck_params: [Arc<GraphParams>; NUM_DECKS],
    pub mix_params: Arc<MixParams>,
}

/// The render-side engine
///
/// Owned by the audio callback. `process` never blocks or allocates.
pub struct AudioEngine {
    ctx: AudioContext,
    decks: [Deck; NUM_DECKS],
    graphs: [AudioGraph; NUM_DECKS],
    command_rx: [rtrb::Consumer<EngineCommand>; NUM_DECKS],
    mixer: Mixer,
    /// Pre-allocated buffers for deck processing
    deck_buffers: [StereoBuffer; NUM_DECKS],
}

impl AudioEngine {
    /// Create the engine and the control-side link to it
    pub fn new(ctx: AudioContext) -> (Self, EngineLink) {
        let sample_rate = ctx.sample_rate();
        let (tx_a, rx_a) = command_channel();
        let (tx_b, rx_b) = command_channel();

        let deck_params: [Arc<GraphParams>; NUM_DECKS] =
            std::array::from_fn(|_| Arc::new(GraphParams::new()));
        let mix_params = Arc::new(MixParams::default());

        let decks = DeckId::ALL.map(|id| Deck::new(id, sample_rate));
        let deck_atomics = std::array::from_fn(|i| decks[i].atomics());

        let engine = Self {
            graphs: std::array::from_fn(|i| AudioGraph::new(sample_rate, Arc::clone(&deck_params[i]))),
            decks,
            command_rx: [rx_a, rx_b],
            mixer: Mixer::new(Arc::clone(&mix_params)),
            deck_buffers: std::array::from_fn(|_| StereoBuffer::silence(MAX_BUFFER_SIZE)),
            ctx,
        };

        let link = EngineLink {
            commands: [tx_a, tx_b],
            deck_atomics,
            deck_params,
            mix_params,
        };

        (engine, link)
    }

    pub fn context(&self) -> &AudioContext {
        &self.ctx
    }

    pub fn deck(&self, id: DeckId) -> &Deck {
        &self.decks[id.index()]
    }

    /// Drain every deck's command queue (lock-free)
    ///
    /// Track changes and stops also clear the deck's filter and pitch state.
    pub fn process_commands(&mut self) {
        for i in 0..NUM_DECKS {
            while let Ok(cmd) = self.command_rx[i].pop() {
                let clears_graph = matches!(
                    cmd,
                    EngineCommand::LoadTrack { .. } | EngineCommand::UnloadTrack | EngineCommand::Stop
                );
                self.decks[i].handle_command(cmd);
                if clears_graph {
                    self.graphs[i].reset();
                }
            }
        }
    }

    /// Render one block into `master_out` and advance the render clock
    pub fn process(&mut self, master_out: &mut StereoBuffer) {
        let buffer_len = master_out.len();
        let block_start = self.ctx.frame_clock().frames();

        self.process_commands();

        for i in 0..NUM_DECKS {
            let buffer = &mut self.deck_buffers[i];
            buffer.set_len_from_capacity(buffer_len);

            let rate = self.graphs[i].params().playback_rate() as f64;
            self.decks[i].process(buffer, block_start, rate);
            self.graphs[i].process(buffer, self.decks[i].meters());
        }

        self.mixer.process(&self.deck_buffers, master_out);
        self.ctx.frame_clock().advance(buffer_len as u64);
    }
}
