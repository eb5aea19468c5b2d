//! Control path: the deck façade, the console that owns both decks, and the
//! thread that ticks it

mod console;
mod control_thread;
mod deck;

pub use console::{Console, EventListener};
pub use control_thread::ControlThread;
pub use deck::{DeckController, DeckEvent, DeckStatus, DISPLAY_FALLBACK_BPM};
