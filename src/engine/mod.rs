// src/engine/mod.rs

pub mod console;
pub mod deck;
pub mod mixer;

pub use console::{Console, DeckId};
pub use deck::{Deck, DeckControls, DeckStatus, DEFAULT_BLOCK_FRAMES};
pub use mixer::{crossfade, CrossfadeConfig, CrossfadeSession, FadeRamp, MixEnd};
