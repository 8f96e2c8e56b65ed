// src/lib.rs

pub mod audio;
pub mod bpm;
pub mod config;
pub mod decoder;
pub mod effects;
pub mod engine;
pub mod error;
pub mod track;
pub mod waveform;

pub use audio::{MemorySinkFactory, OutputSink, SinkFactory};
pub use bpm::{BeatAnalyzer, BeatIndex, BpmAnalyzer, PrecomputedBeats};
pub use config::{EngineConfig, OutputBackend};
pub use decoder::{SymphoniaLoader, TrackLoader};
pub use effects::{Band, BandGains, FilterBank, TempoResampler};
pub use engine::{crossfade, Console, CrossfadeConfig, CrossfadeSession, Deck, DeckId, DeckStatus};
pub use track::Track;
