// src/bpm/mod.rs

pub mod adapter;
pub mod beat_index;
pub mod detector;
pub mod utils;

pub use adapter::{BeatAnalyzer, BpmAnalyzer, NoAnalysis, PrecomputedBeats};
pub use beat_index::{align, nearest_beat, BeatAlignment, BeatGrid, BeatIndex};
pub use detector::{BpmDetector, BpmOptions, BpmResult};
