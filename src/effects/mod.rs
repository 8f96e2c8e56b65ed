// src/effects/mod.rs

pub mod filter_bank;
pub mod tempo;

pub use filter_bank::{Band, BandGains, FilterBank, FilterCascade, FilterShape, FilterSpec};
pub use tempo::TempoResampler;
