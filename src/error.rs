// src/error.rs

//! Error types, one enum per failure class.

use thiserror::Error;

/// Failure to turn a file into a [`Track`](crate::track::Track).
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported or corrupt audio in {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("{path} contains no audio frames")]
    Empty { path: String },
}

/// Rejected filter design or application.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("band-pass low cutoff {low} Hz must be below high cutoff {high} Hz")]
    InvalidCutoffs { low: f64, high: f64 },

    #[error("cutoff {cutoff} Hz is not below Nyquist for {sample_rate} Hz")]
    AboveNyquist { cutoff: f64, sample_rate: u32 },

    #[error("filter order must be at least 1")]
    ZeroOrder,

    #[error("coefficient design failed for {cutoff} Hz")]
    Design { cutoff: f64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TempoError {
    #[error("tempo factor must be between 0.25 and 4, got {0}")]
    InvalidFactor(f64),
}

/// Output device failures. Fatal to the streaming session that owns the sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("no output device available")]
    NoDevice,

    #[error("unsupported device sample format {0}")]
    UnsupportedFormat(String),

    #[error("output device error: {0}")]
    Device(String),

    #[error("output stream closed")]
    Closed,

    #[error("wav output: {0}")]
    Wav(#[from] hound::Error),

    #[error("output I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected transport or control operations on a deck.
#[derive(Error, Debug)]
pub enum DeckError {
    #[error("no track loaded")]
    NoTrack,

    #[error("deck is owned by a running crossfade")]
    Busy,

    #[error("unknown band '{0}' (expected low, mid or high)")]
    UnknownBand(String),

    #[error("gain must be finite, got {0}")]
    InvalidGain(f32),

    #[error("tempo out of range, got {0}")]
    InvalidTempo(f64),

    #[error(transparent)]
    Load(#[from] LoadError),
}

#[derive(Error, Debug)]
pub enum MixError {
    #[error("deck '{0}' has no track loaded")]
    NotLoaded(String),

    #[error("fade duration must be positive and finite, got {0}")]
    InvalidFade(f64),

    #[error("block size must be at least one frame")]
    InvalidBlockSize,

    #[error("a crossfade is already running")]
    AlreadyMixing,

    #[error("crossfade output failed: {0}")]
    Sink(#[from] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = FilterError::InvalidCutoffs { low: 2000.0, high: 200.0 };
        assert!(err.to_string().contains("2000"));

        let err = DeckError::UnknownBand("sub".to_string());
        assert_eq!(
            err.to_string(),
            "unknown band 'sub' (expected low, mid or high)"
        );

        let err = TempoError::InvalidFactor(-1.0);
        assert!(err.to_string().contains("-1"));
    }
}
