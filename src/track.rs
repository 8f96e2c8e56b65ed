// src/track.rs

use std::time::Duration;

/// Immutable decoded audio. Samples are interleaved, `channels` per frame.
#[derive(Debug, Clone)]
pub struct Track {
    name: String,
    samples: Vec<f32>,
    sample_rate: u32,
    channels: usize,
}

impl Track {
    /// Trailing samples that do not fill a whole frame are dropped.
    pub fn new(name: impl Into<String>, mut samples: Vec<f32>, sample_rate: u32, channels: usize) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels;
        samples.truncate(whole);
        Self {
            name: name.into(),
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Length in frames. Deck cursors are expressed in the same unit.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Interleaved samples for frames `start..end`, clamped to the track.
    pub fn frame_slice(&self, start: usize, end: usize) -> &[f32] {
        let frames = self.frames();
        let start = start.min(frames);
        let end = end.clamp(start, frames);
        &self.samples[start * self.channels..end * self.channels]
    }
}
