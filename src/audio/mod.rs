// src/audio/mod.rs

//! Output sinks. A deck or a crossfade opens one sink per streaming session
//! and writes interleaved f32 blocks to it in order.

pub mod cpal_sink;
pub mod resample;
pub mod wav_sink;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::SinkError;

pub use cpal_sink::{CpalSink, CpalSinkFactory};
pub use wav_sink::{WavSink, WavSinkFactory};

pub trait OutputSink {
    /// Queue one interleaved block. May block while the device catches up.
    fn write(&mut self, block: &[f32]) -> Result<(), SinkError>;

    /// Drain anything still queued. Called once when the session ends.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Opens sinks from inside the streaming thread, so sinks need not be `Send`.
pub trait SinkFactory: Send + Sync {
    fn open(&self, sample_rate: u32, channels: usize) -> Result<Box<dyn OutputSink>, SinkError>;
}

/// Everything one memory sink received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capture {
    pub sample_rate: u32,
    pub channels: usize,
    pub samples: Vec<f32>,
    pub finished: bool,
}

/// Records sessions in memory. Each `open` appends a new [`Capture`].
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    captures: Arc<Mutex<Vec<Capture>>>,
    write_delay: Option<Duration>,
    fail_open: bool,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long on every write, standing in for device back-pressure.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Every `open` fails with [`SinkError::NoDevice`].
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn captures(&self) -> Vec<Capture> {
        match self.captures.lock() {
            Ok(c) => c.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(&self, sample_rate: u32, channels: usize) -> Result<Box<dyn OutputSink>, SinkError> {
        if self.fail_open {
            return Err(SinkError::NoDevice);
        }
        let mut captures = self.captures.lock().map_err(|_| SinkError::Closed)?;
        let index = captures.len();
        captures.push(Capture {
            sample_rate,
            channels,
            ..Capture::default()
        });
        Ok(Box::new(MemorySink {
            captures: self.captures.clone(),
            index,
            write_delay: self.write_delay,
        }))
    }
}

struct MemorySink {
    captures: Arc<Mutex<Vec<Capture>>>,
    index: usize,
    write_delay: Option<Duration>,
}

impl OutputSink for MemorySink {
    fn write(&mut self, block: &[f32]) -> Result<(), SinkError> {
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        let mut captures = self.captures.lock().map_err(|_| SinkError::Closed)?;
        captures[self.index].samples.extend_from_slice(block);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let mut captures = self.captures.lock().map_err(|_| SinkError::Closed)?;
        captures[self.index].finished = true;
        Ok(())
    }
}

/// Discards audio, paced in real time by each block's duration.
pub struct NullSinkFactory;

impl SinkFactory for NullSinkFactory {
    fn open(&self, sample_rate: u32, channels: usize) -> Result<Box<dyn OutputSink>, SinkError> {
        Ok(Box::new(NullSink {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
        }))
    }
}

struct NullSink {
    sample_rate: u32,
    channels: usize,
}

impl OutputSink for NullSink {
    fn write(&mut self, block: &[f32]) -> Result<(), SinkError> {
        let frames = block.len() / self.channels;
        std::thread::sleep(Duration::from_secs_f64(frames as f64 / self.sample_rate as f64));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_each_session() {
        let factory = MemorySinkFactory::new();
        let mut a = factory.open(44100, 2).unwrap();
        a.write(&[0.1, 0.2]).unwrap();
        let mut b = factory.open(48000, 1).unwrap();
        b.write(&[0.3]).unwrap();
        a.write(&[0.4, 0.5]).unwrap();
        a.finish().unwrap();

        let caps = factory.captures();
        assert_eq!(caps.len(), 2);
        assert_eq!(caps[0].samples, vec![0.1, 0.2, 0.4, 0.5]);
        assert!(caps[0].finished);
        assert_eq!(caps[1].sample_rate, 48000);
        assert!(!caps[1].finished);
    }

    #[test]
    fn failing_factory_reports_no_device() {
        assert!(matches!(
            MemorySinkFactory::failing().open(44100, 2),
            Err(SinkError::NoDevice)
        ));
    }
}
