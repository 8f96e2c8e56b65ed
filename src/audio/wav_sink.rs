// src/audio/wav_sink.rs

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use hound::{SampleFormat, WavSpec, WavWriter};
use log::info;

use super::{OutputSink, SinkFactory};
use crate::error::SinkError;

/// Renders every session into its own numbered 16-bit WAV file.
pub struct WavSinkFactory {
    dir: PathBuf,
    prefix: String,
    counter: AtomicUsize,
}

impl WavSinkFactory {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            counter: AtomicUsize::new(0),
        }
    }

    /// Path the `n`-th opened session writes to.
    pub fn path_for(&self, n: usize) -> PathBuf {
        self.dir.join(format!("{}-{n}.wav", self.prefix))
    }
}

impl SinkFactory for WavSinkFactory {
    fn open(&self, sample_rate: u32, channels: usize) -> Result<Box<dyn OutputSink>, SinkError> {
        std::fs::create_dir_all(&self.dir)?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.path_for(n);
        Ok(Box::new(WavSink::create(&path, sample_rate, channels)?))
    }
}

pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32, channels: usize) -> Result<Self, SinkError> {
        let spec = WavSpec {
            channels: channels.max(1) as u16,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        info!("Rendering to {}", path.display());
        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for WavSink {
    fn write(&mut self, block: &[f32]) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        for &s in block {
            let samp = if s.is_finite() {
                (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
            } else {
                0
            };
            writer.write_sample(samp)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let factory = WavSinkFactory::new(dir.path(), "deck");

        for _ in 0..2 {
            let mut sink = factory.open(8000, 2).unwrap();
            sink.write(&[0.5, -0.5, 2.0, f32::NAN]).unwrap();
            sink.finish().unwrap();
        }

        let mut reader = hound::WavReader::open(factory.path_for(1)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8000);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![16383, -16383, i16::MAX, 0]);
        assert!(factory.path_for(0).exists());
    }

    #[test]
    fn write_after_finish_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = WavSink::create(&dir.path().join("x.wav"), 44100, 1).unwrap();
        sink.finish().unwrap();
        assert!(matches!(sink.write(&[0.0]), Err(SinkError::Closed)));
    }
}
