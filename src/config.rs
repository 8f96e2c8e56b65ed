// src/config.rs

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::{CpalSinkFactory, NullSinkFactory, SinkFactory, WavSinkFactory};

/// Where decks send their audio.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    #[default]
    Cpal,
    Wav,
    Null,
}

impl FromStr for OutputBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpal" | "device" => Ok(Self::Cpal),
            "wav" => Ok(Self::Wav),
            "null" | "none" => Ok(Self::Null),
            other => bail!("unknown output backend '{other}' (expected cpal, wav or null)"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Source frames per streaming iteration.
    pub block_size: usize,
    pub fade_duration_secs: f64,
    pub ring_buffer_frames: usize,
    pub output: OutputBackend,
    pub wav_output_dir: PathBuf,
    /// Directory holding precomputed `<track>.json` waveform files.
    pub waveform_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            fade_duration_secs: 30.0,
            ring_buffer_frames: 8192,
            output: OutputBackend::Cpal,
            wav_output_dir: PathBuf::from("renders"),
            waveform_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn save_to_disk(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load_from_disk(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            bail!("block_size must be at least 1");
        }
        if !(self.fade_duration_secs.is_finite() && self.fade_duration_secs > 0.0) {
            bail!("fade_duration_secs must be positive, got {}", self.fade_duration_secs);
        }
        if self.ring_buffer_frames == 0 {
            bail!("ring_buffer_frames must be at least 1");
        }
        Ok(())
    }

    /// Sink factory for the configured backend. WAV renders are prefixed with `label`.
    pub fn sink_factory(&self, label: &str) -> Arc<dyn SinkFactory> {
        match self.output {
            OutputBackend::Cpal => Arc::new(CpalSinkFactory {
                ring_buffer_frames: self.ring_buffer_frames,
            }),
            OutputBackend::Wav => Arc::new(WavSinkFactory::new(&self.wav_output_dir, label)),
            OutputBackend::Null => Arc::new(NullSinkFactory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"block_size": 512, "output": "wav"}"#).unwrap();

        let config = EngineConfig::load_from_disk(&path).unwrap();
        assert_eq!(config.block_size, 512);
        assert_eq!(config.output, OutputBackend::Wav);
        assert_eq!(config.fade_duration_secs, 30.0);
        assert!(config.waveform_dir.is_none());
    }

    #[test]
    fn saved_config_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let config = EngineConfig {
            fade_duration_secs: 4.0,
            waveform_dir: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        };
        config.save_to_disk(&path).unwrap();
        assert_eq!(EngineConfig::load_from_disk(&path).unwrap(), config);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"block_size": 0}"#).unwrap();
        assert!(EngineConfig::load_from_disk(&path).is_err());
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("WAV".parse::<OutputBackend>().unwrap(), OutputBackend::Wav);
        assert!("alsa".parse::<OutputBackend>().is_err());
    }
}
