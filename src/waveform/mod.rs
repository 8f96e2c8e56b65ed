// src/waveform/mod.rs

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bpm::BeatGrid;

/// Precomputed display data for one track, stored as `<dir>/<track name>.json`.
///
/// Only `beat_times` matters to playback; `times`/`amplitude` are the
/// downsampled waveform a front end draws.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WaveformFile {
    #[serde(default)]
    pub times: Vec<f64>,
    /// Normalised to [-1, 1].
    #[serde(default)]
    pub amplitude: Vec<f32>,
    #[serde(default)]
    pub beat_times: Vec<f64>,
}

impl WaveformFile {
    pub fn path_for(dir: &Path, track_name: &str) -> PathBuf {
        dir.join(format!("{track_name}.json"))
    }

    pub fn save_to_disk(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load_from_disk(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let data = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(data)
    }

    /// Beat grid with the tempo estimated from the beat spacing.
    pub fn beat_grid(&self) -> Option<BeatGrid> {
        BeatGrid::from_beat_times(self.beat_times.clone())
    }
}
