// src/bpm/adapter.rs

use std::path::PathBuf;

use log::{debug, warn};

use crate::bpm::{BeatIndex, BpmDetector, BpmOptions};
use crate::track::Track;
use crate::waveform::WaveformFile;

/// Source of a track's tempo and beat grid.
///
/// Implementations never fail: anything that goes wrong is reported as
/// [`BeatIndex::Unknown`].
pub trait BeatAnalyzer: Send + Sync {
    fn analyze(&self, track: &Track) -> BeatIndex;
}

/// Runs the onset/autocorrelation detector over the decoded samples.
#[derive(Debug, Clone, Default)]
pub struct BpmAnalyzer {
    pub options: BpmOptions,
}

impl BeatAnalyzer for BpmAnalyzer {
    fn analyze(&self, track: &Track) -> BeatIndex {
        let mut det = BpmDetector::new(self.options.clone());
        match det.detect(track.samples(), track.channels(), track.sample_rate()) {
            Some(res) => {
                debug!(
                    "'{}': {:.2} bpm, confidence {:.2}, {} beats",
                    track.name(),
                    res.bpm,
                    res.confidence,
                    res.beat_times.len()
                );
                BeatIndex::known(res.bpm, res.beat_times)
            }
            None => {
                warn!("'{}': tempo detection failed, tempo unknown", track.name());
                BeatIndex::Unknown
            }
        }
    }
}

/// Reads `beat_times` from a precomputed waveform file named after the track,
/// falling back to another analyzer when the file is missing or unusable.
pub struct PrecomputedBeats<A: BeatAnalyzer> {
    dir: PathBuf,
    fallback: A,
}

impl<A: BeatAnalyzer> PrecomputedBeats<A> {
    pub fn new(dir: impl Into<PathBuf>, fallback: A) -> Self {
        Self {
            dir: dir.into(),
            fallback,
        }
    }
}

impl<A: BeatAnalyzer> BeatAnalyzer for PrecomputedBeats<A> {
    fn analyze(&self, track: &Track) -> BeatIndex {
        let path = WaveformFile::path_for(&self.dir, track.name());
        if !path.exists() {
            return self.fallback.analyze(track);
        }
        match WaveformFile::load_from_disk(&path) {
            Ok(file) => match file.beat_grid() {
                Some(grid) => BeatIndex::Known(grid),
                None => {
                    warn!("{}: too few beats for a tempo estimate", path.display());
                    self.fallback.analyze(track)
                }
            },
            Err(e) => {
                warn!("{e:#}");
                self.fallback.analyze(track)
            }
        }
    }
}

/// Always reports an unknown tempo.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAnalysis;

impl BeatAnalyzer for NoAnalysis {
    fn analyze(&self, _track: &Track) -> BeatIndex {
        BeatIndex::Unknown
    }
}
