// src/engine/deck.rs

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use crate::audio::SinkFactory;
use crate::bpm::{BeatAnalyzer, BeatIndex};
use crate::decoder::{dsp, TrackLoader};
use crate::effects::{tempo, Band, BandGains, FilterBank, TempoResampler};
use crate::error::DeckError;
use crate::track::Track;

/// Source frames read per streaming iteration.
pub const DEFAULT_BLOCK_FRAMES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckStatus {
    Idle,
    Playing,
    /// Owned by a crossfade session.
    Mixing,
}

/// Transport and mixing state shared by a deck, its streaming thread and a
/// crossfade session. Every field is a single atomic so control writes never
/// block the audio path; a change lands on the next block boundary.
#[derive(Debug)]
pub struct DeckControls {
    cursor: AtomicUsize,
    tempo_factor: AtomicU64,
    gains: [AtomicU32; 3],
    running: AtomicBool,
    cancel: AtomicBool,
    mixing: AtomicBool,
}

impl Default for DeckControls {
    fn default() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            tempo_factor: AtomicU64::new(1.0f64.to_bits()),
            gains: [
                AtomicU32::new(1.0f32.to_bits()),
                AtomicU32::new(1.0f32.to_bits()),
                AtomicU32::new(1.0f32.to_bits()),
            ],
            running: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            mixing: AtomicBool::new(false),
        }
    }
}

impl DeckControls {
    /// Position in source frames.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub(crate) fn set_cursor(&self, frames: usize) {
        self.cursor.store(frames, Ordering::Release);
    }

    /// Moves the cursor past a finished block unless it was repositioned meanwhile.
    pub(crate) fn advance_cursor(&self, from: usize, to: usize) -> bool {
        self.cursor
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn tempo_factor(&self) -> f64 {
        f64::from_bits(self.tempo_factor.load(Ordering::Relaxed))
    }

    fn set_tempo_factor(&self, factor: f64) {
        self.tempo_factor.store(factor.to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self, band: Band) -> f32 {
        f32::from_bits(self.gains[band.index()].load(Ordering::Relaxed))
    }

    fn set_gain(&self, band: Band, gain: f32) {
        self.gains[band.index()].store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn gains(&self) -> BandGains {
        BandGains::new(self.gain(Band::Low), self.gain(Band::Mid), self.gain(Band::High))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_mixing(&self) -> bool {
        self.mixing.load(Ordering::Acquire)
    }

    pub(crate) fn set_mixing(&self, mixing: bool) {
        self.mixing.store(mixing, Ordering::Release);
    }

    pub(crate) fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::Release);
    }
}

/// One playback unit: a loaded track, its beat index and its transport.
pub struct Deck {
    name: String,
    track: Option<Arc<Track>>,
    beats: BeatIndex,
    controls: Arc<DeckControls>,
    sink: Arc<dyn SinkFactory>,
    block_frames: usize,
    worker: Option<JoinHandle<()>>,
}

impl Deck {
    pub fn new(name: impl Into<String>, sink: Arc<dyn SinkFactory>) -> Self {
        Self {
            name: name.into(),
            track: None,
            beats: BeatIndex::Unknown,
            controls: Arc::new(DeckControls::default()),
            sink,
            block_frames: DEFAULT_BLOCK_FRAMES,
            worker: None,
        }
    }

    pub fn with_block_frames(mut self, frames: usize) -> Self {
        self.block_frames = frames.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn track(&self) -> Option<&Arc<Track>> {
        self.track.as_ref()
    }

    pub fn beats(&self) -> &BeatIndex {
        &self.beats
    }

    pub fn controls(&self) -> &Arc<DeckControls> {
        &self.controls
    }

    pub(crate) fn sink_factory(&self) -> &Arc<dyn SinkFactory> {
        &self.sink
    }

    // --- Loading ---

    /// Decodes and analyses `path`. On a load error the deck keeps whatever it
    /// had before; analysis failure only leaves the tempo unknown.
    pub fn load(
        &mut self,
        path: &Path,
        loader: &dyn TrackLoader,
        analyzer: &dyn BeatAnalyzer,
    ) -> Result<(), DeckError> {
        let track = loader.load(path)?;
        let beats = analyzer.analyze(&track);
        self.load_track(track, beats);
        Ok(())
    }

    /// Replaces the loaded track. Playback stops, cursor and tempo factor reset,
    /// band gains are kept.
    pub fn load_track(&mut self, track: Track, beats: BeatIndex) {
        self.stop();
        match beats.base_tempo() {
            Some(bpm) => info!("[{}] '{}' at {:.2} bpm", self.name, track.name(), bpm),
            None => warn!("[{}] '{}' has unknown tempo", self.name, track.name()),
        }
        self.track = Some(Arc::new(track));
        self.beats = beats;
        self.controls.set_cursor(0);
        self.controls.set_tempo_factor(1.0);
    }

    // --- Transport ---

    /// Starts streaming from the current cursor. A finished track restarts from
    /// the top.
    pub fn start(&mut self) -> Result<(), DeckError> {
        let track = self.track.clone().ok_or(DeckError::NoTrack)?;
        if self.controls.is_mixing() {
            return Err(DeckError::Busy);
        }
        if self.controls.is_running() && !self.controls.is_cancelled() {
            return Ok(());
        }
        // A paused session may still be finishing its last block.
        self.join_worker();

        if self.controls.cursor() >= track.frames() {
            self.controls.set_cursor(0);
        }
        self.controls.clear_cancel();
        self.controls.running.store(true, Ordering::Release);

        info!("[{}] start at {:.2}s", self.name, self.position_secs());
        let name = self.name.clone();
        let controls = self.controls.clone();
        let sink = self.sink.clone();
        let block_frames = self.block_frames;
        self.worker = Some(thread::spawn(move || {
            stream_session(&name, &track, &controls, sink.as_ref(), block_frames);
        }));
        Ok(())
    }

    /// Stops after the current block; the cursor stays where it is.
    pub fn pause(&mut self) {
        self.controls.cancel();
        debug!("[{}] pause at {:.2}s", self.name, self.position_secs());
    }

    /// Stops, waits for the in-flight block, and rewinds to the start.
    ///
    /// If a crossfade owns the deck, this also waits for the mix thread to
    /// exit so its last cursor advance lands before the rewind.
    pub fn stop(&mut self) {
        self.controls.cancel();
        self.join_worker();
        while self.controls.is_mixing() {
            thread::sleep(Duration::from_millis(1));
        }
        self.controls.set_cursor(0);
        debug!("[{}] stop", self.name);
    }

    /// Moves the cursor to `secs`, clamped to the track.
    pub fn seek_secs(&mut self, secs: f64) {
        let Some(track) = &self.track else {
            return;
        };
        let frames = (secs.max(0.0) * track.sample_rate() as f64) as usize;
        self.controls.set_cursor(frames.min(track.frames()));
    }

    pub(crate) fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("[{}] streaming thread panicked", self.name);
                self.controls.running.store(false, Ordering::Release);
            }
        }
    }

    // --- Controls ---

    /// Negative gains invert the band.
    pub fn set_gain(&mut self, band: Band, gain: f32) -> Result<(), DeckError> {
        if !gain.is_finite() {
            return Err(DeckError::InvalidGain(gain));
        }
        self.controls.set_gain(band, gain);
        Ok(())
    }

    pub fn set_gain_by_name(&mut self, band: &str, gain: f32) -> Result<(), DeckError> {
        self.set_gain(band.parse()?, gain)
    }

    /// Accepts factors in `[MIN_TEMPO_FACTOR, MAX_TEMPO_FACTOR]`.
    pub fn change_tempo_factor(&mut self, factor: f64) -> Result<(), DeckError> {
        if !tempo::is_valid_factor(factor) {
            return Err(DeckError::InvalidTempo(factor));
        }
        self.controls.set_tempo_factor(factor);
        Ok(())
    }

    /// Sets the factor so the track plays at `bpm`. `Ok(false)` when the base
    /// tempo is unknown; the factor is left alone.
    pub fn change_tempo(&mut self, bpm: f64) -> Result<bool, DeckError> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(DeckError::InvalidTempo(bpm));
        }
        match self.beats.base_tempo() {
            Some(base) => {
                self.change_tempo_factor(bpm / base)?;
                Ok(true)
            }
            None => {
                debug!("[{}] tempo change to {bpm} ignored, tempo unknown", self.name);
                Ok(false)
            }
        }
    }

    /// Matches `other`'s effective tempo. No-op when either tempo is unknown.
    pub fn sync_to(&mut self, other: &Deck) -> bool {
        match other.effective_tempo() {
            Some(bpm) => self.change_tempo(bpm).unwrap_or(false),
            None => {
                debug!("[{}] sync ignored, '{}' tempo unknown", self.name, other.name);
                false
            }
        }
    }

    // --- Readouts ---

    pub fn status(&self) -> DeckStatus {
        if self.controls.is_mixing() {
            DeckStatus::Mixing
        } else if self.controls.is_running() && !self.controls.is_cancelled() {
            DeckStatus::Playing
        } else {
            DeckStatus::Idle
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.track.is_some()
    }

    pub fn cursor(&self) -> usize {
        self.controls.cursor()
    }

    pub fn position_secs(&self) -> f64 {
        match &self.track {
            Some(t) if t.sample_rate() > 0 => self.cursor() as f64 / t.sample_rate() as f64,
            _ => 0.0,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.track.as_ref().map_or(0.0, |t| t.duration().as_secs_f64())
    }

    pub fn tempo_factor(&self) -> f64 {
        self.controls.tempo_factor()
    }

    /// Base tempo scaled by the tempo factor.
    pub fn effective_tempo(&self) -> Option<f64> {
        self.beats.base_tempo().map(|bpm| bpm * self.tempo_factor())
    }

    pub fn gain(&self, band: Band) -> f32 {
        self.controls.gain(band)
    }
}

impl Drop for Deck {
    fn drop(&mut self) {
        self.controls.cancel();
        self.join_worker();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Finished,
    Cancelled,
}

fn stream_session(
    name: &str,
    track: &Track,
    controls: &DeckControls,
    sink: &dyn SinkFactory,
    block_frames: usize,
) {
    match run_session(track, controls, sink, block_frames) {
        Ok(SessionEnd::Finished) => info!("[{name}] reached end of '{}'", track.name()),
        Ok(SessionEnd::Cancelled) => debug!("[{name}] streaming cancelled"),
        Err(e) => error!("[{name}] streaming stopped: {e:#}"),
    }
    controls.running.store(false, Ordering::Release);
}

fn run_session(
    track: &Track,
    controls: &DeckControls,
    sink: &dyn SinkFactory,
    block_frames: usize,
) -> Result<SessionEnd> {
    let mut out = sink
        .open(track.sample_rate(), track.channels())
        .context("opening output")?;

    let mut bank = FilterBank::new();
    let mut tempo = TempoResampler::new();
    let frames = track.frames();
    let sample_rate = track.sample_rate();
    let channels = track.channels();

    let end = loop {
        if controls.is_cancelled() {
            break SessionEnd::Cancelled;
        }
        let start = controls.cursor();
        if start >= frames {
            break SessionEnd::Finished;
        }
        let stop = (start + block_frames).min(frames);

        let planar = dsp::deinterleave(track.frame_slice(start, stop), channels);
        let gains = controls.gains();
        let filtered = planar
            .iter()
            .map(|ch| bank.process(ch, sample_rate, gains))
            .collect::<Result<Vec<_>, _>>()
            .context("filter bank")?;
        let block = tempo
            .resample_planar(&filtered, controls.tempo_factor())
            .context("tempo")?;

        out.write(&block).context("writing block")?;
        controls.advance_cursor(start, stop);
    };

    out.finish().context("draining output")?;
    Ok(end)
}
