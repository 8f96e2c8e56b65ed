// src/engine/mixer.rs

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use super::deck::{Deck, DeckControls};
use crate::audio::{OutputSink, SinkFactory};
use crate::bpm::align;
use crate::error::{MixError, SinkError};
use crate::track::Track;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeConfig {
    pub fade_duration_secs: f64,
    /// Frames read from each track per iteration.
    pub block_frames: usize,
}

impl Default for CrossfadeConfig {
    fn default() -> Self {
        Self {
            fade_duration_secs: 30.0,
            block_frames: 1024,
        }
    }
}

impl CrossfadeConfig {
    fn validate(&self) -> Result<(), MixError> {
        if !self.fade_duration_secs.is_finite() || self.fade_duration_secs <= 0.0 {
            return Err(MixError::InvalidFade(self.fade_duration_secs));
        }
        if self.block_frames == 0 {
            return Err(MixError::InvalidBlockSize);
        }
        Ok(())
    }
}

/// Linear out/in weights over `[0, fade_samples]` frames past the anchor beat.
/// Outside the window both tracks pass through at full level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeRamp {
    fade_samples: usize,
}

impl FadeRamp {
    pub fn new(fade_duration_secs: f64, sample_rate: u32) -> Self {
        Self {
            fade_samples: ((fade_duration_secs * sample_rate as f64) as usize).max(1),
        }
    }

    pub fn fade_samples(&self) -> usize {
        self.fade_samples
    }

    /// `(outgoing, incoming)` weights at `pos` frames past the anchor.
    pub fn weights(&self, pos: i64) -> (f32, f32) {
        if pos < 0 || pos > self.fade_samples as i64 {
            return (1.0, 1.0);
        }
        let t = pos as f64 / self.fade_samples as f64;
        ((1.0 - t) as f32, t as f32)
    }

    /// Weights both interleaved blocks frame by frame; `first_pos` is the
    /// position of their first frame.
    pub fn apply(
        &self,
        outgoing: &mut [f32],
        out_channels: usize,
        incoming: &mut [f32],
        in_channels: usize,
        first_pos: i64,
    ) {
        let frames_a = outgoing.chunks_exact_mut(out_channels.max(1));
        let frames_b = incoming.chunks_exact_mut(in_channels.max(1));
        for (i, (fa, fb)) in frames_a.zip(frames_b).enumerate() {
            let (wa, wb) = self.weights(first_pos + i as i64);
            if wa == 1.0 && wb == 1.0 {
                continue;
            }
            fa.iter_mut().for_each(|s| *s *= wa);
            fb.iter_mut().for_each(|s| *s *= wb);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixEnd {
    /// One of the tracks ran out.
    Finished,
    /// A deck was paused or stopped, or the session was cancelled.
    Cancelled,
}

struct MixSide {
    track: Arc<Track>,
    controls: Arc<DeckControls>,
    sink: Arc<dyn SinkFactory>,
}

/// Clears both decks' mixing flags however the session thread exits.
struct MixGuard([Arc<DeckControls>; 2]);

impl Drop for MixGuard {
    fn drop(&mut self) {
        for c in &self.0 {
            c.set_mixing(false);
        }
    }
}

/// Handle to a running crossfade. Dropping it cancels and joins the session.
pub struct CrossfadeSession {
    worker: Option<JoinHandle<Result<MixEnd, MixError>>>,
    controls: [Arc<DeckControls>; 2],
    offset_secs: f64,
    anchor_frame: i64,
    ramp: FadeRamp,
}

impl CrossfadeSession {
    /// Beat alignment applied to the incoming deck, in seconds.
    pub fn offset_secs(&self) -> f64 {
        self.offset_secs
    }

    /// Outgoing track frame where the fade starts.
    pub fn anchor_frame(&self) -> i64 {
        self.anchor_frame
    }

    pub fn ramp(&self) -> FadeRamp {
        self.ramp
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(|w| w.is_finished())
    }

    pub fn cancel(&self) {
        for c in &self.controls {
            c.cancel();
        }
    }

    /// Waits for the session to end on its own.
    pub fn join(mut self) -> Result<MixEnd, MixError> {
        self.wait()
    }

    fn wait(&mut self) -> Result<MixEnd, MixError> {
        match self.worker.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                error!("crossfade thread panicked");
                Ok(MixEnd::Cancelled)
            }),
            None => Ok(MixEnd::Cancelled),
        }
    }
}

impl Drop for CrossfadeSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel();
            if let Err(e) = self.wait() {
                warn!("crossfade ended with error: {e}");
            }
        }
    }
}

/// Crossfades from `outgoing` into `incoming`.
///
/// Both decks stop their own streaming and belong to the session until it
/// ends; meanwhile `start` on either returns [`DeckError::Busy`](crate::error::DeckError::Busy),
/// and pausing or stopping either one ends the session. `incoming` is synced to
/// `outgoing`'s tempo and its cursor shifted so the nearest beats coincide. The
/// blend runs on raw track samples, one sink per deck.
pub fn crossfade(
    outgoing: &mut Deck,
    incoming: &mut Deck,
    config: &CrossfadeConfig,
) -> Result<CrossfadeSession, MixError> {
    config.validate()?;
    let track_a = outgoing
        .track()
        .cloned()
        .ok_or_else(|| MixError::NotLoaded(outgoing.name().to_string()))?;
    let track_b = incoming
        .track()
        .cloned()
        .ok_or_else(|| MixError::NotLoaded(incoming.name().to_string()))?;
    if outgoing.controls().is_mixing() || incoming.controls().is_mixing() {
        return Err(MixError::AlreadyMixing);
    }

    take_output(outgoing);
    take_output(incoming);

    incoming.sync_to(outgoing);

    let sr_a = track_a.sample_rate();
    let (offset_secs, anchor_frame) =
        match align(outgoing.beats(), outgoing.position_secs(), incoming.beats()) {
            Some(al) => {
                let shift = (al.offset * track_b.sample_rate() as f64) as i64;
                let last = track_b.frames() as i64 - 1;
                let target = (incoming.cursor() as i64 + shift).clamp(0, last.max(0));
                incoming.controls().set_cursor(target as usize);
                info!(
                    "Crossfade {} -> {}: beat {:.3}s meets {:.3}s, offset {:+.3}s",
                    outgoing.name(),
                    incoming.name(),
                    al.beat_a,
                    al.beat_b,
                    al.offset
                );
                (al.offset, (al.beat_a * sr_a as f64) as i64)
            }
            None => {
                warn!(
                    "Crossfade {} -> {}: no beat grid, fading from the current position",
                    outgoing.name(),
                    incoming.name()
                );
                (0.0, outgoing.cursor() as i64)
            }
        };

    let ramp = FadeRamp::new(config.fade_duration_secs, sr_a);
    debug!("fade over {} frames from frame {}", ramp.fade_samples(), anchor_frame);

    let controls = [outgoing.controls().clone(), incoming.controls().clone()];
    let sides = [
        MixSide {
            track: track_a,
            controls: controls[0].clone(),
            sink: outgoing.sink_factory().clone(),
        },
        MixSide {
            track: track_b,
            controls: controls[1].clone(),
            sink: incoming.sink_factory().clone(),
        },
    ];
    let guard = MixGuard(controls.clone());
    let block_frames = config.block_frames;
    let worker = thread::spawn(move || {
        let _guard = guard;
        let [a, b] = sides;
        let result = run_mix(&a, &b, ramp, anchor_frame, block_frames);
        match &result {
            Ok(end) => info!("Crossfade ended: {end:?}"),
            Err(e) => error!("Crossfade stopped: {e}"),
        }
        result
    });

    Ok(CrossfadeSession {
        worker: Some(worker),
        controls,
        offset_secs,
        anchor_frame,
        ramp,
    })
}

fn take_output(deck: &mut Deck) {
    deck.controls().cancel();
    deck.join_worker();
    deck.controls().clear_cancel();
    deck.controls().set_mixing(true);
}

fn run_mix(
    a: &MixSide,
    b: &MixSide,
    ramp: FadeRamp,
    anchor_frame: i64,
    block_frames: usize,
) -> Result<MixEnd, MixError> {
    let mut out_a = a.sink.open(a.track.sample_rate(), a.track.channels())?;
    let mut out_b = b.sink.open(b.track.sample_rate(), b.track.channels())?;

    let result = pump(a, b, out_a.as_mut(), out_b.as_mut(), ramp, anchor_frame, block_frames);
    let finish_a = out_a.finish();
    let finish_b = out_b.finish();

    let end = result?;
    finish_a?;
    finish_b?;
    Ok(end)
}

fn pump(
    a: &MixSide,
    b: &MixSide,
    out_a: &mut dyn OutputSink,
    out_b: &mut dyn OutputSink,
    ramp: FadeRamp,
    anchor_frame: i64,
    block_frames: usize,
) -> Result<MixEnd, SinkError> {
    let (len_a, len_b) = (a.track.frames(), b.track.frames());
    loop {
        if a.controls.is_cancelled() || b.controls.is_cancelled() {
            return Ok(MixEnd::Cancelled);
        }
        let (ca, cb) = (a.controls.cursor(), b.controls.cursor());
        if ca >= len_a || cb >= len_b {
            return Ok(MixEnd::Finished);
        }
        let n = block_frames.min(len_a - ca).min(len_b - cb);

        let mut block_a = a.track.frame_slice(ca, ca + n).to_vec();
        let mut block_b = b.track.frame_slice(cb, cb + n).to_vec();
        ramp.apply(
            &mut block_a,
            a.track.channels(),
            &mut block_b,
            b.track.channels(),
            ca as i64 - anchor_frame,
        );

        out_a.write(&block_a)?;
        out_b.write(&block_b)?;
        a.controls.advance_cursor(ca, ca + n);
        b.controls.advance_cursor(cb, cb + n);
    }
}
