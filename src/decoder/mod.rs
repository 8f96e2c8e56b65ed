// src/decoder/mod.rs

pub mod dsp;

use std::fs::File;
use std::path::Path;

use log::{debug, info};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::LoadError;
use crate::track::Track;

/// Turns a file path into a fully decoded [`Track`].
pub trait TrackLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Track, LoadError>;
}

/// Decodes any format symphonia's default registry knows (wav, mp3, flac, ogg, aac).
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaLoader;

impl TrackLoader for SymphoniaLoader {
    fn load(&self, path: &Path) -> Result<Track, LoadError> {
        let (samples, sample_rate, channels) = decode_to_vec(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string();
        let track = Track::new(name, samples, sample_rate, channels);
        if track.frames() == 0 {
            return Err(LoadError::Empty { path: path.display().to_string() });
        }
        info!(
            "Loaded '{}': {} Hz / {} ch / {:.2}s",
            track.name(),
            track.sample_rate(),
            track.channels(),
            track.duration().as_secs_f64()
        );
        Ok(track)
    }
}

/// Decodes the default track of `path` into interleaved f32.
///
/// The channel count is locked on the first non-empty packet; later packets with a
/// different layout are up/down mixed to match.
pub fn decode_to_vec(path: &Path) -> Result<(Vec<f32>, u32, usize), LoadError> {
    let display = path.display().to_string();
    let decode_err = |reason: String| LoadError::Decode { path: display.clone(), reason };

    let file = File::open(path).map_err(|source| LoadError::Open {
        path: display.clone(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_err(e.to_string()))?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| decode_err("no default audio track".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(e.to_string()))?;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut out = Vec::<f32>::new();

    let mut sample_rate = codec_params.sample_rate.unwrap_or(44100);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);
    let mut format_locked = false;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_err(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping undecodable packet in {}: {}", display, e);
                continue;
            }
            Err(SymphoniaError::IoError(_)) => continue,
            Err(e) => return Err(decode_err(e.to_string())),
        };

        let spec = *decoded.spec();
        let current_channels = spec.channels.count();

        if !format_locked {
            if decoded.frames() == 0 {
                continue;
            }
            sample_rate = spec.rate;
            channels = current_channels;
            format_locked = true;
        }

        if sample_buf
            .as_ref()
            .map_or(true, |b| b.capacity() < decoded.capacity())
        {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);
        let new_samples = buf.samples();

        if current_channels == channels {
            out.extend_from_slice(new_samples);
        } else {
            out.extend(dsp::updown_mix_interleaved(new_samples, current_channels, channels));
        }
    }

    debug!("Decoded {} samples from {}", out.len(), display);
    Ok((out, sample_rate, channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut w = WavWriter::create(path, spec).unwrap();
        for f in 0..frames {
            for ch in 0..channels {
                let v = if ch == 0 { 8000i16 } else { -8000i16 };
                w.write_sample(if f % 2 == 0 { v } else { -v }).unwrap();
            }
        }
        w.finalize().unwrap();
    }

    #[test]
    fn loads_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.wav");
        write_wav(&path, 22050, 2, 2205);

        let track = SymphoniaLoader.load(&path).unwrap();
        assert_eq!(track.name(), "kick");
        assert_eq!(track.sample_rate(), 22050);
        assert_eq!(track.channels(), 2);
        assert_eq!(track.frames(), 2205);
        let first = &track.samples()[..2];
        assert!(first[0] > 0.2 && first[1] < -0.2);
    }

    #[test]
    fn missing_file_is_open_error() {
        let err = SymphoniaLoader.load(Path::new("/nonexistent/track.wav")).unwrap_err();
        assert!(matches!(err, LoadError::Open { .. }));
    }

    #[test]
    fn garbage_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"definitely not a riff header").unwrap();
        let err = SymphoniaLoader.load(&path).unwrap_err();
        assert!(matches!(err, LoadError::Decode { .. }));
    }
}
