// src/effects/tempo.rs

use rustfft::{num_complex::Complex, num_traits::Zero, FftPlanner};

use crate::decoder::dsp;
use crate::error::TempoError;

/// Slowest supported playback speed.
pub const MIN_TEMPO_FACTOR: f64 = 0.25;
/// Fastest supported playback speed.
pub const MAX_TEMPO_FACTOR: f64 = 4.0;

/// True for factors the resampler accepts. NaN is rejected.
pub fn is_valid_factor(factor: f64) -> bool {
    (MIN_TEMPO_FACTOR..=MAX_TEMPO_FACTOR).contains(&factor)
}

/// Changes playback speed by resampling each block to `len / factor` samples.
///
/// This is band-limited (FFT) interpolation, so pitch moves with tempo.
pub struct TempoResampler {
    planner: FftPlanner<f32>,
}

impl Default for TempoResampler {
    fn default() -> Self {
        Self::new()
    }
}

impl TempoResampler {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::<f32>::new(),
        }
    }

    pub fn output_len(input_len: usize, factor: f64) -> usize {
        (input_len as f64 / factor).round() as usize
    }

    pub fn resample(&mut self, samples: &[f32], factor: f64) -> Result<Vec<f32>, TempoError> {
        if !is_valid_factor(factor) {
            return Err(TempoError::InvalidFactor(factor));
        }
        let n = samples.len();
        let m = Self::output_len(n, factor);
        if n == 0 || m == 0 {
            return Ok(Vec::new());
        }
        if m == n {
            return Ok(samples.to_vec());
        }

        let fft = self.planner.plan_fft_forward(n);
        let mut spectrum: Vec<Complex<f32>> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
        fft.process(&mut spectrum);

        // Keep the k lowest frequencies of whichever length is shorter.
        let k = n.min(m);
        let nyq = k / 2 + 1;
        let mut resized = vec![Complex::<f32>::zero(); m];
        resized[..nyq].copy_from_slice(&spectrum[..nyq]);
        let neg = k - nyq;
        if neg > 0 {
            resized[m - neg..].copy_from_slice(&spectrum[n - neg..]);
        }

        // An even k leaves a shared Nyquist bin that has to be folded or split.
        if k % 2 == 0 {
            if m < n {
                resized[k / 2] += spectrum[n - k / 2];
            } else {
                resized[k / 2] *= 0.5;
                resized[m - k / 2] = resized[k / 2];
            }
        }

        let ifft = self.planner.plan_fft_inverse(m);
        ifft.process(&mut resized);
        let scale = 1.0 / n as f32;
        Ok(resized.iter().map(|c| c.re * scale).collect())
    }

    /// Resamples each channel on its own and interleaves the result, truncated
    /// to the shortest channel.
    pub fn resample_planar(&mut self, planar: &[Vec<f32>], factor: f64) -> Result<Vec<f32>, TempoError> {
        let mut out = Vec::with_capacity(planar.len());
        for channel in planar {
            out.push(self.resample(channel, factor)?);
        }
        Ok(dsp::interleave(&out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn output_length_tracks_factor() {
        let mut r = TempoResampler::new();
        for len in [7usize, 1000, 1024] {
            let input = vec![0.1f32; len];
            for factor in [0.5, 0.75, 1.0, 1.3, 1.5, 2.0, 3.7] {
                let out = r.resample(&input, factor).unwrap();
                let expected = (len as f64 / factor).round() as i64;
                assert!(
                    (out.len() as i64 - expected).abs() <= 1,
                    "len {len} factor {factor} -> {}",
                    out.len()
                );
            }
        }
    }

    #[test]
    fn dc_level_is_preserved() {
        let mut r = TempoResampler::new();
        for factor in [0.5, 1.25, 2.0] {
            let out = r.resample(&vec![0.5f32; 1024], factor).unwrap();
            assert!(out.iter().all(|v| (v - 0.5).abs() < 1e-3), "factor {factor}");
        }
    }

    #[test]
    fn slow_down_stretches_periodic_signal() {
        let mut r = TempoResampler::new();
        let input: Vec<f32> = (0..1024).map(|i| (2.0 * PI * 8.0 * i as f32 / 1024.0).sin()).collect();
        let out = r.resample(&input, 0.5).unwrap();
        assert_eq!(out.len(), 2048);
        for (i, v) in out.iter().enumerate() {
            let expected = (2.0 * PI * 8.0 * i as f32 / 2048.0).sin();
            assert!((v - expected).abs() < 1e-3, "sample {i}: {v} vs {expected}");
        }
    }

    #[test]
    fn rejects_non_positive_factor() {
        let mut r = TempoResampler::new();
        assert_eq!(r.resample(&[0.0; 4], 0.0), Err(TempoError::InvalidFactor(0.0)));
        assert!(r.resample(&[0.0; 4], -1.0).is_err());
        assert!(r.resample(&[0.0; 4], f64::NAN).is_err());
    }

    #[test]
    fn rejects_factors_outside_supported_range() {
        let mut r = TempoResampler::new();
        assert_eq!(r.resample(&[0.0; 4], 1e-12), Err(TempoError::InvalidFactor(1e-12)));
        assert!(r.resample(&[0.0; 4], 0.2).is_err());
        assert!(r.resample(&[0.0; 4], 4.5).is_err());
        assert!(r.resample(&[0.0; 4], f64::INFINITY).is_err());
        assert_eq!(r.resample(&[0.5; 8], MIN_TEMPO_FACTOR).unwrap().len(), 32);
        assert_eq!(r.resample(&[0.5; 8], MAX_TEMPO_FACTOR).unwrap().len(), 2);
    }

    #[test]
    fn planar_output_is_interleaved_and_aligned() {
        let mut r = TempoResampler::new();
        let planar = vec![vec![1.0f32; 100], vec![-1.0f32; 90]];
        let out = r.resample_planar(&planar, 2.0).unwrap();
        // 90 / 2 = 45 frames after truncating to the shorter channel
        assert_eq!(out.len(), 90);
        assert!((out[0] - 1.0).abs() < 1e-3);
        assert!((out[1] + 1.0).abs() < 1e-3);
    }
}
