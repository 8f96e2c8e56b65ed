// src/bpm/detector.rs

use std::collections::HashMap;

use rustfft::{num_complex::Complex, num_traits::Zero, FftPlanner};

use crate::bpm::utils::{downmix_to_mono, hann_window, moving_average_inplace};

#[derive(Debug, Clone)]
pub struct BpmResult {
    pub bpm: f64,
    pub confidence: f32,
    /// (bpm, score), best first.
    pub candidates: Vec<(f32, f32)>,
    pub beat_times: Vec<f64>,
}

#[derive(Clone, Debug)]
pub struct BpmOptions {
    pub window_size: usize,
    pub hop_size: usize,
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Candidates are octave-folded into this range.
    pub preferred_range: (f32, f32),
    pub band_count: usize,
    pub silence_threshold: f32,
}

impl Default for BpmOptions {
    fn default() -> Self {
        Self {
            window_size: 2048,
            hop_size: 512,
            min_bpm: 40.0,
            max_bpm: 240.0,
            preferred_range: (60.0, 200.0),
            band_count: 3,
            silence_threshold: 1e-5,
        }
    }
}

/// Tempo and beat-phase estimator.
///
/// Spectral flux over a few frequency bands gives an onset envelope; its
/// autocorrelation proposes tempo candidates which a comb filter then ranks.
pub struct BpmDetector {
    planner: FftPlanner<f32>,
    window: Vec<f32>,
    opts: BpmOptions,
}

impl BpmDetector {
    pub fn new(opts: BpmOptions) -> Self {
        let window_size = opts.window_size.next_power_of_two();
        let mut planner = FftPlanner::<f32>::new();
        let _ = planner.plan_fft_forward(window_size);
        Self {
            planner,
            window: hann_window(window_size),
            opts,
        }
    }

    pub fn detect(&mut self, audio: &[f32], channels: usize, sample_rate: u32) -> Option<BpmResult> {
        if channels == 0 || audio.is_empty() || sample_rate == 0 {
            return None;
        }
        let mono = downmix_to_mono(audio, channels);
        if rms(&mono) < self.opts.silence_threshold {
            return None;
        }

        let hop = self.opts.hop_size.max(1);
        let env_rate = sample_rate as f32 / hop as f32;

        let frames = spectrogram(&mono, hop, &mut self.planner, &self.window);
        if frames.len() < 4 {
            return None;
        }

        let mut novelty = multi_band_flux(&frames, self.opts.band_count.max(1));
        if novelty.len() < 8 {
            return None;
        }
        moving_average_inplace(&mut novelty, 3);
        let novelty = center_and_scale(&novelty);

        let (lag_min, lag_max) = lag_range(self.opts.min_bpm, self.opts.max_bpm, env_rate);
        if lag_max <= lag_min + 2 {
            return None;
        }
        let lag_scores = autocorrelate(&novelty, lag_min, lag_max, &mut self.planner);

        let (pref_min, pref_max) = self.opts.preferred_range;
        let mut candidates: Vec<(f32, f32)> = fold_candidates(&lag_scores, env_rate, pref_min, pref_max)
            .into_iter()
            .map(|(key, score)| (key as f32 / 10.0, score))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut refined: Vec<(f32, f32)> = candidates
            .iter()
            .take(6)
            .map(|&(bpm, base)| (bpm, best_comb_phase(&novelty, bpm, env_rate).1 + 0.05 * base))
            .collect();
        refined.sort_by(|a, b| b.1.total_cmp(&a.1));

        let bpm = refined[0].0;
        let beat_times = pick_beats(&novelty, bpm, env_rate);

        Some(BpmResult {
            bpm: ((bpm * 100.0).round() / 100.0) as f64,
            confidence: confidence(&refined),
            candidates: refined,
            beat_times,
        })
    }
}

fn rms(mono: &[f32]) -> f32 {
    let acc: f64 = mono.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((acc / mono.len() as f64) as f32).sqrt()
}

/// Magnitude spectra of hann-windowed frames, `hop` samples apart.
fn spectrogram(mono: &[f32], hop: usize, planner: &mut FftPlanner<f32>, window: &[f32]) -> Vec<Vec<f32>> {
    let n = window.len();
    let half = n / 2 + 1;
    let fft = planner.plan_fft_forward(n);
    let mut buf = vec![Complex::<f32>::zero(); n];
    let mut frames = Vec::new();

    let mut pos = 0usize;
    while pos + n <= mono.len() {
        for (k, slot) in buf.iter_mut().enumerate() {
            *slot = Complex::new(mono[pos + k] * window[k], 0.0);
        }
        fft.process(&mut buf);
        frames.push(buf[..half].iter().map(|c| c.norm()).collect());
        pos += hop;
    }
    frames
}

/// Positive spectral flux per band, summed with a slight high-band discount.
fn multi_band_flux(frames: &[Vec<f32>], band_count: usize) -> Vec<f32> {
    let bins = frames[0].len();
    let edges: Vec<usize> = (0..=band_count)
        .map(|i| (((i as f32 / band_count as f32) * bins as f32).round() as usize).min(bins))
        .collect();

    let mut novelty = vec![0.0f32; frames.len()];
    for t in 1..frames.len() {
        let (prev, cur) = (&frames[t - 1], &frames[t]);
        novelty[t] = (0..band_count)
            .map(|b| {
                let flux: f32 = (edges[b]..edges[b + 1])
                    .map(|k| (cur[k] - prev[k]).max(0.0))
                    .sum();
                let weight = if b < 2 { 1.0 } else { 0.8 };
                weight * flux
            })
            .sum();
    }

    let max = novelty.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        novelty.iter_mut().for_each(|v| *v /= max);
    }
    novelty
}

fn center_and_scale(x: &[f32]) -> Vec<f32> {
    let mean = x.iter().sum::<f32>() / x.len() as f32;
    let max_abs = x.iter().map(|v| (v - mean).abs()).fold(0.0f32, f32::max);
    if max_abs == 0.0 {
        return vec![0.0; x.len()];
    }
    x.iter().map(|v| (v - mean) / max_abs).collect()
}

fn lag_range(min_bpm: f32, max_bpm: f32, env_rate: f32) -> (usize, usize) {
    let min_bpm = min_bpm.max(1.0);
    let max_bpm = max_bpm.max(min_bpm + 1.0);
    let lag_max = (env_rate * 60.0 / min_bpm).round() as usize;
    let lag_min = ((env_rate * 60.0 / max_bpm).round() as usize).max(1);
    (lag_min, lag_max.max(lag_min + 1))
}

/// Normalised autocorrelation for lags `lag_min..=lag_max`, computed via FFT.
fn autocorrelate(x: &[f32], lag_min: usize, lag_max: usize, planner: &mut FftPlanner<f32>) -> Vec<(usize, f32)> {
    let n = x.len();
    if n == 0 || lag_min >= n {
        return Vec::new();
    }
    let size = (n * 2).next_power_of_two();
    let mut buf = vec![Complex::<f32>::zero(); size];
    for (slot, &v) in buf.iter_mut().zip(x) {
        slot.re = v;
    }
    planner.plan_fft_forward(size).process(&mut buf);
    for v in buf.iter_mut() {
        *v = Complex::new(v.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(size).process(&mut buf);

    let scale = 1.0 / size as f32;
    (lag_min..=lag_max)
        .map(|lag| {
            if lag >= n {
                return (lag, 0.0);
            }
            (lag, buf[lag].re * scale / (n - lag) as f32)
        })
        .collect()
}

/// Octave-folds each lag's tempo into the preferred range and accumulates scores
/// in 0.1 BPM buckets.
fn fold_candidates(lag_scores: &[(usize, f32)], env_rate: f32, pref_min: f32, pref_max: f32) -> HashMap<i32, f32> {
    let mut map = HashMap::new();
    for &(lag, score) in lag_scores {
        if score <= 0.0 {
            continue;
        }
        let mut bpm = 60.0 * env_rate / lag as f32;
        if !bpm.is_finite() || bpm <= 0.0 {
            continue;
        }
        while bpm < pref_min {
            bpm *= 2.0;
        }
        while bpm > pref_max {
            bpm *= 0.5;
        }
        *map.entry((bpm * 10.0).round() as i32).or_insert(0.0) += score;
    }
    map
}

/// (phase, score) of the best comb alignment for `bpm`.
fn best_comb_phase(novelty: &[f32], bpm: f32, env_rate: f32) -> (usize, f32) {
    let period = 60.0 / bpm * env_rate;
    if !(period >= 1.0) {
        return (0, 0.0);
    }
    let mut best = (0usize, f32::MIN);
    for phase in 0..period as usize {
        let mut s = 0.0f32;
        let mut pos = phase as f32;
        while (pos as usize) < novelty.len() {
            s += novelty[pos as usize];
            pos += period;
        }
        if s > best.1 {
            best = (phase, s);
        }
    }
    best
}

fn confidence(candidates: &[(f32, f32)]) -> f32 {
    let Some(&(_, best)) = candidates.first() else {
        return 0.0;
    };
    let sum: f32 = candidates.iter().map(|c| c.1).sum();
    if sum > 0.0 { (best / sum * 1.2).min(1.0) } else { 0.0 }
}

/// Walks the beat period from the best phase, snapping each beat to the local
/// novelty peak.
fn pick_beats(novelty: &[f32], bpm: f32, env_rate: f32) -> Vec<f64> {
    let period = 60.0 / bpm * env_rate;
    if novelty.is_empty() || !(period >= 1.0) {
        return Vec::new();
    }
    let (phase, _) = best_comb_phase(novelty, bpm, env_rate);
    let reach = (period * 0.3).max(2.0) as usize;
    let last = novelty.len() - 1;

    let mut beats = Vec::new();
    let mut pos = phase as f32;
    while (pos as usize) < novelty.len() {
        let center = pos as usize;
        let start = center.saturating_sub(reach);
        let end = (center + reach).min(last);
        let mut peak = center;
        for i in start..=end {
            if novelty[i] > novelty[peak] {
                peak = i;
            }
        }
        let t = peak as f64 / env_rate as f64;
        // Snapping may pull a beat behind the previous one; keep the grid ordered.
        if beats.last().map_or(true, |&prev| t >= prev) {
            beats.push(t);
        }
        pos += period;
    }
    beats
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Short decaying noise bursts every `period` samples.
    fn click_track(period: usize, secs: f64, sample_rate: u32) -> Vec<f32> {
        let n = (secs * sample_rate as f64) as usize;
        let mut seed = 0x2545_f491u32;
        (0..n)
            .map(|i| {
                let k = i % period;
                if k < 2000 {
                    seed ^= seed << 13;
                    seed ^= seed >> 17;
                    seed ^= seed << 5;
                    let noise = (seed as f32 / u32::MAX as f32) * 2.0 - 1.0;
                    noise * (-(k as f32) / 300.0).exp()
                } else {
                    0.0
                }
            })
            .collect()
    }

    #[test]
    fn detects_click_track_tempo() {
        // 10240 samples = 20 hops of 512, i.e. 129.2 bpm at 22050 Hz
        let audio = click_track(10240, 12.0, 22050);
        let mut det = BpmDetector::new(BpmOptions::default());
        let res = det.detect(&audio, 1, 22050).unwrap();
        assert!((res.bpm - 129.2).abs() < 1.0, "bpm {}", res.bpm);
        assert!(res.beat_times.len() > 10);
        assert!(res.beat_times.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn silence_has_no_tempo() {
        let mut det = BpmDetector::new(BpmOptions::default());
        assert!(det.detect(&vec![0.0; 44100], 2, 22050).is_none());
        assert!(det.detect(&[], 2, 22050).is_none());
    }

    #[test]
    fn folding_moves_candidates_into_range() {
        // 60 * 10 / 2 = 300 bpm folds to 150; 60 * 10 / 20 = 30 bpm doubles once to 60.
        let map = fold_candidates(&[(2, 1.0), (20, 0.5)], 10.0, 60.0, 200.0);
        assert_eq!(map.get(&1500), Some(&1.0));
        assert_eq!(map.get(&600), Some(&0.5));
        assert_eq!(map.len(), 2);
    }
}
