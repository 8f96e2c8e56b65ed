// src/effects/filter_bank.rs

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use biquad::*;
use serde::{Deserialize, Serialize};

use crate::error::{DeckError, FilterError};

/// Crossover between the low and mid bands.
pub const LOW_MID_CROSSOVER_HZ: f64 = 200.0;
/// Crossover between the mid and high bands.
pub const MID_HIGH_CROSSOVER_HZ: f64 = 2000.0;
/// Butterworth order used for every band.
pub const FILTER_ORDER: usize = 5;

// 1. Bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Low,
    Mid,
    High,
}

impl Band {
    pub const ALL: [Band; 3] = [Band::Low, Band::Mid, Band::High];

    pub fn name(self) -> &'static str {
        match self {
            Band::Low => "low",
            Band::Mid => "mid",
            Band::High => "high",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Band::Low => 0,
            Band::Mid => 1,
            Band::High => 2,
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Band {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Band::Low),
            "mid" => Ok(Band::Mid),
            "high" => Ok(Band::High),
            _ => Err(DeckError::UnknownBand(s.to_string())),
        }
    }
}

/// Linear gain per band. 1.0 leaves a band at its original level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandGains([f32; 3]);

impl Default for BandGains {
    fn default() -> Self {
        Self([1.0; 3])
    }
}

impl BandGains {
    pub fn new(low: f32, mid: f32, high: f32) -> Self {
        Self([low, mid, high])
    }

    pub fn get(&self, band: Band) -> f32 {
        self.0[band.index()]
    }

    pub fn set(&mut self, band: Band, gain: f32) {
        self.0[band.index()] = gain;
    }

    pub fn is_unity(&self) -> bool {
        self.0.iter().all(|&g| g == 1.0)
    }
}

// 2. Filter design
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterShape {
    LowPass { cutoff: f64 },
    HighPass { cutoff: f64 },
    BandPass { low: f64, high: f64 },
}

/// Fixed design parameters for one band. Cheap to build; designs are derived
/// from the sample rate on demand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub band: Band,
    pub shape: FilterShape,
    pub order: usize,
}

impl FilterSpec {
    pub fn for_band(band: Band) -> Self {
        let shape = match band {
            Band::Low => FilterShape::LowPass { cutoff: LOW_MID_CROSSOVER_HZ },
            Band::Mid => FilterShape::BandPass {
                low: LOW_MID_CROSSOVER_HZ,
                high: MID_HIGH_CROSSOVER_HZ,
            },
            Band::High => FilterShape::HighPass { cutoff: MID_HIGH_CROSSOVER_HZ },
        };
        Self {
            band,
            shape,
            order: FILTER_ORDER,
        }
    }

    pub fn design(&self, sample_rate: u32) -> Result<FilterCascade, FilterError> {
        match self.shape {
            FilterShape::LowPass { cutoff } => FilterCascade::low_pass(cutoff, sample_rate, self.order),
            FilterShape::HighPass { cutoff } => FilterCascade::high_pass(cutoff, sample_rate, self.order),
            FilterShape::BandPass { low, high } => {
                FilterCascade::band_pass(low, high, sample_rate, self.order)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pass {
    Low,
    High,
}

/// A Butterworth design as a cascade of second-order sections (plus one
/// first-order section for odd orders).
#[derive(Debug, Clone)]
pub struct FilterCascade {
    sections: Vec<Coefficients<f64>>,
    sample_rate: u32,
}

impl FilterCascade {
    pub fn low_pass(cutoff: f64, sample_rate: u32, order: usize) -> Result<Self, FilterError> {
        Ok(Self {
            sections: butterworth_sections(Pass::Low, cutoff, sample_rate, order)?,
            sample_rate,
        })
    }

    pub fn high_pass(cutoff: f64, sample_rate: u32, order: usize) -> Result<Self, FilterError> {
        Ok(Self {
            sections: butterworth_sections(Pass::High, cutoff, sample_rate, order)?,
            sample_rate,
        })
    }

    /// High-pass at `low` cascaded with low-pass at `high`.
    pub fn band_pass(low: f64, high: f64, sample_rate: u32, order: usize) -> Result<Self, FilterError> {
        if low >= high {
            return Err(FilterError::InvalidCutoffs { low, high });
        }
        let mut sections = butterworth_sections(Pass::High, low, sample_rate, order)?;
        sections.extend(butterworth_sections(Pass::Low, high, sample_rate, order)?);
        Ok(Self { sections, sample_rate })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Filters `input` from a zeroed state. No state survives the call.
    pub fn process(&self, input: &[f32], gain: f32) -> Vec<f32> {
        let mut filters: Vec<DirectForm2Transposed<f64>> = self
            .sections
            .iter()
            .map(|c| DirectForm2Transposed::<f64>::new(*c))
            .collect();
        let gain = gain as f64;

        input
            .iter()
            .map(|&x| {
                let mut s = x as f64;
                for filter in filters.iter_mut() {
                    s = filter.run(s);
                }
                // Denormal protection
                if s.abs() < 1e-20 { 0.0 } else { (s * gain) as f32 }
            })
            .collect()
    }
}

/// Q of the `k`-th conjugate pole pair of an analog Butterworth prototype.
fn butterworth_q(order: usize, k: usize) -> f64 {
    let n = order as f64;
    let theta = if order % 2 == 1 {
        (k as f64 + 1.0) * PI / n
    } else {
        (2.0 * k as f64 + 1.0) * PI / (2.0 * n)
    };
    1.0 / (2.0 * theta.cos())
}

fn butterworth_sections(
    pass: Pass,
    cutoff: f64,
    sample_rate: u32,
    order: usize,
) -> Result<Vec<Coefficients<f64>>, FilterError> {
    if order == 0 {
        return Err(FilterError::ZeroOrder);
    }
    let fs = sample_rate as f64;
    if !(cutoff > 0.0) || !cutoff.is_finite() {
        return Err(FilterError::Design { cutoff });
    }
    if cutoff >= fs / 2.0 {
        return Err(FilterError::AboveNyquist { cutoff, sample_rate });
    }

    let mut sections = Vec::with_capacity(order / 2 + 1);
    for k in 0..order / 2 {
        let biquad_type = match pass {
            Pass::Low => Type::LowPass,
            Pass::High => Type::HighPass,
        };
        let coeffs = Coefficients::<f64>::from_params(
            biquad_type,
            fs.hz(),
            cutoff.hz(),
            butterworth_q(order, k),
        )
        .map_err(|_| FilterError::Design { cutoff })?;
        sections.push(coeffs);
    }

    if order % 2 == 1 {
        // Bilinear transform of 1/(s+1) or s/(s+1), prewarped at the cutoff.
        let k = (PI * cutoff / fs).tan();
        let norm = 1.0 / (1.0 + k);
        let a1 = (k - 1.0) * norm;
        let (b0, b1) = match pass {
            Pass::Low => (k * norm, k * norm),
            Pass::High => (norm, -norm),
        };
        sections.push(Coefficients { a1, a2: 0.0, b0, b1, b2: 0.0 });
    }

    Ok(sections)
}

/// Designs the band's filter for `sample_rate` and applies it with `gain`.
pub fn apply(band: Band, samples: &[f32], sample_rate: u32, gain: f32) -> Result<Vec<f32>, FilterError> {
    let cascade = FilterSpec::for_band(band).design(sample_rate)?;
    Ok(cascade.process(samples, gain))
}

// 3. The bank
/// Three parallel band filters whose outputs are summed.
///
/// Designs are kept only for the most recent sample rate and rebuilt when it
/// changes.
#[derive(Debug, Default)]
pub struct FilterBank {
    designs: Option<(u32, [FilterCascade; 3])>,
}

impl FilterBank {
    pub fn new() -> Self {
        Self::default()
    }

    fn designs_for(&mut self, sample_rate: u32) -> Result<&[FilterCascade; 3], FilterError> {
        let stale = !matches!(&self.designs, Some((sr, _)) if *sr == sample_rate);
        if stale {
            let designed = [
                FilterSpec::for_band(Band::Low).design(sample_rate)?,
                FilterSpec::for_band(Band::Mid).design(sample_rate)?,
                FilterSpec::for_band(Band::High).design(sample_rate)?,
            ];
            self.designs = Some((sample_rate, designed));
        }
        match &self.designs {
            Some((_, d)) => Ok(d),
            None => Err(FilterError::Design { cutoff: 0.0 }),
        }
    }

    pub fn apply(&mut self, band: Band, samples: &[f32], sample_rate: u32, gain: f32) -> Result<Vec<f32>, FilterError> {
        let designs = self.designs_for(sample_rate)?;
        Ok(designs[band.index()].process(samples, gain))
    }

    /// Sum of the three gained bands for one channel.
    ///
    /// With every gain at unity the bands recombine to the input, so the input is
    /// returned as is. Bands at zero gain are skipped.
    pub fn process(&mut self, samples: &[f32], sample_rate: u32, gains: BandGains) -> Result<Vec<f32>, FilterError> {
        if gains.is_unity() {
            return Ok(samples.to_vec());
        }
        let designs = self.designs_for(sample_rate)?;
        let mut out = vec![0.0f32; samples.len()];
        for band in Band::ALL {
            let gain = gains.get(band);
            if gain == 0.0 {
                continue;
            }
            let filtered = designs[band.index()].process(samples, gain);
            for (o, f) in out.iter_mut().zip(filtered) {
                *o += f;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44100;

    fn sine(freq: f64, secs: f64) -> Vec<f32> {
        let n = (SR as f64 * secs) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / SR as f64).sin() as f32 * 0.5)
            .collect()
    }

    fn rms(x: &[f32]) -> f64 {
        (x.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / x.len() as f64).sqrt()
    }

    fn reconstructed(input: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; input.len()];
        for band in Band::ALL {
            let part = apply(band, input, SR, 1.0).unwrap();
            for (o, p) in out.iter_mut().zip(part) {
                *o += p;
            }
        }
        out
    }

    #[test]
    fn butterworth_q_values() {
        assert!((butterworth_q(2, 0) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
        assert!((butterworth_q(5, 0) - 0.618).abs() < 1e-3);
        assert!((butterworth_q(5, 1) - 1.618).abs() < 1e-3);
    }

    #[test]
    fn unity_bands_preserve_energy() {
        for freq in [100.0, 1000.0, 8000.0] {
            let input = sine(freq, 1.0);
            let out = reconstructed(&input);
            let half = input.len() / 2;
            let ratio = rms(&out[half..]) / rms(&input[half..]);
            assert!((0.9..1.1).contains(&ratio), "{freq} Hz ratio {ratio}");
        }
    }

    #[test]
    fn bands_reject_out_of_band_tones() {
        let low_tone = sine(50.0, 1.0);
        let high = apply(Band::High, &low_tone, SR, 1.0).unwrap();
        assert!(rms(&high[high.len() / 2..]) < 0.01);

        let high_tone = sine(10_000.0, 1.0);
        let low = apply(Band::Low, &high_tone, SR, 1.0).unwrap();
        assert!(rms(&low[low.len() / 2..]) < 0.01);

        let mid = apply(Band::Mid, &high_tone, SR, 1.0).unwrap();
        assert!(rms(&mid[mid.len() / 2..]) < 0.02);
    }

    #[test]
    fn gain_scales_output() {
        let input = sine(500.0, 0.1);
        let unit = apply(Band::Mid, &input, SR, 1.0).unwrap();
        let cut = apply(Band::Mid, &input, SR, -0.5).unwrap();
        for (u, c) in unit.iter().zip(&cut) {
            assert!((u * -0.5 - c).abs() < 1e-5);
        }
    }

    #[test]
    fn inverted_band_pass_is_rejected() {
        let err = FilterCascade::band_pass(2000.0, 200.0, SR, 5).unwrap_err();
        assert_eq!(err, FilterError::InvalidCutoffs { low: 2000.0, high: 200.0 });
        assert!(FilterCascade::band_pass(200.0, 200.0, SR, 5).is_err());
    }

    #[test]
    fn cutoff_above_nyquist_is_rejected() {
        let err = apply(Band::High, &[0.0; 16], 3000, 1.0).unwrap_err();
        assert!(matches!(err, FilterError::AboveNyquist { .. }));
    }

    #[test]
    fn bank_skips_filtering_at_unity() {
        let mut bank = FilterBank::new();
        let input = sine(300.0, 0.05);
        let out = bank.process(&input, SR, BandGains::default()).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn bank_redesigns_on_rate_change() {
        let mut bank = FilterBank::new();
        let gains = BandGains::new(0.0, 0.0, 1.0);
        bank.process(&[0.0; 8], SR, gains).unwrap();
        assert_eq!(bank.designs.as_ref().map(|(sr, _)| *sr), Some(SR));
        bank.process(&[0.0; 8], 48000, gains).unwrap();
        assert_eq!(bank.designs.as_ref().map(|(sr, _)| *sr), Some(48000));
    }

    #[test]
    fn bank_matches_sum_of_bands() {
        let mut bank = FilterBank::new();
        let input = sine(700.0, 0.05);
        let gains = BandGains::new(0.5, 1.5, -1.0);
        let out = bank.process(&input, SR, gains).unwrap();
        let expected: Vec<f32> = {
            let l = apply(Band::Low, &input, SR, 0.5).unwrap();
            let m = apply(Band::Mid, &input, SR, 1.5).unwrap();
            let h = apply(Band::High, &input, SR, -1.0).unwrap();
            l.iter().zip(&m).zip(&h).map(|((a, b), c)| a + b + c).collect()
        };
        for (o, e) in out.iter().zip(&expected) {
            assert!((o - e).abs() < 1e-6);
        }
    }

    #[test]
    fn band_names_parse() {
        assert_eq!("LOW".parse::<Band>().unwrap(), Band::Low);
        assert_eq!(" mid ".parse::<Band>().unwrap(), Band::Mid);
        assert!("sub".parse::<Band>().is_err());
    }
}
