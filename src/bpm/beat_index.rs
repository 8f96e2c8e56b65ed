// src/bpm/beat_index.rs

/// Beat timestamps (seconds, non-decreasing) plus the track's base tempo.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatGrid {
    base_bpm: f64,
    beats: Vec<f64>,
}

impl BeatGrid {
    /// `None` if the tempo is not a positive finite number or the beats are not
    /// finite and non-decreasing.
    pub fn new(base_bpm: f64, beats: Vec<f64>) -> Option<Self> {
        if !(base_bpm > 0.0) || !base_bpm.is_finite() {
            return None;
        }
        if beats.iter().any(|b| !b.is_finite()) || beats.windows(2).any(|w| w[1] < w[0]) {
            return None;
        }
        Some(Self { base_bpm, beats })
    }

    /// Builds a grid from beat times alone, taking the tempo from the median
    /// inter-beat interval.
    pub fn from_beat_times(beats: Vec<f64>) -> Option<Self> {
        let mut intervals: Vec<f64> = beats
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|d| *d > 0.0)
            .collect();
        if intervals.is_empty() {
            return None;
        }
        intervals.sort_by(|a, b| a.total_cmp(b));
        let mid = intervals.len() / 2;
        let median = if intervals.len() % 2 == 0 {
            0.5 * (intervals[mid - 1] + intervals[mid])
        } else {
            intervals[mid]
        };
        Self::new(60.0 / median, beats)
    }

    pub fn base_bpm(&self) -> f64 {
        self.base_bpm
    }

    pub fn beats(&self) -> &[f64] {
        &self.beats
    }
}

/// Per-track beat information. Analysis failure is `Unknown`, never a sentinel.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BeatIndex {
    #[default]
    Unknown,
    Known(BeatGrid),
}

impl BeatIndex {
    pub fn known(base_bpm: f64, beats: Vec<f64>) -> Self {
        BeatGrid::new(base_bpm, beats).map_or(BeatIndex::Unknown, BeatIndex::Known)
    }

    pub fn is_known(&self) -> bool {
        matches!(self, BeatIndex::Known(_))
    }

    pub fn base_tempo(&self) -> Option<f64> {
        match self {
            BeatIndex::Known(grid) => Some(grid.base_bpm),
            BeatIndex::Unknown => None,
        }
    }

    pub fn beats(&self) -> &[f64] {
        match self {
            BeatIndex::Known(grid) => grid.beats(),
            BeatIndex::Unknown => &[],
        }
    }

    pub fn nearest_beat(&self, time: f64) -> Option<f64> {
        nearest_beat(self.beats(), time)
    }
}

/// Beat with the smallest distance to `time`; ties go to the earliest index.
pub fn nearest_beat(beats: &[f64], time: f64) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None;
    for &beat in beats {
        let dist = (beat - time).abs();
        match best {
            Some((_, d)) if dist >= d => {}
            _ => best = Some((beat, dist)),
        }
    }
    best.map(|(beat, _)| beat)
}

/// Beat coincidence between two tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatAlignment {
    /// Beat in the leading track nearest its playback time.
    pub beat_a: f64,
    /// Beat in the other track nearest `beat_a`.
    pub beat_b: f64,
    /// `beat_a - beat_b`, in seconds.
    pub offset: f64,
}

/// `None` when either index has no beats.
pub fn align(a: &BeatIndex, a_time: f64, b: &BeatIndex) -> Option<BeatAlignment> {
    let beat_a = a.nearest_beat(a_time)?;
    let beat_b = b.nearest_beat(beat_a)?;
    Some(BeatAlignment {
        beat_a,
        beat_b,
        offset: beat_a - beat_b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_beat_picks_minimum_distance() {
        let a = BeatIndex::known(120.0, vec![1.0, 3.0, 5.0]);
        assert_eq!(a.nearest_beat(3.1), Some(3.0));
        assert_eq!(a.nearest_beat(-4.0), Some(1.0));
        assert_eq!(a.nearest_beat(99.0), Some(5.0));
    }

    #[test]
    fn nearest_beat_tie_goes_to_earliest() {
        assert_eq!(nearest_beat(&[1.0, 3.0], 2.0), Some(1.0));
    }

    #[test]
    fn alignment_offset_between_grids() {
        let a = BeatIndex::known(120.0, vec![1.0, 3.0, 5.0]);
        let b = BeatIndex::known(118.0, vec![0.5, 2.9, 6.0]);
        let al = align(&a, 3.1, &b).unwrap();
        assert_eq!(al.beat_a, 3.0);
        assert_eq!(al.beat_b, 2.9);
        assert!((al.offset - 0.1).abs() < 1e-9);
    }

    #[test]
    fn unknown_index_has_no_alignment() {
        let a = BeatIndex::known(120.0, vec![1.0]);
        assert!(align(&a, 0.0, &BeatIndex::Unknown).is_none());
        assert!(align(&BeatIndex::Unknown, 0.0, &a).is_none());
        assert_eq!(BeatIndex::Unknown.base_tempo(), None);
    }

    #[test]
    fn invalid_grids_degrade_to_unknown() {
        assert_eq!(BeatIndex::known(0.0, vec![1.0]), BeatIndex::Unknown);
        assert_eq!(BeatIndex::known(f64::NAN, vec![]), BeatIndex::Unknown);
        assert_eq!(BeatIndex::known(120.0, vec![2.0, 1.0]), BeatIndex::Unknown);
        assert!(BeatIndex::known(120.0, vec![1.0, 1.0, 2.0]).is_known());
    }

    #[test]
    fn tempo_from_median_interval() {
        let grid = BeatGrid::from_beat_times(vec![0.0, 0.5, 1.0, 1.5, 2.6]).unwrap();
        assert!((grid.base_bpm() - 120.0).abs() < 1e-9);
        assert!(BeatGrid::from_beat_times(vec![1.0]).is_none());
    }
}
