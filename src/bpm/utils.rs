// src/bpm/utils.rs
use std::f32::consts::PI;

pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Centered moving average; the window shrinks at the edges.
pub fn moving_average_inplace(x: &mut [f32], radius: usize) {
    if radius == 0 || x.is_empty() {
        return;
    }
    let n = x.len();
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0f64);
    for &v in x.iter() {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + v as f64);
    }
    for i in 0..n {
        let left = i.saturating_sub(radius);
        let right = (i + radius).min(n - 1);
        x[i] = ((prefix[right + 1] - prefix[left]) / (right - left + 1) as f64) as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_average_shrinks_at_edges() {
        let mut x = [0.0, 3.0, 6.0, 9.0];
        moving_average_inplace(&mut x, 1);
        assert_eq!(x, [1.5, 3.0, 6.0, 7.5]);
    }

    #[test]
    fn downmix_averages_frames() {
        assert_eq!(downmix_to_mono(&[1.0, 0.0, 0.0, -1.0], 2), vec![0.5, -0.5]);
    }
}
