// src/decoder/dsp.rs

/// Splits interleaved samples into one buffer per channel.
pub fn deinterleave(interleaved: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let channels = channels.max(1);
    let frames = interleaved.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    append_interleaved_to_planar(interleaved, &mut planar, channels);
    planar
}

pub fn append_interleaved_to_planar(
    interleaved: &[f32],
    planar: &mut [Vec<f32>],
    channels: usize,
) {
    for row in interleaved.chunks_exact(channels) {
        for (ch, &s) in row.iter().enumerate() {
            planar[ch].push(s);
        }
    }
}

/// Shortest channel length. Interleaving truncates to this.
pub fn planar_len(planar: &[Vec<f32>]) -> usize {
    planar.iter().map(|v| v.len()).min().unwrap_or(0)
}

pub fn take_from_planar(planar: &mut [Vec<f32>], frames: usize) -> Vec<Vec<f32>> {
    let mut out = Vec::with_capacity(planar.len());
    for ch in planar.iter_mut() {
        let n = frames.min(ch.len());
        let tail = ch.split_off(n);
        out.push(std::mem::replace(ch, tail));
    }
    out
}

/// Interleaves planar channels, truncating every channel to the shortest one.
pub fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let channels = planar.len();
    if channels == 0 {
        return Vec::new();
    }
    let frames = planar_len(planar);
    let mut out = vec![0.0f32; frames * channels];
    for f in 0..frames {
        for ch in 0..channels {
            out[f * channels + ch] = planar[ch][f];
        }
    }
    out
}

pub fn updown_mix_interleaved(input: &[f32], in_ch: usize, out_ch: usize) -> Vec<f32> {
    if in_ch == out_ch || in_ch == 0 || out_ch == 0 {
        return input.to_vec();
    }
    let frames = input.len() / in_ch;
    let mut out = vec![0.0f32; frames * out_ch];

    match (in_ch, out_ch) {
        (1, 2) => {
            for f in 0..frames {
                let m = input[f];
                out[f * 2] = m;
                out[f * 2 + 1] = m;
            }
        }
        (2, 1) => {
            for f in 0..frames {
                out[f] = 0.5 * (input[f * 2] + input[f * 2 + 1]);
            }
        }
        _ if out_ch < in_ch => {
            // Average contiguous groups of input channels into each output channel.
            let factor = in_ch as f32 / out_ch as f32;
            for f in 0..frames {
                for oc in 0..out_ch {
                    let start = (oc as f32 * factor).floor() as usize;
                    let end = (((oc + 1) as f32 * factor).ceil() as usize).min(in_ch);
                    let n = end.saturating_sub(start);
                    let acc: f32 = input[f * in_ch + start..f * in_ch + end].iter().sum();
                    out[f * out_ch + oc] = if n > 0 { acc / n as f32 } else { 0.0 };
                }
            }
        }
        _ => {
            for f in 0..frames {
                for oc in 0..out_ch {
                    out[f * out_ch + oc] = input[f * in_ch + oc % in_ch];
                }
            }
        }
    }

    out
}
