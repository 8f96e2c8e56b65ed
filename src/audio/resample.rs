// src/audio/resample.rs

//! Sample-rate conversion between a track and the output device.

use anyhow::Result;
use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::decoder::dsp;

/// Input frames consumed per resampler call.
const CHUNK_FRAMES: usize = 1024;

/// `None` when no conversion is needed.
pub fn build_resampler(
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
) -> Result<Option<SincFixedIn<f32>>> {
    if src_rate == dst_rate {
        return Ok(None);
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let sinc_len = 256usize;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window,
    };
    let r = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, channels)?;
    Ok(Some(r))
}

/// Runs one full chunk through the resampler if enough frames are staged.
pub fn try_process_exact(
    resampler: &mut SincFixedIn<f32>,
    stage_planar: &mut [Vec<f32>],
) -> Result<Option<Vec<Vec<f32>>>> {
    let need = resampler.input_frames_next();
    if dsp::planar_len(stage_planar) < need {
        return Ok(None);
    }
    let in_block = dsp::take_from_planar(stage_planar, need);
    Ok(Some(resampler.process(in_block.as_slice(), None)?))
}

/// Pushes whatever is staged plus the resampler's internal delay line out.
pub fn flush(
    resampler: &mut SincFixedIn<f32>,
    stage_planar: &mut [Vec<f32>],
) -> Result<Vec<Vec<f32>>> {
    let mut out: Vec<Vec<f32>> = vec![Vec::new(); stage_planar.len()];
    let have = dsp::planar_len(stage_planar);
    if have > 0 {
        let tail = dsp::take_from_planar(stage_planar, have);
        for (o, ch) in out.iter_mut().zip(resampler.process_partial(Some(tail.as_slice()), None)?) {
            o.extend(ch);
        }
    }
    for (o, ch) in out.iter_mut().zip(resampler.process_partial::<Vec<f32>>(None, None)?) {
        o.extend(ch);
    }
    Ok(out)
}
