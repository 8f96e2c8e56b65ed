// src/audio/cpal_sink.rs

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SizedSample, Stream, StreamConfig};
use log::{error, info};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rubato::SincFixedIn;

use super::{resample, OutputSink, SinkFactory};
use crate::decoder::dsp;
use crate::error::SinkError;

/// Opens the host's default output device for every streaming session.
#[derive(Debug, Clone)]
pub struct CpalSinkFactory {
    /// Ring buffer size between the writer and the device callback.
    pub ring_buffer_frames: usize,
}

impl Default for CpalSinkFactory {
    fn default() -> Self {
        Self {
            ring_buffer_frames: 8192,
        }
    }
}

impl SinkFactory for CpalSinkFactory {
    fn open(&self, sample_rate: u32, channels: usize) -> Result<Box<dyn OutputSink>, SinkError> {
        Ok(Box::new(CpalSink::open(sample_rate, channels, self.ring_buffer_frames)?))
    }
}

/// A cpal output stream fed through a lock-free ring buffer.
///
/// `write` blocks while the ring is full, so the writer never runs more than
/// one ring's worth ahead of the device. Tracks whose rate or channel count
/// differ from the device are converted on the way in.
pub struct CpalSink {
    _stream: Stream,
    producer: HeapProd<f32>,
    failed: Arc<AtomicBool>,
    channels: usize,
    device_channels: usize,
    device_rate: u32,
    resampler: Option<SincFixedIn<f32>>,
    stage_planar: Vec<Vec<f32>>,
}

impl CpalSink {
    pub fn open(sample_rate: u32, channels: usize, ring_buffer_frames: usize) -> Result<Self, SinkError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(SinkError::NoDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| SinkError::Device(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config = supported.config();
        let device_channels = config.channels as usize;
        let device_rate = config.sample_rate.0;

        info!(
            "Output device: {} ch @ {} Hz (track {} ch @ {} Hz)",
            device_channels, device_rate, channels, sample_rate
        );

        let rb = HeapRb::<f32>::new(ring_buffer_frames.max(1) * device_channels);
        let (producer, consumer) = rb.split();

        let failed = Arc::new(AtomicBool::new(false));
        let failed_cb = failed.clone();
        let err_fn = move |err: cpal::StreamError| {
            error!("Output stream error: {err}");
            failed_cb.store(true, Ordering::Relaxed);
        };

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32, _>(&device, &config, consumer, err_fn)?,
            SampleFormat::I16 => build_stream::<i16, _>(&device, &config, consumer, err_fn)?,
            SampleFormat::U16 => build_stream::<u16, _>(&device, &config, consumer, err_fn)?,
            other => return Err(SinkError::UnsupportedFormat(format!("{other:?}"))),
        };
        stream.play().map_err(|e| SinkError::Device(e.to_string()))?;

        let resampler = resample::build_resampler(sample_rate, device_rate, device_channels)
            .map_err(|e| SinkError::Device(format!("{e:#}")))?;

        Ok(Self {
            _stream: stream,
            producer,
            failed,
            channels,
            device_channels,
            device_rate,
            resampler,
            stage_planar: vec![Vec::with_capacity(4096); device_channels],
        })
    }

    fn push_blocking(&mut self, data: &[f32]) -> Result<(), SinkError> {
        let mut idx = 0usize;
        while idx < data.len() {
            if self.failed.load(Ordering::Relaxed) {
                return Err(SinkError::Closed);
            }
            let pushed = self.producer.push_slice(&data[idx..]);
            if pushed == 0 {
                std::thread::park_timeout(Duration::from_micros(200));
            }
            idx += pushed;
        }
        Ok(())
    }

    fn push_planar(&mut self, planar: &[Vec<f32>]) -> Result<(), SinkError> {
        let interleaved = dsp::interleave(planar);
        self.push_blocking(&interleaved)
    }
}

impl OutputSink for CpalSink {
    fn write(&mut self, block: &[f32]) -> Result<(), SinkError> {
        let mixed = dsp::updown_mix_interleaved(block, self.channels, self.device_channels);
        if self.resampler.is_none() {
            return self.push_blocking(&mixed);
        }

        dsp::append_interleaved_to_planar(&mixed, &mut self.stage_planar, self.device_channels);
        loop {
            let Some(r) = self.resampler.as_mut() else {
                return Ok(());
            };
            let out = resample::try_process_exact(r, &mut self.stage_planar)
                .map_err(|e| SinkError::Device(format!("{e:#}")))?;
            match out {
                Some(planar) => self.push_planar(&planar)?,
                None => return Ok(()),
            }
        }
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(r) = self.resampler.as_mut() {
            let tail = resample::flush(r, &mut self.stage_planar)
                .map_err(|e| SinkError::Device(format!("{e:#}")))?;
            self.push_planar(&tail)?;
        }

        // Let the device play out what is queued, bounded by twice the queue's duration.
        let queued = self.producer.occupied_len() / self.device_channels.max(1);
        let budget = Duration::from_secs_f64(2.0 * queued as f64 / self.device_rate.max(1) as f64);
        let deadline = Instant::now() + budget;
        while self.producer.occupied_len() > 0
            && !self.failed.load(Ordering::Relaxed)
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

fn build_stream<T, E>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
    err_fn: E,
) -> Result<Stream, SinkError>
where
    T: cpal::Sample + cpal::FromSample<f32> + SizedSample,
    E: FnMut(cpal::StreamError) + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for out in data.iter_mut() {
                    *out = T::from_sample(consumer.try_pop().unwrap_or(0.0));
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| SinkError::Device(e.to_string()))
}
