use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use emupace_core::FrameTimingStats;
use emupace_core::audio_queue::{SampleConsumer, SampleProducer, sample_ring};
use log::{debug, warn};

const DRAIN_TICK: Duration = Duration::from_millis(5);

/// Where emulated audio ends up. Dropping it stops playback.
pub struct AudioOutput {
    sample_rate: u32,
    _backend: Backend,
}

enum Backend {
    #[cfg(feature = "audio-out")]
    Device(cpal::Stream),
    Drain(DrainThread),
}

impl AudioOutput {
    /// Create the sample ring and start consuming it. Plays through the
    /// default output device when `use_device` is set and the `audio-out`
    /// feature is built in; otherwise samples are consumed in real time
    /// without being played. Underruns are counted in `stats`.
    pub fn start(
        capacity_frames: usize,
        sample_rate: u32,
        use_device: bool,
        stats: &FrameTimingStats,
    ) -> (Self, SampleProducer) {
        #[cfg(feature = "audio-out")]
        if use_device {
            let (producer, consumer) = sample_ring(capacity_frames, stats.clone());
            match device::start_stream(consumer) {
                Ok((stream, rate)) => {
                    log::info!("Audio: playing through default device at {rate} Hz");
                    let output = Self {
                        sample_rate: rate,
                        _backend: Backend::Device(stream),
                    };
                    return (output, producer);
                }
                Err(e) => warn!("Audio: {e}; draining headless"),
            }
        }
        if use_device && !cfg!(feature = "audio-out") {
            warn!("Audio: built without the audio-out feature; draining headless");
        }

        let (producer, consumer) = sample_ring(capacity_frames, stats.clone());
        let output = Self {
            sample_rate,
            _backend: Backend::Drain(DrainThread::spawn(consumer, sample_rate)),
        };
        (output, producer)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Pulls samples at the nominal rate, the way a device callback would.
struct DrainThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DrainThread {
    fn spawn(consumer: SampleConsumer, sample_rate: u32) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("emupace-audio".into())
            .spawn(move || drain_main(consumer, sample_rate, &stop_flag));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Audio: failed to spawn drain thread: {e}");
                None
            }
        };
        Self { stop, handle }
    }
}

impl Drop for DrainThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn drain_main(mut consumer: SampleConsumer, sample_rate: u32, stop: &AtomicBool) {
    let start = Instant::now();
    let mut consumed: u64 = 0;
    let mut buf = Vec::new();
    while !stop.load(Ordering::Acquire) {
        thread::sleep(DRAIN_TICK);
        let due = (start.elapsed().as_secs_f64() * f64::from(sample_rate)) as u64;
        let frames = due.saturating_sub(consumed) as usize;
        if frames == 0 {
            continue;
        }
        buf.resize(frames * 2, 0);
        consumer.fill_interleaved(&mut buf, 2);
        consumed += frames as u64;
    }
    debug!("Audio: drained {consumed} frames");
}

#[cfg(feature = "audio-out")]
mod device {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use emupace_core::audio_queue::SampleConsumer;
    use log::warn;

    /// Start a `cpal` stream fed from `consumer`.
    pub fn start_stream(mut consumer: SampleConsumer) -> Result<(cpal::Stream, u32), String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "no output device".to_string())?;
        let supported = device
            .default_output_config()
            .map_err(|e| format!("no supported output config: {e}"))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let sample_rate = config.sample_rate.0;
        let channels = config.channels as usize;
        let err_fn = |err| warn!("Audio: cpal stream error: {err}");

        let mut scratch: Vec<i16> = Vec::new();
        let stream = match sample_format {
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _| {
                    consumer.fill_interleaved(data, channels);
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_output_stream(
                &config,
                move |data: &mut [u16], _| {
                    scratch.resize(data.len(), 0);
                    consumer.fill_interleaved(&mut scratch, channels);
                    for (out, &s) in data.iter_mut().zip(&scratch) {
                        *out = (s as i32 + 32768) as u16;
                    }
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    scratch.resize(data.len(), 0);
                    consumer.fill_interleaved(&mut scratch, channels);
                    for (out, &s) in data.iter_mut().zip(&scratch) {
                        *out = s as f32 / 32768.0;
                    }
                },
                err_fn,
                None,
            ),
            other => return Err(format!("unsupported sample format {other:?}")),
        }
        .map_err(|e| format!("failed to build stream: {e}"))?;

        stream
            .play()
            .map_err(|e| format!("failed to play stream: {e}"))?;
        Ok((stream, sample_rate))
    }
}
