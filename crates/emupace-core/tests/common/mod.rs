#![allow(dead_code)]

use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use emupace_core::display::{DisplayRefresh, HostWindow};
use emupace_core::{AudioSink, EmuSystem, FrameParams, FrameRate, VideoSink, VideoSystem};

static INIT: OnceCell<()> = OnceCell::new();

pub fn init_logging() {
    INIT.get_or_init(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub const WIDTH: usize = 4;
pub const HEIGHT: usize = 2;
pub const SAMPLES_PER_FRAME: usize = 8;

/// Counters shared between a test and a [`CountingSystem`] that may live on
/// another thread.
#[derive(Default)]
pub struct SystemCounters {
    pub frames: AtomicU64,
    pub rendered: AtomicU64,
    pub audio_frames: AtomicU64,
    pub fast_forward: AtomicBool,
}

impl SystemCounters {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::SeqCst)
    }

    pub fn audio_frames(&self) -> u64 {
        self.audio_frames.load(Ordering::SeqCst)
    }

    pub fn set_fast_forward(&self, enable: bool) {
        self.fast_forward.store(enable, Ordering::SeqCst);
    }
}

/// Machine that draws its frame number and emits a fixed block of samples.
pub struct CountingSystem {
    pub counters: Arc<SystemCounters>,
    video_system: VideoSystem,
}

impl CountingSystem {
    pub fn new(video_system: VideoSystem) -> (Self, Arc<SystemCounters>) {
        let counters = Arc::new(SystemCounters::default());
        (
            Self {
                counters: Arc::clone(&counters),
                video_system,
            },
            counters,
        )
    }
}

impl EmuSystem for CountingSystem {
    fn run_frame(&mut self, video: Option<&mut dyn VideoSink>, audio: Option<&mut dyn AudioSink>) {
        let frame = self.counters.frames.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(video) = video {
            let pixels = [frame as u32; WIDTH * HEIGHT];
            video.write_frame(WIDTH, HEIGHT, &pixels);
            self.counters.rendered.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(audio) = audio {
            let written = audio.write_samples(&[[1, -1]; SAMPLES_PER_FRAME]);
            self.counters
                .audio_frames
                .fetch_add(written as u64, Ordering::SeqCst);
        }
    }

    fn video_system(&self) -> VideoSystem {
        self.video_system
    }

    fn should_fast_forward(&self) -> bool {
        self.counters.fast_forward.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Audio sink that accepts everything.
#[derive(Default)]
pub struct CountingAudio {
    pub frames: usize,
}

impl AudioSink for CountingAudio {
    fn write_samples(&mut self, frames: &[[i16; 2]]) -> usize {
        self.frames += frames.len();
        frames.len()
    }
}

/// Parameters of the `n`th vsync (1-based) on a perfectly regular host.
pub fn vsync(n: u64, period: Duration) -> FrameParams {
    FrameParams::new(period * n as u32, period * (n - 1) as u32, period)
}

pub fn hz(rate: f64) -> FrameRate {
    FrameRate::from_hz(rate).unwrap()
}

pub fn window(id: u32, refresh_hz: f64) -> HostWindow {
    HostWindow::new(id, DisplayRefresh::from_reported(refresh_hz))
}
