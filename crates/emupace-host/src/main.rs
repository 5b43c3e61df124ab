mod audio;
mod demo_system;
mod host_config;
mod vsync;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::Receiver;
use emupace_core::display::{DisplayRefresh, HostWindow};
use emupace_core::sync::PendingPresent;
use emupace_core::{
    EmuSystemTask, FrameTimingStats, MessageReplyMode, TaskConfig, TaskEvent, VideoSystem,
};
use log::{debug, error, info, warn};

use audio::AudioOutput;
use demo_system::TestPatternSystem;
use host_config::HostConfig;
use vsync::VsyncSource;

#[derive(Parser)]
struct Args {
    /// Path to the host config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective config back to the config file
    #[arg(long)]
    save_config: bool,

    /// Number of host vsyncs to run
    #[arg(long, default_value_t = 600)]
    frames: u64,

    /// Refresh rate the platform reports, in Hz
    #[arg(long)]
    refresh_hz: Option<f64>,

    /// Refresh rate the simulated panel actually runs at, in Hz
    #[arg(long)]
    actual_refresh_hz: Option<f64>,

    /// Platform device string used for refresh overrides
    #[arg(long)]
    device: Option<String>,

    /// Emulate a PAL machine
    #[arg(long)]
    pal: bool,

    /// Pace vsyncs against the wall clock instead of a virtual clock
    #[arg(long)]
    wall_clock: bool,

    /// Random vsync jitter, in microseconds
    #[arg(long)]
    jitter_us: Option<u64>,

    /// Inject a host stall every N vsyncs
    #[arg(long)]
    stall_every: Option<u32>,

    /// Length of injected stalls, in milliseconds
    #[arg(long)]
    stall_ms: Option<u64>,

    /// Measure the host refresh rate before trusting it
    #[arg(long)]
    detect: bool,

    /// Re-present the previous frame on vsyncs with nothing new to show
    #[arg(long)]
    blank_frames: bool,

    /// Emulation speed multiplier
    #[arg(long)]
    speed: Option<f64>,

    /// Fast-forward through the first N emulated frames
    #[arg(long, default_value_t = 0)]
    loader_frames: u64,

    /// Pause for N vsyncs halfway through the run
    #[arg(long, default_value_t = 0)]
    pause_frames: u64,

    /// Play audio through the default output device
    #[arg(long)]
    audio: bool,

    /// Seed for vsync jitter
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply_to(&self, cfg: &mut HostConfig) {
        if let Some(hz) = self.refresh_hz {
            cfg.display.refresh_hz = hz;
        }
        if self.actual_refresh_hz.is_some() {
            cfg.display.actual_refresh_hz = self.actual_refresh_hz;
        }
        if let Some(device) = &self.device {
            cfg.display.device = device.clone();
        }
        if self.pal {
            cfg.video_system = VideoSystem::Pal;
        }
        if let Some(jitter) = self.jitter_us {
            cfg.display.jitter_us = jitter;
        }
        if let Some(every) = self.stall_every {
            cfg.display.stall_every = every;
        }
        if let Some(ms) = self.stall_ms {
            cfg.display.stall_ms = ms;
        }
        if let Some(speed) = self.speed {
            cfg.speed_multiplier = speed;
        }
        cfg.detect_refresh |= self.detect;
        cfg.blank_frame_insertion |= self.blank_frames;
    }
}

/// Stand-in for a GPU presenter: keeps the latest frame and counts what it
/// was asked to show.
#[derive(Default)]
struct Renderer {
    frames: u64,
    blanks: u64,
    last_checksum: u32,
}

impl Renderer {
    fn present(&mut self, mut present: PendingPresent) {
        match present.take_frame() {
            Some(frame) => {
                self.frames += 1;
                self.last_checksum = frame
                    .pixels
                    .iter()
                    .fold(0u32, |acc, &px| acc.rotate_left(5) ^ px);
            }
            None => self.blanks += 1,
        }
        present.present();
    }

    fn handle(&mut self, event: TaskEvent) -> bool {
        match event {
            TaskEvent::Present(present) => {
                self.present(present);
                return true;
            }
            TaskEvent::FrameRateChanged(config) => info!(
                "Host: output now {} (refresh multiplier {})",
                config.rate, config.refresh_multiplier
            ),
            TaskEvent::FrameRateDetected(rate) => info!("Host: display measured at {rate}"),
            TaskEvent::FrameRateDetectionFailed { fallback } => {
                warn!("Host: refresh detection failed, staying at {fallback}")
            }
        }
        false
    }

    /// Handle events until a present arrives or `budget` runs out.
    fn pump(&mut self, events: &Receiver<TaskEvent>, budget: Duration) {
        while let Ok(event) = events.try_recv() {
            self.handle(event);
        }
        let deadline = Instant::now() + budget;
        while let Ok(event) = events.recv_deadline(deadline) {
            if self.handle(event) {
                break;
            }
        }
    }
}

fn main() {
    let args = Args::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(host_config::default_host_config_path);
    let mut cfg = host_config::load_from_file(&config_path);
    args.apply_to(&mut cfg);
    if args.save_config {
        match host_config::save_to_file(&config_path, &cfg) {
            Ok(()) => info!("Host: saved config to {}", config_path.display()),
            Err(e) => warn!("Host: failed to save config {}: {e}", config_path.display()),
        }
    }

    if let Err(e) = run(&args, &cfg) {
        error!("Host: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args, cfg: &HostConfig) -> emupace_core::Result<()> {
    let refresh = DisplayRefresh::from_platform(
        cfg.display.refresh_hz,
        &cfg.display.device,
        &cfg.device_quirks,
    );
    info!(
        "Host: display {} ({}), {:?} machine",
        refresh.rate,
        if refresh.reliable { "reliable" } else { "unreliable" },
        cfg.video_system
    );

    let stats = FrameTimingStats::new();
    let (audio, producer) =
        AudioOutput::start(cfg.audio.buffer_frames, cfg.audio.sample_rate, args.audio, &stats);
    let system = TestPatternSystem::new(cfg.video_system, audio.sample_rate())
        .with_loader(args.loader_frames);

    let task_config = TaskConfig {
        pacing: cfg.pacing,
        detector: cfg.detector,
        output_timing: cfg.output_timing.clone(),
        blank_frame_insertion: cfg.blank_frame_insertion,
        speed_multiplier: cfg.speed_multiplier,
        window: Some(HostWindow::new(1, refresh)),
    };
    let (mut task, events) = EmuSystemTask::start(
        Box::new(system),
        Some(Box::new(producer)),
        task_config,
        stats.clone(),
    )?;
    if cfg.detect_refresh {
        task.detect_frame_rate()?;
    }

    let mut vsync = VsyncSource::new(&cfg.display, refresh.rate, args.wall_clock, args.seed);
    let budget = if args.wall_clock {
        vsync.reported_period() / 2
    } else {
        Duration::from_millis(2)
    };
    let pause_at = (args.pause_frames > 0).then(|| args.frames / 2);
    let mut renderer = Renderer::default();
    let started = Instant::now();

    while vsync.count() < args.frames {
        let params = vsync.next_vsync();
        if pause_at == Some(vsync.count()) {
            task.pause(MessageReplyMode::Wait)?;
            debug!("Host: paused at vsync {}", vsync.count());
        }
        if let Some(at) = pause_at
            && vsync.count() == at + args.pause_frames
        {
            task.resume(MessageReplyMode::Wait)?;
            debug!("Host: resumed at vsync {}", vsync.count());
        }
        task.frame_update(params)?;
        renderer.pump(&events, budget);
    }

    let system = task.stop()?;
    while let Ok(event) = events.try_recv() {
        renderer.handle(event);
    }
    drop(audio);

    let snapshot = stats.snapshot();
    info!(
        "Host: {} vsyncs in {:?}; {} ran {} frames",
        vsync.count(),
        started.elapsed(),
        system.name(),
        snapshot.advanced_frames
    );
    info!(
        "Host: presented {} frames and {} blanks (checksum {:08x})",
        renderer.frames, renderer.blanks, renderer.last_checksum
    );
    println!("{snapshot}");
    Ok(())
}
