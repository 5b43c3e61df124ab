use std::time::Duration;

use log::{debug, trace};

use crate::frame_rate::{FrameParams, FrameRateConfig};
use crate::stats::FrameTimingStats;
use crate::system::{AudioSink, EmuSystem, VideoSink, run_frames};
use crate::timing::EmuTiming;

/// Catch-up policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PacingTolerances {
    /// A host gap longer than this is treated as a hitch.
    pub stall_threshold_ms: u64,
    /// Frames run in one callback after a hitch.
    pub max_catch_up_frames: u32,
}

impl PacingTolerances {
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }
}

impl Default for PacingTolerances {
    fn default() -> Self {
        Self {
            stall_threshold_ms: 70,
            max_catch_up_frames: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Nothing to draw this vsync.
    Idle,
    /// Re-present the previous frame to keep the display cadence.
    BlankFrame,
    Ran {
        frames: u32,
        rendered: bool,
        fast_forward: bool,
    },
}

impl AdvanceOutcome {
    pub fn did_work(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Decides, per host vsync, how many emulated frames to run.
#[derive(Debug)]
pub struct FramePacer {
    timing: EmuTiming,
    frame_rate_config: FrameRateConfig,
    saved_advanced_frames: u32,
    // Next callback starts a fresh run and advances exactly one frame.
    restarted: bool,
    enable_blank_frame_insertion: bool,
    tolerances: PacingTolerances,
    stats: FrameTimingStats,
}

impl FramePacer {
    pub fn new(
        frame_rate_config: FrameRateConfig,
        tolerances: PacingTolerances,
        stats: FrameTimingStats,
    ) -> Self {
        Self {
            timing: EmuTiming::new(frame_rate_config.rate),
            frame_rate_config,
            saved_advanced_frames: 0,
            restarted: true,
            enable_blank_frame_insertion: false,
            tolerances,
            stats,
        }
    }

    pub fn frame_rate_config(&self) -> FrameRateConfig {
        self.frame_rate_config
    }

    pub fn set_frame_rate_config(&mut self, config: FrameRateConfig) {
        self.frame_rate_config = config;
        self.timing.config_frame_time(config.rate);
        self.saved_advanced_frames = 0;
        self.restarted = true;
    }

    pub fn blank_frame_insertion(&self) -> bool {
        self.enable_blank_frame_insertion
    }

    pub fn set_blank_frame_insertion(&mut self, enable: bool) {
        self.enable_blank_frame_insertion = enable;
    }

    pub fn set_speed_multiplier(&mut self, speed: f64) {
        self.timing.set_speed_multiplier(speed);
        self.saved_advanced_frames = 0;
    }

    pub fn tolerances(&self) -> &PacingTolerances {
        &self.tolerances
    }

    pub fn timing(&self) -> &EmuTiming {
        &self.timing
    }

    pub fn stats(&self) -> &FrameTimingStats {
        &self.stats
    }

    pub fn saved_advanced_frames(&self) -> u32 {
        self.saved_advanced_frames
    }

    /// Restart pacing, e.g. after a pause, so no catch-up burst follows.
    pub fn reset(&mut self) {
        self.timing.reset();
        self.saved_advanced_frames = 0;
        self.restarted = true;
    }

    /// Emulated frames due for this callback, after the hitch cap.
    pub fn frames_due(&mut self, params: FrameParams) -> u32 {
        let multiplier = self.frame_rate_config.refresh_multiplier;
        let restarted = std::mem::take(&mut self.restarted);
        let (mut advanced, elapsed) =
            if multiplier > 0 && self.timing.speed_multiplier() == 1.0 {
                // Leave the emulated clock unprimed so a later switch onto it
                // starts from this callback instead of the last one it saw.
                self.timing.reset();
                let vsyncs = if restarted { 1 } else { params.elapsed_frames() };
                self.saved_advanced_frames = self.saved_advanced_frames.saturating_add(vsyncs);
                let advanced = self.saved_advanced_frames / multiplier;
                self.saved_advanced_frames %= multiplier;
                (advanced, params.delta())
            } else {
                let info = self.timing.advance_frames(params);
                (info.advanced, info.elapsed)
            };

        let cap = self.tolerances.max_catch_up_frames.max(1);
        if advanced > cap && elapsed > self.tolerances.stall_threshold() {
            let dropped = advanced - cap;
            debug!("Pacer: host stalled for {elapsed:?}, capping {advanced} frames to {cap}");
            self.stats.record_stall(dropped);
            advanced = cap;
        }
        advanced
    }

    /// Handle one host vsync: run the due frames on `system`, or report a
    /// blank or idle callback without touching it.
    pub fn advance_frames<S: EmuSystem + ?Sized>(
        &mut self,
        params: FrameParams,
        system: &mut S,
        video: Option<&mut dyn VideoSink>,
        audio: Option<&mut dyn AudioSink>,
    ) -> AdvanceOutcome {
        self.stats.record_callback();
        let mut advanced = self.frames_due(params);
        let fast_forward = system.should_fast_forward();
        let audio = if fast_forward {
            advanced = 1;
            None
        } else {
            audio
        };

        if advanced == 0 {
            if self.enable_blank_frame_insertion {
                self.stats.record_blank_frame();
                return AdvanceOutcome::BlankFrame;
            }
            self.stats.record_idle();
            return AdvanceOutcome::Idle;
        }

        let rendered = video.is_some();
        trace!("Pacer: running {advanced} frame(s) at {:?}", params.time);
        run_frames(system, video, audio, advanced);
        self.stats.record_advance(advanced, rendered, fast_forward);
        AdvanceOutcome::Ran {
            frames: advanced,
            rendered,
            fast_forward,
        }
    }
}
