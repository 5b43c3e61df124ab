use std::time::Duration;

use log::{debug, warn};

use crate::frame_rate::{FrameParams, FrameRate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTimeInfo {
    /// Emulated frames due since the previous callback.
    pub advanced: u32,
    /// When the last of those frames is expected on screen.
    pub present_time: Duration,
    /// Host time consumed by this callback; zero when the clock restarted.
    pub elapsed: Duration,
}

/// Emulated-clock bookkeeping.
///
/// Host time is accumulated into a carry and converted into whole emulated
/// frames; the fractional remainder stays in the carry, so over any run the
/// number of frames advanced tracks elapsed host time to within one frame.
#[derive(Debug, Clone)]
pub struct EmuTiming {
    frame_time: Duration,
    speed: f64,
    scaled_frame_nanos: u64,
    last_timestamp: Option<Duration>,
    carry_nanos: u64,
}

impl EmuTiming {
    pub fn new(rate: FrameRate) -> Self {
        let mut timing = Self {
            frame_time: rate.duration(),
            speed: 1.0,
            scaled_frame_nanos: rate.nanos(),
            last_timestamp: None,
            carry_nanos: 0,
        };
        timing.rescale();
        timing
    }

    /// Set the target output frame duration. Restarts the clock.
    pub fn config_frame_time(&mut self, rate: FrameRate) {
        if self.frame_time != rate.duration() {
            debug!("Timing: frame time {:?} -> {:?}", self.frame_time, rate.duration());
        }
        self.frame_time = rate.duration();
        self.rescale();
        self.reset();
    }

    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    /// Frame time after applying the speed multiplier.
    pub fn scaled_frame_time(&self) -> Duration {
        Duration::from_nanos(self.scaled_frame_nanos)
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.speed
    }

    /// Run the emulated clock `speed` times faster than real time.
    pub fn set_speed_multiplier(&mut self, speed: f64) {
        if !speed.is_finite() || speed <= 0.0 {
            warn!("Timing: ignoring invalid speed multiplier {speed}");
            return;
        }
        if (self.speed - speed).abs() < f64::EPSILON {
            return;
        }
        debug!("Timing: speed multiplier {} -> {speed}", self.speed);
        self.speed = speed;
        self.rescale();
        self.carry_nanos = self.scaled_frame_nanos / 2;
    }

    /// Forget the previous timestamp so the next callback advances one frame.
    pub fn reset(&mut self) {
        self.last_timestamp = None;
        self.carry_nanos = 0;
    }

    pub fn advance_frames(&mut self, params: FrameParams) -> FrameTimeInfo {
        let Some(last) = self.last_timestamp.replace(params.time) else {
            // Center the carry so steady host jitter never straddles a frame
            // boundary.
            self.carry_nanos = self.scaled_frame_nanos / 2;
            return FrameTimeInfo {
                advanced: 1,
                present_time: params.present_time(1),
                elapsed: Duration::ZERO,
            };
        };

        let elapsed = params.time.saturating_sub(last);
        let total = u128::from(self.carry_nanos) + elapsed.as_nanos();
        let frame = u128::from(self.scaled_frame_nanos);
        let advanced = total / frame;
        self.carry_nanos = (total - advanced * frame) as u64;

        let advanced = u32::try_from(advanced).unwrap_or(u32::MAX);
        FrameTimeInfo {
            advanced,
            present_time: params.present_time(advanced),
            elapsed,
        }
    }

    /// Fraction of an emulated frame carried into the next callback.
    pub fn carried_fraction(&self) -> f64 {
        self.carry_nanos as f64 / self.scaled_frame_nanos as f64
    }

    fn rescale(&mut self) {
        let nanos = (self.frame_time.as_nanos() as f64 / self.speed).round();
        self.scaled_frame_nanos = (nanos as u64).max(1);
    }
}

impl Default for EmuTiming {
    fn default() -> Self {
        Self::new(FrameRate::DEFAULT_HOST)
    }
}
