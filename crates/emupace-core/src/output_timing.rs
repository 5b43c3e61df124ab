use log::debug;

use crate::display::DisplayRefresh;
use crate::frame_rate::{FrameRate, FrameRateConfig, VideoSystem};

/// Relative error under which a host refresh counts as an exact multiple.
pub const EXACT_MULTIPLIER_TOLERANCE: f64 = 0.0001;

/// How the output frame rate is chosen for one video system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum FrameTimeOption {
    /// Lock to the host refresh (or an integer fraction of it) when it is
    /// close to the native rate; otherwise run at the native rate.
    #[default]
    Auto,
    /// Always the system's native rate.
    Original,
    /// A user-forced rate, in Hz.
    Custom(FrameRate),
}

/// Chooses the coordinator's target output rate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct OutputTimingManager {
    pub ntsc: FrameTimeOption,
    pub pal: FrameTimeOption,
    /// Largest relative difference between native and host-derived rates
    /// that [`FrameTimeOption::Auto`] will absorb.
    pub max_host_match_deviation: f64,
    /// Highest host-frames-per-emulated-frame ratio considered.
    pub max_refresh_multiplier: u32,
}

impl Default for OutputTimingManager {
    fn default() -> Self {
        Self {
            ntsc: FrameTimeOption::Auto,
            pal: FrameTimeOption::Auto,
            max_host_match_deviation: 0.005,
            max_refresh_multiplier: 4,
        }
    }
}

impl OutputTimingManager {
    pub fn option(&self, video_system: VideoSystem) -> FrameTimeOption {
        match video_system {
            VideoSystem::Ntsc => self.ntsc,
            VideoSystem::Pal => self.pal,
        }
    }

    pub fn set_option(&mut self, video_system: VideoSystem, option: FrameTimeOption) {
        match video_system {
            VideoSystem::Ntsc => self.ntsc = option,
            VideoSystem::Pal => self.pal = option,
        }
    }

    pub fn frame_rate_config(
        &self,
        video_system: VideoSystem,
        native: FrameRate,
        display: &DisplayRefresh,
    ) -> FrameRateConfig {
        let host = display.reliable.then_some(display.rate);
        let config = match self.option(video_system) {
            FrameTimeOption::Original => with_exact_multiplier(native, host, self.max_refresh_multiplier),
            FrameTimeOption::Custom(rate) => with_exact_multiplier(rate, host, self.max_refresh_multiplier),
            FrameTimeOption::Auto => host
                .and_then(|host| self.match_host(native, host))
                .unwrap_or_else(|| with_exact_multiplier(native, host, self.max_refresh_multiplier)),
        };
        debug!(
            "OutputTiming: {video_system:?} native {native} on {} host {} -> {} x{}",
            if display.reliable { "reliable" } else { "unreliable" },
            display.rate,
            config.rate,
            config.refresh_multiplier
        );
        config
    }

    fn match_host(&self, native: FrameRate, host: FrameRate) -> Option<FrameRateConfig> {
        (1..=self.max_refresh_multiplier.max(1)).find_map(|multiplier| {
            let candidate = host.divided_by(multiplier);
            (relative_diff(candidate, native) <= self.max_host_match_deviation)
                .then(|| FrameRateConfig::new(candidate, multiplier))
        })
    }
}

fn with_exact_multiplier(rate: FrameRate, host: Option<FrameRate>, max: u32) -> FrameRateConfig {
    let multiplier = host.map_or(0, |host| refresh_multiplier(rate, host, max));
    FrameRateConfig::new(rate, multiplier)
}

/// Host frames per `rate` frame when the host refresh is an exact integer
/// multiple of `rate`, else 0.
pub fn refresh_multiplier(rate: FrameRate, host: FrameRate, max: u32) -> u32 {
    (1..=max.max(1))
        .find(|&m| relative_diff(host.divided_by(m), rate) <= EXACT_MULTIPLIER_TOLERANCE)
        .unwrap_or(0)
}

fn relative_diff(a: FrameRate, b: FrameRate) -> f64 {
    (a.nanos() as f64 - b.nanos() as f64).abs() / b.nanos() as f64
}
