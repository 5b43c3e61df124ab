use log::{info, warn};

use crate::frame_rate::FrameRate;

/// Lowest refresh rate accepted from the platform.
pub const MIN_SANE_REFRESH_HZ: f64 = 1.0;
/// Highest refresh rate accepted from the platform.
pub const MAX_SANE_REFRESH_HZ: f64 = 700.0;

/// Hardcoded refresh correction for a device known to misreport.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceQuirk {
    /// Matched as a case-insensitive substring of the platform device string.
    pub device: String,
    /// Only apply when the platform reports this value, if set.
    pub reported_hz: Option<f64>,
    pub corrected_hz: f64,
}

impl DeviceQuirk {
    fn matches(&self, device: &str, reported_hz: f64) -> bool {
        if self.device.is_empty() {
            return false;
        }
        let device = device.to_ascii_lowercase();
        if !device.contains(&self.device.to_ascii_lowercase()) {
            return false;
        }
        self.reported_hz
            .is_none_or(|expected| (expected - reported_hz).abs() < 0.01)
    }
}

/// Built-in device corrections.
pub fn default_device_quirks() -> Vec<DeviceQuirk> {
    vec![
        // Motorola Droid ("sholes") claims 60 Hz but scans out at 61.5 Hz.
        DeviceQuirk {
            device: "sholes".into(),
            reported_hz: None,
            corrected_hz: 61.5,
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSource {
    Reported,
    /// The reported value was out of range and replaced by the default.
    Fallback,
    DeviceOverride,
    Detected,
}

/// Host display refresh rate and whether downstream logic may trust it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayRefresh {
    pub rate: FrameRate,
    pub reliable: bool,
    pub source: RefreshSource,
}

impl DisplayRefresh {
    /// Sanitize a platform-reported refresh rate.
    pub fn from_reported(hz: f64) -> Self {
        if !(MIN_SANE_REFRESH_HZ..=MAX_SANE_REFRESH_HZ).contains(&hz) {
            warn!("Display: ignoring bogus refresh rate {hz}Hz, assuming 60Hz");
            return Self::fallback();
        }
        match FrameRate::from_hz(hz) {
            Ok(rate) => Self {
                rate,
                reliable: true,
                source: RefreshSource::Reported,
            },
            Err(_) => Self::fallback(),
        }
    }

    /// Like [`Self::from_reported`], but consults `quirks` for `device` first.
    pub fn from_platform(hz: f64, device: &str, quirks: &[DeviceQuirk]) -> Self {
        if let Some(quirk) = quirks.iter().find(|q| q.matches(device, hz))
            && let Ok(rate) = FrameRate::from_hz(quirk.corrected_hz)
        {
            info!(
                "Display: refresh override for device {device}: {}Hz instead of reported {hz}Hz",
                quirk.corrected_hz
            );
            return Self {
                rate,
                reliable: true,
                source: RefreshSource::DeviceOverride,
            };
        }
        Self::from_reported(hz)
    }

    pub fn detected(rate: FrameRate) -> Self {
        Self {
            rate,
            reliable: true,
            source: RefreshSource::Detected,
        }
    }

    pub fn fallback() -> Self {
        Self {
            rate: FrameRate::DEFAULT_HOST,
            reliable: false,
            source: RefreshSource::Fallback,
        }
    }
}

impl Default for DisplayRefresh {
    fn default() -> Self {
        Self {
            rate: FrameRate::DEFAULT_HOST,
            reliable: true,
            source: RefreshSource::Reported,
        }
    }
}

/// A presentation target. Owned by exactly one thread at a time and handed
/// to the emulation task through [`crate::task::EmuSystemTask::set_window`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostWindow {
    pub id: u32,
    pub refresh: DisplayRefresh,
}

impl HostWindow {
    pub fn new(id: u32, refresh: DisplayRefresh) -> Self {
        Self { id, refresh }
    }
}
