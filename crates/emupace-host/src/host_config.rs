use emupace_core::VideoSystem;
use emupace_core::detector::DetectorTolerances;
use emupace_core::display::{DeviceQuirk, default_device_quirks};
use emupace_core::output_timing::OutputTimingManager;
use emupace_core::pacer::PacingTolerances;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Refresh rate the simulated platform reports.
    pub refresh_hz: f64,
    /// Platform device string, matched against `device_quirks`.
    pub device: String,
    /// Refresh the simulated panel really scans out at, if different from
    /// `refresh_hz`.
    pub actual_refresh_hz: Option<f64>,
    pub jitter_us: u64,
    /// Inject a stall every this many vsyncs (0 = never).
    pub stall_every: u32,
    pub stall_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_hz: 60.0,
            device: String::new(),
            actual_refresh_hz: None,
            jitter_us: 0,
            stall_every: 0,
            stall_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Capacity of the sample ring, in stereo frames.
    pub buffer_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_frames: 4_096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub video_system: VideoSystem,
    pub blank_frame_insertion: bool,
    pub speed_multiplier: f64,
    pub detect_refresh: bool,
    pub display: DisplayConfig,
    pub audio: AudioConfig,
    pub output_timing: OutputTimingManager,
    pub pacing: PacingTolerances,
    pub detector: DetectorTolerances,
    pub device_quirks: Vec<DeviceQuirk>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            video_system: VideoSystem::Ntsc,
            blank_frame_insertion: false,
            speed_multiplier: 1.0,
            detect_refresh: false,
            display: DisplayConfig::default(),
            audio: AudioConfig::default(),
            output_timing: OutputTimingManager::default(),
            pacing: PacingTolerances::default(),
            detector: DetectorTolerances::default(),
            device_quirks: default_device_quirks(),
        }
    }
}

pub fn default_host_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("emupace").join("host.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("emupace").join("host.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("emupace")
            .join("host.toml");
    }

    PathBuf::from("host.toml")
}

pub fn load_from_file(path: &Path) -> HostConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return HostConfig::default(),
    };

    match toml::from_str::<HostConfig>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse host config {}: {e}; using defaults",
                path.display()
            );
            HostConfig::default()
        }
    }
}

pub fn save_to_file(path: &Path, cfg: &HostConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let text = toml::to_string_pretty(cfg).map_err(std::io::Error::other)?;
    std::fs::write(path, text)
}
