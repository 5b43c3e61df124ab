//! Frame pacing between an emulated machine and a host display.
//!
//! The host delivers vsync callbacks; this crate decides how many emulated
//! frames each callback is worth, runs them on a dedicated thread through the
//! [`task::EmuSystemTask`] handle, and hands finished frames back for
//! presentation. Frontends live in separate crates.

/// Stereo sample ring between the emulation thread and the audio callback.
pub mod audio_queue;

/// Host refresh-rate detection and bounded calibration runs.
pub mod detector;

/// Platform-reported refresh sanitizing and host windows.
pub mod display;

pub mod error;

/// Frame rates, output configuration and vsync callback parameters.
pub mod frame_rate;

/// Output frame-rate selection per video system.
pub mod output_timing;

/// Per-callback frame advance decisions.
pub mod pacer;

/// Shared timing counters.
pub mod stats;

/// Present handshake tokens and frame capture.
pub mod sync;

/// The [`system::EmuSystem`] trait driven by the pacer.
pub mod system;

/// Emulation thread and its host-side handle.
pub mod task;

/// Emulated clock with fractional carry.
pub mod timing;

pub use error::{PaceError, Result};
pub use frame_rate::{FrameParams, FrameRate, FrameRateConfig, VideoSystem};
pub use stats::{FrameTimingSnapshot, FrameTimingStats};
pub use system::{AudioSink, EmuSystem, VideoSink};
pub use task::{EmuSystemTask, MessageReplyMode, TaskConfig, TaskEvent};
