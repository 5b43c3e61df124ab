use std::fmt;
use std::time::Duration;

use crate::error::{PaceError, Result};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// A frame rate stored as its canonical per-frame duration.
///
/// Equality and ordering compare durations, so a *higher* rate orders as
/// *smaller*.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "f64", into = "f64"))]
pub struct FrameRate {
    nanos: u64,
}

impl FrameRate {
    /// NTSC consoles (60.0988 Hz).
    pub const NTSC: FrameRate = FrameRate { nanos: 16_639_267 };
    /// PAL consoles (50 Hz).
    pub const PAL: FrameRate = FrameRate { nanos: 20_000_000 };
    /// Fallback host refresh when the platform reports nonsense.
    pub const DEFAULT_HOST: FrameRate = FrameRate { nanos: 16_666_667 };

    pub fn from_hz(hz: f64) -> Result<Self> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(PaceError::InvalidFrameRate(format!("{hz} Hz")));
        }
        let nanos = (NANOS_PER_SEC / hz).round();
        if nanos < 1.0 || nanos > u64::MAX as f64 {
            return Err(PaceError::InvalidFrameRate(format!("{hz} Hz")));
        }
        Ok(Self {
            nanos: nanos as u64,
        })
    }

    pub fn from_duration(duration: Duration) -> Result<Self> {
        let nanos = u64::try_from(duration.as_nanos())
            .map_err(|_| PaceError::InvalidFrameRate(format!("{duration:?}")))?;
        if nanos == 0 {
            return Err(PaceError::InvalidFrameRate("zero duration".into()));
        }
        Ok(Self { nanos })
    }

    #[inline]
    pub fn duration(self) -> Duration {
        Duration::from_nanos(self.nanos)
    }

    #[inline]
    pub fn nanos(self) -> u64 {
        self.nanos
    }

    #[inline]
    pub fn hz(self) -> f64 {
        NANOS_PER_SEC / self.nanos as f64
    }

    /// Rate whose frames are `factor` times longer, e.g. `60 Hz / 2 = 30 Hz`.
    pub fn divided_by(self, factor: u32) -> Self {
        Self {
            nanos: self.nanos.saturating_mul(u64::from(factor.max(1))),
        }
    }
}

impl fmt::Debug for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameRate({:.4} Hz, {} ns)", self.hz(), self.nanos)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}Hz", self.hz())
    }
}

impl TryFrom<f64> for FrameRate {
    type Error = PaceError;

    fn try_from(hz: f64) -> Result<Self> {
        Self::from_hz(hz)
    }
}

impl From<FrameRate> for f64 {
    fn from(rate: FrameRate) -> f64 {
        rate.hz()
    }
}

/// Output rate the coordinator targets, plus its relation to the host refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRateConfig {
    pub rate: FrameRate,
    /// 0 when the host refresh has no exact integer relation to `rate`,
    /// otherwise the number of host frames per emulated frame.
    pub refresh_multiplier: u32,
}

impl FrameRateConfig {
    pub fn new(rate: FrameRate, refresh_multiplier: u32) -> Self {
        Self {
            rate,
            refresh_multiplier,
        }
    }

    pub fn unsynced(rate: FrameRate) -> Self {
        Self::new(rate, 0)
    }

    pub fn is_synced_to_host(&self) -> bool {
        self.refresh_multiplier > 0
    }
}

impl Default for FrameRateConfig {
    fn default() -> Self {
        Self::new(FrameRate::DEFAULT_HOST, 1)
    }
}

/// Host vsync callback parameters. Timestamps are offsets from the host
/// clock origin; a zero `last_time` marks the first callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParams {
    pub time: Duration,
    pub last_time: Duration,
    pub host_frame_time: Duration,
}

impl FrameParams {
    pub fn new(time: Duration, last_time: Duration, host_frame_time: Duration) -> Self {
        Self {
            time,
            last_time,
            host_frame_time,
        }
    }

    #[inline]
    pub fn is_first(&self) -> bool {
        self.last_time.is_zero()
    }

    #[inline]
    pub fn delta(&self) -> Duration {
        if self.is_first() {
            Duration::ZERO
        } else {
            self.time.saturating_sub(self.last_time)
        }
    }

    /// Host frames elapsed since the previous callback, rounded to the
    /// nearest frame and never less than one.
    pub fn elapsed_frames(&self) -> u32 {
        let frame_time = self.host_frame_time.as_nanos();
        if self.is_first() || frame_time == 0 {
            return 1;
        }
        let frames = (self.delta().as_nanos() + frame_time / 2) / frame_time;
        u32::try_from(frames).unwrap_or(u32::MAX).max(1)
    }

    /// Merge with a superseded earlier callback so its elapsed time still
    /// counts.
    pub fn coalesce(self, older: FrameParams) -> FrameParams {
        FrameParams {
            last_time: older.last_time,
            ..self
        }
    }

    /// Expected present time after `advanced` host frames.
    pub fn present_time(&self, advanced: u32) -> Duration {
        self.time + self.host_frame_time * advanced.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum VideoSystem {
    #[default]
    Ntsc,
    Pal,
}

impl VideoSystem {
    pub fn native_frame_rate(self) -> FrameRate {
        match self {
            Self::Ntsc => FrameRate::NTSC,
            Self::Pal => FrameRate::PAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn rejects_bogus_rates() {
        assert!(FrameRate::from_hz(0.0).is_err());
        assert!(FrameRate::from_hz(-5.0).is_err());
        assert!(FrameRate::from_hz(f64::NAN).is_err());
        assert!(FrameRate::from_duration(Duration::ZERO).is_err());
    }

    #[test]
    fn ordering_is_by_duration() {
        let sixty = FrameRate::from_hz(60.0).unwrap();
        let fifty = FrameRate::from_hz(50.0).unwrap();
        assert!(sixty < fifty);
        assert_eq!(sixty, FrameRate::DEFAULT_HOST);
        assert_eq!(fifty, FrameRate::PAL);
    }

    #[test]
    fn elapsed_frames_rounds_and_clamps() {
        let ft = Duration::from_nanos(16_666_667);
        assert_eq!(FrameParams::new(ms(100), Duration::ZERO, ft).elapsed_frames(), 1);
        assert_eq!(FrameParams::new(ms(117), ms(100), ft).elapsed_frames(), 1);
        assert_eq!(FrameParams::new(ms(133), ms(100), ft).elapsed_frames(), 2);
        assert_eq!(FrameParams::new(ms(101), ms(100), ft).elapsed_frames(), 1);
    }

    #[test]
    fn coalesce_keeps_older_start() {
        let ft = ms(16);
        let older = FrameParams::new(ms(32), ms(16), ft);
        let newer = FrameParams::new(ms(48), ms(32), ft);
        let merged = newer.coalesce(older);
        assert_eq!(merged.last_time, ms(16));
        assert_eq!(merged.time, ms(48));
        assert_eq!(merged.elapsed_frames(), 2);
    }
}
