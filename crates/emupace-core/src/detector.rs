//! Host refresh-rate detection from observed vsync timestamps.
//!
//! Platforms often report a nominal refresh (e.g. "60 Hz") that differs from
//! what the display actually delivers. [`FrameRateDetector`] keeps a running
//! mean of vsync deltas and declares the rate consistent once successive
//! means stop moving. [`FrameRateCalibration`] bounds the run to a sample
//! budget and falls back to the reported rate when it never converges.

use std::time::Duration;

use log::{debug, info, warn};

use crate::frame_rate::FrameRate;

/// Tuning for [`FrameRateDetector`].
///
/// The consistency tolerance (16 ns) is three to four orders of magnitude
/// tighter than the outlier filter (200 µs). With real vsync jitter the
/// running mean only settles that tightly after many samples, so lowering
/// `consistency_tolerance_ns` is the first knob to try when calibration keeps
/// giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DetectorTolerances {
    /// Deltas farther than this from the running mean are discarded.
    pub outlier_tolerance_ns: u64,
    /// Successive means within this distance count toward the streak.
    pub consistency_tolerance_ns: u64,
    /// Streak length needed before the rate is considered consistent.
    pub required_consistent_frames: u32,
    /// Calibration gives up after this many timestamps.
    pub max_samples: u32,
    /// Consecutive outliers that agree with each other replace the estimate.
    pub reseed_after_outliers: u32,
}

impl DetectorTolerances {
    pub fn outlier_tolerance(&self) -> Duration {
        Duration::from_nanos(self.outlier_tolerance_ns)
    }

    pub fn consistency_tolerance(&self) -> Duration {
        Duration::from_nanos(self.consistency_tolerance_ns)
    }
}

impl Default for DetectorTolerances {
    fn default() -> Self {
        Self {
            outlier_tolerance_ns: 200_000,
            consistency_tolerance_ns: 16,
            required_consistent_frames: 30,
            max_samples: 4096,
            reseed_after_outliers: 8,
        }
    }
}

/// What happened to a timestamp passed to [`FrameRateDetector::add_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorSample {
    /// First timestamp; no delta yet.
    Primed,
    Accepted,
    Outlier,
}

#[derive(Debug, Clone, Default)]
pub struct FrameRateDetector {
    tolerances: DetectorTolerances,
    last_timestamp: Option<Duration>,
    total_nanos: u128,
    accepted: u32,
    estimate_nanos: Option<u64>,
    consistent_durations: u32,
    outliers: u32,
    // Run of rejected deltas that agree with one another.
    rejected_run: u32,
    rejected_total: u128,
    last_rejected: Option<u128>,
}

impl FrameRateDetector {
    pub fn new(tolerances: DetectorTolerances) -> Self {
        Self {
            tolerances,
            ..Default::default()
        }
    }

    pub fn tolerances(&self) -> &DetectorTolerances {
        &self.tolerances
    }

    pub fn add_frame(&mut self, timestamp: Duration) -> DetectorSample {
        let Some(last) = self.last_timestamp.replace(timestamp) else {
            return DetectorSample::Primed;
        };
        let Some(delta) = timestamp.checked_sub(last).filter(|d| !d.is_zero()) else {
            self.outliers += 1;
            return DetectorSample::Outlier;
        };
        let delta = delta.as_nanos();

        let Some(prev_estimate) = self.estimate_nanos else {
            self.total_nanos = delta;
            self.accepted = 1;
            self.estimate_nanos = Some(clamp_nanos(delta));
            return DetectorSample::Accepted;
        };

        let tolerance = u128::from(self.tolerances.outlier_tolerance_ns);
        if delta.abs_diff(u128::from(prev_estimate)) > tolerance {
            return self.reject(delta, prev_estimate);
        }
        self.rejected_run = 0;
        self.last_rejected = None;

        self.total_nanos += delta;
        self.accepted += 1;
        let estimate = clamp_nanos(self.total_nanos / u128::from(self.accepted));
        self.estimate_nanos = Some(estimate);

        if estimate.abs_diff(prev_estimate) <= self.tolerances.consistency_tolerance_ns {
            self.consistent_durations = self.consistent_durations.saturating_add(1);
        } else {
            self.consistent_durations = 0;
        }
        DetectorSample::Accepted
    }

    fn reject(&mut self, delta: u128, estimate: u64) -> DetectorSample {
        let tolerance = u128::from(self.tolerances.outlier_tolerance_ns);
        match self.last_rejected {
            Some(prev) if prev.abs_diff(delta) <= tolerance => {
                self.rejected_run += 1;
                self.rejected_total += delta;
            }
            _ => {
                self.rejected_run = 1;
                self.rejected_total = delta;
            }
        }
        self.last_rejected = Some(delta);

        let reseed_after = self.tolerances.reseed_after_outliers;
        if reseed_after > 0 && self.rejected_run >= reseed_after {
            // The estimate itself was the outlier; restart from the run.
            let estimate_nanos = clamp_nanos(self.rejected_total / u128::from(self.rejected_run));
            debug!(
                "FrameRateDetector: {} deltas disagree with {estimate}ns, reseeding at {estimate_nanos}ns",
                self.rejected_run
            );
            self.total_nanos = self.rejected_total;
            self.accepted = self.rejected_run;
            self.estimate_nanos = Some(estimate_nanos);
            self.consistent_durations = 0;
            self.rejected_run = 0;
            self.last_rejected = None;
            return DetectorSample::Accepted;
        }

        self.outliers += 1;
        debug!("FrameRateDetector: discarding outlier delta {delta}ns (estimate {estimate}ns)");
        DetectorSample::Outlier
    }

    /// Running mean of accepted deltas, `None` before the first delta.
    pub fn estimated_frame_duration(&self) -> Option<Duration> {
        self.estimate_nanos.map(Duration::from_nanos)
    }

    pub fn estimated_frame_rate(&self) -> Option<FrameRate> {
        self.estimate_nanos
            .and_then(|n| FrameRate::from_duration(Duration::from_nanos(n)).ok())
    }

    pub fn has_consistent_rate(&self) -> bool {
        self.consistent_durations >= self.tolerances.required_consistent_frames
    }

    pub fn consistent_durations(&self) -> u32 {
        self.consistent_durations
    }

    pub fn accepted_frames(&self) -> u32 {
        self.accepted
    }

    pub fn outliers(&self) -> u32 {
        self.outliers
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.tolerances);
    }
}

fn clamp_nanos(nanos: u128) -> u64 {
    u64::try_from(nanos).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStatus {
    Calibrating,
    Detected(FrameRate),
    /// Sample budget exhausted; use the platform-reported rate.
    GaveUp { fallback: FrameRate },
}

impl CalibrationStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Calibrating)
    }
}

/// Bounded detection run used to replace an untrusted reported refresh rate.
#[derive(Debug, Clone)]
pub struct FrameRateCalibration {
    detector: FrameRateDetector,
    reported: FrameRate,
    samples: u32,
    status: CalibrationStatus,
}

impl FrameRateCalibration {
    pub fn new(reported: FrameRate, tolerances: DetectorTolerances) -> Self {
        Self {
            detector: FrameRateDetector::new(tolerances),
            reported,
            samples: 0,
            status: CalibrationStatus::Calibrating,
        }
    }

    pub fn add_frame(&mut self, timestamp: Duration) -> CalibrationStatus {
        if self.status.is_finished() {
            return self.status;
        }
        self.samples += 1;
        self.detector.add_frame(timestamp);

        if self.detector.has_consistent_rate()
            && let Some(rate) = self.detector.estimated_frame_rate()
        {
            info!(
                "FrameRateDetector: detected {rate} after {} samples (reported {})",
                self.samples, self.reported
            );
            self.status = CalibrationStatus::Detected(rate);
        } else if self.samples >= self.detector.tolerances().max_samples {
            warn!(
                "FrameRateDetector: no consistent rate after {} samples, keeping reported {}",
                self.samples, self.reported
            );
            self.status = CalibrationStatus::GaveUp {
                fallback: self.reported,
            };
        }
        self.status
    }

    pub fn status(&self) -> CalibrationStatus {
        self.status
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn detector(&self) -> &FrameRateDetector {
        &self.detector
    }
}
