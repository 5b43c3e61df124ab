mod common;

use std::time::Duration;

use emupace_core::detector::{
    CalibrationStatus, DetectorSample, DetectorTolerances, FrameRateCalibration,
    FrameRateDetector,
};

const PERIOD_NS: u64 = 16_666_000;

fn at(ns: u64) -> Duration {
    Duration::from_nanos(ns)
}

#[test]
fn constant_rate_becomes_consistent() {
    common::init_logging();
    let mut detector = FrameRateDetector::default();
    for i in 0..60 {
        detector.add_frame(at(i * PERIOD_NS));
    }
    assert!(detector.has_consistent_rate());
    assert_eq!(
        detector.estimated_frame_duration(),
        Some(Duration::from_nanos(PERIOD_NS))
    );
    assert_eq!(detector.outliers(), 0);
    assert_eq!(detector.accepted_frames(), 59);
}

#[test]
fn needs_full_streak_before_consistent() {
    let mut detector = FrameRateDetector::default();
    // One timestamp primes, the next seeds the estimate, then 30 agreeing
    // means complete the streak.
    for i in 0..31 {
        detector.add_frame(at(i * PERIOD_NS));
    }
    assert!(!detector.has_consistent_rate());
    detector.add_frame(at(31 * PERIOD_NS));
    assert!(detector.has_consistent_rate());
}

#[test]
fn late_vsync_is_discarded() {
    let mut detector = FrameRateDetector::default();
    let mut t = 0;
    for _ in 0..40 {
        detector.add_frame(at(t));
        t += PERIOD_NS;
    }
    let late = t + 5_000_000;
    assert_eq!(detector.add_frame(at(late)), DetectorSample::Outlier);
    t += PERIOD_NS;
    for _ in 0..40 {
        detector.add_frame(at(t));
        t += PERIOD_NS;
    }
    assert!(detector.outliers() >= 1);
    assert!(detector.has_consistent_rate());
    assert_eq!(
        detector.estimated_frame_duration(),
        Some(Duration::from_nanos(PERIOD_NS))
    );
}

#[test]
fn reset_forgets_everything() {
    let mut detector = FrameRateDetector::default();
    for i in 0..60 {
        detector.add_frame(at(i * PERIOD_NS));
    }
    detector.reset();
    assert!(!detector.has_consistent_rate());
    assert_eq!(detector.estimated_frame_duration(), None);
    assert_eq!(detector.add_frame(at(0)), DetectorSample::Primed);
}

#[test]
fn relaxed_tolerance_converges_under_jitter() {
    let tolerances = DetectorTolerances {
        consistency_tolerance_ns: 100,
        ..Default::default()
    };
    let mut detector = FrameRateDetector::new(tolerances);
    let mut t = 0;
    for i in 0..200u64 {
        detector.add_frame(at(t));
        t += if i % 2 == 0 { PERIOD_NS + 1_000 } else { PERIOD_NS - 1_000 };
    }
    assert!(detector.has_consistent_rate());
    let estimate = detector.estimated_frame_duration().unwrap().as_nanos() as u64;
    assert!(estimate.abs_diff(PERIOD_NS) <= 1_000);
}

#[test]
fn calibration_detects_constant_rate() {
    let reported = common::hz(60.0);
    let mut calibration = FrameRateCalibration::new(reported, DetectorTolerances::default());
    let period = 16_260_163;
    let mut status = CalibrationStatus::Calibrating;
    for i in 0..100 {
        status = calibration.add_frame(at(i * period));
        if status.is_finished() {
            break;
        }
    }
    let CalibrationStatus::Detected(rate) = status else {
        panic!("expected detection, got {status:?}");
    };
    assert_eq!(rate.nanos(), period);
    assert_eq!(calibration.samples(), 32);
}

#[test]
fn calibration_gives_up_after_budget() {
    common::init_logging();
    let reported = common::hz(60.0);
    let mut calibration = FrameRateCalibration::new(reported, DetectorTolerances::default());
    // ±100 µs alternating jitter keeps successive means further apart than
    // 16 ns for the whole budget.
    let mut t = 0;
    let mut finished_at = None;
    for i in 0..5_000u64 {
        let status = calibration.add_frame(at(t));
        if status.is_finished() {
            finished_at = Some(i + 1);
            assert_eq!(status, CalibrationStatus::GaveUp { fallback: reported });
            break;
        }
        t += if i % 2 == 0 { PERIOD_NS + 100_000 } else { PERIOD_NS - 100_000 };
    }
    assert_eq!(finished_at, Some(4096));
    assert_eq!(
        calibration.add_frame(at(t)),
        CalibrationStatus::GaveUp { fallback: reported }
    );
}

#[test]
fn hitch_on_first_delta_is_replaced_by_steady_deltas() {
    common::init_logging();
    let reported = common::hz(60.0);
    let mut calibration = FrameRateCalibration::new(reported, DetectorTolerances::default());
    // A 40 ms compositor hitch seeds the estimate, then the display settles.
    let mut timestamps = vec![0, 40_000_000];
    timestamps.extend((1..=200).map(|i| 40_000_000 + i * PERIOD_NS));

    let mut status = CalibrationStatus::Calibrating;
    for &t in &timestamps {
        status = calibration.add_frame(at(t));
        if status.is_finished() {
            break;
        }
    }
    let CalibrationStatus::Detected(rate) = status else {
        panic!("expected detection, got {status:?}");
    };
    assert_eq!(rate.nanos(), PERIOD_NS);
    // Prime, hitch, eight agreeing deltas to reseed, then the 30-mean streak.
    assert_eq!(calibration.samples(), 40);
    assert_eq!(calibration.detector().outliers(), 7);
}

#[test]
fn disagreeing_outliers_never_reseed() {
    let mut detector = FrameRateDetector::default();
    let mut t = 0;
    for _ in 0..40 {
        detector.add_frame(at(t));
        t += PERIOD_NS;
    }
    // Alternating long and short hitches never form an agreeing run.
    for i in 0..20 {
        t += if i % 2 == 0 { 30_000_000 } else { 5_000_000 };
        assert_eq!(detector.add_frame(at(t)), DetectorSample::Outlier);
    }
    assert_eq!(
        detector.estimated_frame_duration(),
        Some(Duration::from_nanos(PERIOD_NS))
    );
    assert_eq!(detector.outliers(), 20);
}
