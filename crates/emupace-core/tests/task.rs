mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{CountingSystem, SystemCounters, hz, vsync, window};
use crossbeam_channel::Receiver;
use emupace_core::detector::DetectorTolerances;
use emupace_core::display::RefreshSource;
use emupace_core::sync::PendingPresent;
use emupace_core::{
    EmuSystemTask, FrameParams, FrameRate, FrameRateConfig, FrameTimingStats, MessageReplyMode,
    PaceError, TaskConfig, TaskEvent, VideoSystem,
};
use std::sync::Arc;

const TIMEOUT: Duration = Duration::from_secs(5);
const HOST_60: Duration = Duration::from_nanos(16_666_667);

struct Harness {
    task: EmuSystemTask,
    events: Receiver<TaskEvent>,
    counters: Arc<SystemCounters>,
    stats: FrameTimingStats,
}

fn start(video_system: VideoSystem, config: TaskConfig) -> Harness {
    common::init_logging();
    let (system, counters) = CountingSystem::new(video_system);
    let stats = FrameTimingStats::new();
    let (task, events) =
        EmuSystemTask::start(Box::new(system), None, config, stats.clone()).unwrap();
    Harness {
        task,
        events,
        counters,
        stats,
    }
}

fn start_on_60hz() -> Harness {
    start(
        VideoSystem::Ntsc,
        TaskConfig {
            window: Some(window(1, 60.0)),
            ..Default::default()
        },
    )
}

/// Wait for the next present, collecting any other events on the way.
fn next_present(events: &Receiver<TaskEvent>, others: &mut Vec<TaskEvent>) -> PendingPresent {
    loop {
        match events.recv_timeout(TIMEOUT).expect("no present from task") {
            TaskEvent::Present(present) => return present,
            other => others.push(other),
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn task_waits_for_each_present() {
    let mut h = start_on_60hz();
    let mut others = Vec::new();

    h.task.frame_update(vsync(1, HOST_60)).unwrap();
    let first = next_present(&h.events, &mut others);
    assert_eq!(first.frame().unwrap().pixels[0], 1);
    assert!(h.task.is_waiting_for_present());

    h.task.frame_update(vsync(2, HOST_60)).unwrap();
    h.task.frame_update(vsync(3, HOST_60)).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.counters.frames(), 1);

    first.present();
    let second = next_present(&h.events, &mut others);
    // The two queued vsyncs were merged into one two-frame batch.
    assert_eq!(h.counters.frames(), 3);
    assert_eq!(h.counters.rendered(), 2);
    assert_eq!(second.frame().unwrap().pixels[0], 3);
    second.present();

    let snapshot = h.stats.snapshot();
    assert_eq!(snapshot.missed_callbacks, 1);
    wait_until(|| h.stats.snapshot().presents == 2);
    assert!(others.is_empty());
    h.task.stop().unwrap();
}

#[test]
fn paused_task_ignores_vsyncs_and_restarts_on_resume() {
    let mut h = start_on_60hz();
    let mut others = Vec::new();

    h.task.frame_update(vsync(1, HOST_60)).unwrap();
    next_present(&h.events, &mut others).present();

    h.task.pause(MessageReplyMode::Wait).unwrap();
    h.task.frame_update(vsync(2, HOST_60)).unwrap();
    h.task.frame_update(vsync(3, HOST_60)).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(h.events.try_recv().is_err());
    assert_eq!(h.counters.frames(), 1);

    h.task.resume(MessageReplyMode::Wait).unwrap();
    let long_after = FrameParams::new(Duration::from_secs(10), HOST_60 * 3, HOST_60);
    h.task.frame_update(long_after).unwrap();
    next_present(&h.events, &mut others).present();
    assert_eq!(h.counters.frames(), 2);
    assert_eq!(h.stats.snapshot().stalls, 0);
    h.task.stop().unwrap();
}

#[test]
fn control_calls_do_not_wait_behind_a_pending_present() {
    let mut h = start_on_60hz();
    let mut others = Vec::new();

    h.task.frame_update(vsync(1, HOST_60)).unwrap();
    let held = next_present(&h.events, &mut others);

    // Same thread still holds the token; these must not deadlock.
    h.task.pause(MessageReplyMode::Wait).unwrap();
    h.task.resume(MessageReplyMode::Wait).unwrap();
    held.present();

    h.task.frame_update(vsync(2, HOST_60)).unwrap();
    let next = next_present(&h.events, &mut others);
    assert_eq!(h.counters.frames(), 2);
    next.present();
    wait_until(|| h.stats.snapshot().presents == 1);
    h.task.stop().unwrap();
}

#[test]
fn set_window_moves_ownership_and_retimes() {
    let mut h = start_on_60hz();

    let previous = h.task.set_window(Some(window(2, 120.0))).unwrap();
    assert_eq!(previous.map(|w| w.id), Some(1));
    match h.events.recv_timeout(TIMEOUT).unwrap() {
        TaskEvent::FrameRateChanged(config) => {
            assert_eq!(config, FrameRateConfig::new(hz(120.0).divided_by(2), 2));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let previous = h.task.set_window(None).unwrap();
    assert_eq!(previous.map(|w| w.id), Some(2));
    match h.events.recv_timeout(TIMEOUT).unwrap() {
        TaskEvent::FrameRateChanged(config) => {
            assert_eq!(config, FrameRateConfig::unsynced(FrameRate::NTSC));
        }
        other => panic!("unexpected event {other:?}"),
    }
    h.task.stop().unwrap();
}

#[test]
fn forced_config_with_blank_frames_alternates() {
    let mut h = start_on_60hz();
    let mut others = Vec::new();
    h.task
        .set_frame_rate_config(FrameRateConfig::new(hz(60.0).divided_by(2), 2))
        .unwrap();
    h.task.set_blank_frame_insertion(true).unwrap();

    let mut blanks = Vec::new();
    for n in 1..=10 {
        h.task.frame_update(vsync(n, HOST_60)).unwrap();
        let present = next_present(&h.events, &mut others);
        blanks.push(present.is_blank());
        present.present();
    }
    assert_eq!(blanks, [true, false].repeat(5));
    assert_eq!(h.counters.frames(), 5);
    assert!(matches!(others[..], [TaskEvent::FrameRateChanged(_)]));
    h.task.stop().unwrap();
}

#[test]
fn speed_multiplier_runs_extra_frames() {
    let mut h = start_on_60hz();
    let mut others = Vec::new();
    h.task.set_speed_multiplier(2.0).unwrap();

    for n in 1..=30 {
        h.task.frame_update(vsync(n, HOST_60)).unwrap();
        next_present(&h.events, &mut others).present();
    }
    assert!(h.counters.frames().abs_diff(1 + 29 * 2) <= 1);
    h.task.stop().unwrap();
}

#[test]
fn detection_replaces_reported_refresh() {
    let mut h = start(
        VideoSystem::Ntsc,
        TaskConfig {
            window: Some(window(1, 60.0)),
            blank_frame_insertion: true,
            ..Default::default()
        },
    );
    let mut others = Vec::new();
    let period = Duration::from_nanos(16_260_163);

    h.task.detect_frame_rate().unwrap();
    for n in 1..=40 {
        h.task.frame_update(vsync(n, period)).unwrap();
        next_present(&h.events, &mut others).present();
    }

    let detected = others.iter().find_map(|event| match event {
        TaskEvent::FrameRateDetected(rate) => Some(*rate),
        _ => None,
    });
    assert_eq!(detected.map(FrameRate::nanos), Some(16_260_163));
    assert!(others.iter().any(|event| matches!(
        event,
        TaskEvent::FrameRateChanged(config) if *config == FrameRateConfig::unsynced(FrameRate::NTSC)
    )));

    let window = h.task.set_window(None).unwrap().unwrap();
    assert_eq!(window.refresh.source, RefreshSource::Detected);
    assert_eq!(window.refresh.rate.nanos(), 16_260_163);
    h.task.stop().unwrap();
}

#[test]
fn detection_gives_up_with_reported_rate() {
    let mut h = start(
        VideoSystem::Ntsc,
        TaskConfig {
            window: Some(window(1, 60.0)),
            detector: DetectorTolerances {
                max_samples: 40,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    let mut others = Vec::new();

    h.task.detect_frame_rate().unwrap();
    let mut time = HOST_60;
    let mut last = Duration::ZERO;
    for n in 0..40 {
        h.task
            .frame_update(FrameParams::new(time, last, HOST_60))
            .unwrap();
        next_present(&h.events, &mut others).present();
        last = time;
        time += if n % 2 == 0 {
            HOST_60 + Duration::from_micros(100)
        } else {
            HOST_60 - Duration::from_micros(100)
        };
    }
    assert!(matches!(
        others[..],
        [TaskEvent::FrameRateDetectionFailed { fallback }] if fallback == hz(60.0)
    ));
    h.task.stop().unwrap();
}

#[test]
fn stop_releases_a_held_present() {
    let mut h = start_on_60hz();
    let mut others = Vec::new();

    h.task.frame_update(vsync(1, HOST_60)).unwrap();
    let held = next_present(&h.events, &mut others);
    let system = h.task.stop().unwrap();
    assert_eq!(system.name(), "counting");
    held.present();

    assert!(!h.task.is_running());
    assert!(matches!(
        h.task.frame_update(vsync(2, HOST_60)),
        Err(PaceError::TaskStopped)
    ));
    assert!(matches!(h.task.stop(), Err(PaceError::TaskStopped)));
}

#[test]
fn dropped_event_receiver_does_not_hang_the_task() {
    let mut h = start_on_60hz();
    drop(h.events);

    for n in 1..=5 {
        h.task.frame_update(vsync(n, HOST_60)).unwrap();
    }
    wait_until(|| h.stats.snapshot().host_callbacks >= 1 && !h.task.is_waiting_for_present());
    h.task.stop().unwrap();
    assert!(h.counters.frames() >= 1);
}
