use std::thread;
use std::time::{Duration, Instant};

use emupace_core::{FrameParams, FrameRate};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::host_config::DisplayConfig;

/// Produces host vsync callbacks, either on a virtual clock or paced
/// against the wall clock.
pub struct VsyncSource {
    /// Period the platform claims.
    reported: Duration,
    /// Period the panel actually delivers.
    actual: Duration,
    jitter_ns: i64,
    stall_every: u32,
    stall: Duration,
    wall_clock: bool,
    origin: Instant,
    ideal: Duration,
    last: Duration,
    count: u64,
    rng: StdRng,
}

impl VsyncSource {
    pub fn new(display: &DisplayConfig, reported: FrameRate, wall_clock: bool, seed: u64) -> Self {
        let actual = display
            .actual_refresh_hz
            .and_then(|hz| FrameRate::from_hz(hz).ok())
            .unwrap_or(reported);
        Self {
            reported: reported.duration(),
            actual: actual.duration(),
            jitter_ns: i64::try_from(display.jitter_us.saturating_mul(1_000)).unwrap_or(i64::MAX),
            stall_every: display.stall_every,
            stall: Duration::from_millis(display.stall_ms),
            wall_clock,
            origin: Instant::now(),
            ideal: Duration::ZERO,
            last: Duration::ZERO,
            count: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Period passed to the task as the host frame time.
    pub fn reported_period(&self) -> Duration {
        self.reported
    }

    /// Block until the next vsync (wall-clock mode) and return its callback
    /// parameters.
    pub fn next_vsync(&mut self) -> FrameParams {
        self.count += 1;
        self.ideal += self.actual;
        if self.stall_every > 0 && self.count % u64::from(self.stall_every) == 0 {
            debug!("Vsync: injecting {:?} stall at vsync {}", self.stall, self.count);
            self.ideal += self.stall;
        }

        let mut time = self.ideal;
        if self.jitter_ns > 0 {
            let offset = self.rng.random_range(-self.jitter_ns..=self.jitter_ns);
            time = offset_by(time, offset);
        }
        // Timestamps never run backwards, and zero is reserved for "no
        // previous callback".
        time = time.max(self.last + Duration::from_nanos(1));

        if self.wall_clock {
            let now = self.origin.elapsed();
            if time > now {
                thread::sleep(time - now);
            }
        }

        let params = FrameParams::new(time, self.last, self.reported);
        self.last = time;
        params
    }
}

fn offset_by(time: Duration, offset_ns: i64) -> Duration {
    let magnitude = Duration::from_nanos(offset_ns.unsigned_abs());
    if offset_ns < 0 {
        time.saturating_sub(magnitude)
    } else {
        time + magnitude
    }
}
