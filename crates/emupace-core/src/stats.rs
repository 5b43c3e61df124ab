use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Default)]
struct Counters {
    host_callbacks: AtomicU64,
    missed_callbacks: AtomicU64,
    idle_callbacks: AtomicU64,
    blank_frames: AtomicU64,
    advanced_frames: AtomicU64,
    rendered_frames: AtomicU64,
    skipped_frames: AtomicU64,
    fast_forward_frames: AtomicU64,
    stalls: AtomicU64,
    dropped_frames: AtomicU64,
    presents: AtomicU64,
    audio_underruns: AtomicU64,
    last_present_wait_us: AtomicU64,
    max_present_wait_us: AtomicU64,
}

/// Shared frame-timing counters.
///
/// Cloning yields another handle to the same counters, so the host can keep
/// one while the emulation thread records into another.
#[derive(Clone, Default)]
pub struct FrameTimingStats {
    inner: Arc<Counters>,
}

impl FrameTimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_callback(&self) {
        self.inner.host_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// A queued callback was superseded by a newer one before it ran.
    pub fn record_missed_callback(&self) {
        self.inner.missed_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle(&self) {
        self.inner.idle_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blank_frame(&self) {
        self.inner.blank_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// One batch of `advanced` frames, of which one was rendered if `rendered`.
    pub fn record_advance(&self, advanced: u32, rendered: bool, fast_forward: bool) {
        let advanced = u64::from(advanced);
        let rendered = u64::from(rendered);
        self.inner
            .advanced_frames
            .fetch_add(advanced, Ordering::Relaxed);
        self.inner
            .rendered_frames
            .fetch_add(rendered, Ordering::Relaxed);
        self.inner
            .skipped_frames
            .fetch_add(advanced.saturating_sub(rendered), Ordering::Relaxed);
        if fast_forward {
            self.inner
                .fast_forward_frames
                .fetch_add(advanced, Ordering::Relaxed);
        }
    }

    pub fn record_stall(&self, dropped: u32) {
        self.inner.stalls.fetch_add(1, Ordering::Relaxed);
        self.inner
            .dropped_frames
            .fetch_add(u64::from(dropped), Ordering::Relaxed);
    }

    pub fn record_present(&self, waited: Duration) {
        let us = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.inner.presents.fetch_add(1, Ordering::Relaxed);
        self.inner.last_present_wait_us.store(us, Ordering::Relaxed);
        self.inner
            .max_present_wait_us
            .fetch_max(us, Ordering::Relaxed);
    }

    pub fn record_audio_underrun(&self) {
        self.inner.audio_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FrameTimingSnapshot {
        let c = &self.inner;
        FrameTimingSnapshot {
            host_callbacks: c.host_callbacks.load(Ordering::Relaxed),
            missed_callbacks: c.missed_callbacks.load(Ordering::Relaxed),
            idle_callbacks: c.idle_callbacks.load(Ordering::Relaxed),
            blank_frames: c.blank_frames.load(Ordering::Relaxed),
            advanced_frames: c.advanced_frames.load(Ordering::Relaxed),
            rendered_frames: c.rendered_frames.load(Ordering::Relaxed),
            skipped_frames: c.skipped_frames.load(Ordering::Relaxed),
            fast_forward_frames: c.fast_forward_frames.load(Ordering::Relaxed),
            stalls: c.stalls.load(Ordering::Relaxed),
            dropped_frames: c.dropped_frames.load(Ordering::Relaxed),
            presents: c.presents.load(Ordering::Relaxed),
            audio_underruns: c.audio_underruns.load(Ordering::Relaxed),
            last_present_wait: Duration::from_micros(c.last_present_wait_us.load(Ordering::Relaxed)),
            max_present_wait: Duration::from_micros(c.max_present_wait_us.load(Ordering::Relaxed)),
        }
    }

    pub fn reset(&self) {
        let c = &self.inner;
        for counter in [
            &c.host_callbacks,
            &c.missed_callbacks,
            &c.idle_callbacks,
            &c.blank_frames,
            &c.advanced_frames,
            &c.rendered_frames,
            &c.skipped_frames,
            &c.fast_forward_frames,
            &c.stalls,
            &c.dropped_frames,
            &c.presents,
            &c.audio_underruns,
            &c.last_present_wait_us,
            &c.max_present_wait_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for FrameTimingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Point-in-time copy of [`FrameTimingStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTimingSnapshot {
    pub host_callbacks: u64,
    pub missed_callbacks: u64,
    pub idle_callbacks: u64,
    pub blank_frames: u64,
    pub advanced_frames: u64,
    pub rendered_frames: u64,
    pub skipped_frames: u64,
    pub fast_forward_frames: u64,
    pub stalls: u64,
    pub dropped_frames: u64,
    pub presents: u64,
    pub audio_underruns: u64,
    pub last_present_wait: Duration,
    pub max_present_wait: Duration,
}

impl fmt::Display for FrameTimingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "callbacks={} missed={} idle={} blank={} advanced={} rendered={} skipped={} \
             fast-forward={} stalls={} dropped={} presents={} underruns={} \
             present-wait(last/max)={:?}/{:?}",
            self.host_callbacks,
            self.missed_callbacks,
            self.idle_callbacks,
            self.blank_frames,
            self.advanced_frames,
            self.rendered_frames,
            self.skipped_frames,
            self.fast_forward_frames,
            self.stalls,
            self.dropped_frames,
            self.presents,
            self.audio_underruns,
            self.last_present_wait,
            self.max_present_wait,
        )
    }
}
