use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::stats::FrameTimingStats;
use crate::system::AudioSink;

/// Single-producer / single-consumer ring of stereo i16 frames.
///
/// The emulation thread writes through [`SampleProducer`] (which is the
/// pacer's [`AudioSink`]); the host audio callback drains through
/// [`SampleConsumer`]. Pushing into a full ring drops the newest frames.
///
/// Both halves need `&mut self` to move samples, so a shared reference can
/// never act as a second producer:
///
/// ```compile_fail
/// use emupace_core::FrameTimingStats;
/// use emupace_core::audio_queue::sample_ring;
///
/// let (producer, _consumer) = sample_ring(4, FrameTimingStats::new());
/// let shared = &producer;
/// shared.push_stereo(1, 1);
/// ```
pub struct SampleProducer {
    inner: Arc<Ring>,
}

pub struct SampleConsumer {
    inner: Arc<Ring>,
    stats: FrameTimingStats,
}

struct Ring {
    // One spare slot so head == tail always means empty.
    buf: Box<[UnsafeCell<MaybeUninit<[i16; 2]>>]>,
    cap: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// The producer only writes `buf[head]` and the consumer only reads
// `buf[tail]`; ownership of a slot moves through the release/acquire pair
// on `head`/`tail`. Writes and reads go through `&mut` handles, so each side
// has exactly one thread touching its index at a time.
unsafe impl Sync for Ring {}

impl Ring {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            head - tail
        } else {
            self.cap - tail + head
        }
    }

    #[inline]
    fn next_index(&self, idx: usize) -> usize {
        let next = idx + 1;
        if next == self.cap { 0 } else { next }
    }
}

/// Create a ring holding up to `capacity_frames` stereo frames. Underruns
/// seen by the consumer are counted in `stats`.
pub fn sample_ring(
    capacity_frames: usize,
    stats: FrameTimingStats,
) -> (SampleProducer, SampleConsumer) {
    let cap = capacity_frames.saturating_add(1).max(2);
    let buf = (0..cap)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let inner = Arc::new(Ring {
        buf,
        cap,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });
    (
        SampleProducer {
            inner: Arc::clone(&inner),
        },
        SampleConsumer { inner, stats },
    )
}

impl SampleProducer {
    #[inline]
    pub fn push_stereo(&mut self, left: i16, right: i16) -> bool {
        let head = self.inner.head.load(Ordering::Relaxed);
        let next = self.inner.next_index(head);
        if next == self.inner.tail.load(Ordering::Acquire) {
            return false;
        }
        unsafe {
            (*self.inner.buf[head].get()).write([left, right]);
        }
        self.inner.head.store(next, Ordering::Release);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity_frames(&self) -> usize {
        self.inner.cap - 1
    }
}

impl AudioSink for SampleProducer {
    fn write_samples(&mut self, frames: &[[i16; 2]]) -> usize {
        frames
            .iter()
            .take_while(|[l, r]| self.push_stereo(*l, *r))
            .count()
    }
}

impl SampleConsumer {
    #[inline]
    pub fn pop_stereo(&mut self) -> Option<(i16, i16)> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        if tail == self.inner.head.load(Ordering::Acquire) {
            return None;
        }
        let [l, r] = unsafe { (*self.inner.buf[tail].get()).assume_init_read() };
        self.inner
            .tail
            .store(self.inner.next_index(tail), Ordering::Release);
        Some((l, r))
    }

    /// Fill an interleaved output buffer of `channels` channels. Missing
    /// samples become silence and count as one underrun per call.
    pub fn fill_interleaved(&mut self, out: &mut [i16], channels: usize) -> usize {
        let channels = channels.max(1);
        let mut written = 0;
        let mut starved = false;
        for frame in out.chunks_mut(channels) {
            let (left, right) = match self.pop_stereo() {
                Some(sample) => {
                    written += 1;
                    sample
                }
                None => {
                    starved = true;
                    (0, 0)
                }
            };
            frame[0] = left;
            if let Some(second) = frame.get_mut(1) {
                *second = right;
            }
            for extra in frame.iter_mut().skip(2) {
                *extra = 0;
            }
        }
        if starved {
            self.stats.record_audio_underrun();
        }
        written
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
