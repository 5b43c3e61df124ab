//! Present handshake between the emulation thread and the renderer.
//!
//! Every frame handed to the renderer travels as a [`PendingPresent`]. The
//! renderer confirms it with [`PendingPresent::present`]; a token that is
//! dropped instead confirms itself, so the emulation thread always hears back
//! exactly once per frame.

use crossbeam_channel as cb;
use log::trace;

use crate::system::VideoSink;

/// A rendered emulator frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VideoFrame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u32>,
}

/// [`VideoSink`] that keeps the most recent frame, reusing its buffer.
#[derive(Debug, Default)]
pub struct FrameCapture {
    frame: Option<VideoFrame>,
    spare: Vec<u32>,
}

impl FrameCapture {
    pub fn take(&mut self) -> Option<VideoFrame> {
        self.frame.take()
    }

    pub fn has_frame(&self) -> bool {
        self.frame.is_some()
    }

    /// Hand back a presented frame's buffer for reuse.
    pub fn recycle(&mut self, frame: VideoFrame) {
        self.spare = frame.pixels;
    }
}

impl VideoSink for FrameCapture {
    fn write_frame(&mut self, width: usize, height: usize, pixels: &[u32]) {
        let frame = self.frame.get_or_insert_with(|| VideoFrame {
            pixels: std::mem::take(&mut self.spare),
            ..Default::default()
        });
        frame.width = width;
        frame.height = height;
        frame.pixels.clear();
        frame.pixels.extend_from_slice(pixels);
    }
}

/// Receiving end of the present confirmations, owned by the emulation thread.
#[derive(Debug)]
pub struct PresentPort {
    tx: cb::Sender<u64>,
    rx: cb::Receiver<u64>,
    sequence: u64,
}

impl Default for PresentPort {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentPort {
    pub fn new() -> Self {
        let (tx, rx) = cb::unbounded();
        Self { tx, rx, sequence: 0 }
    }

    /// Issue the token for the next frame.
    pub fn issue(&mut self, frame: Option<VideoFrame>) -> PendingPresent {
        self.sequence += 1;
        PendingPresent {
            sequence: self.sequence,
            frame,
            confirm: self.tx.clone(),
            confirmed: false,
        }
    }

    /// Sequence number of the most recently issued token.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn receiver(&self) -> &cb::Receiver<u64> {
        &self.rx
    }

    /// Whether `sequence` confirms the outstanding token. Older confirmations
    /// belong to abandoned waits and are ignored.
    pub fn is_current(&self, sequence: u64) -> bool {
        sequence == self.sequence
    }

    /// Block until the outstanding token is confirmed.
    pub fn wait_current(&self) {
        while let Ok(sequence) = self.rx.recv() {
            if self.is_current(sequence) {
                return;
            }
        }
    }
}

/// A frame handed to the renderer.
#[derive(Debug)]
pub struct PendingPresent {
    sequence: u64,
    frame: Option<VideoFrame>,
    confirm: cb::Sender<u64>,
    confirmed: bool,
}

impl PendingPresent {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// A blank frame repeats whatever is already on screen.
    pub fn is_blank(&self) -> bool {
        self.frame.is_none()
    }

    pub fn frame(&self) -> Option<&VideoFrame> {
        self.frame.as_ref()
    }

    pub fn take_frame(&mut self) -> Option<VideoFrame> {
        self.frame.take()
    }

    /// Confirm the frame reached the screen.
    pub fn present(mut self) {
        self.confirmed = true;
        let _ = self.confirm.send(self.sequence);
    }
}

impl Drop for PendingPresent {
    fn drop(&mut self) {
        if !self.confirmed {
            trace!("Present: frame {} dropped unpresented", self.sequence);
            let _ = self.confirm.send(self.sequence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn dropped_token_still_confirms() {
        let mut port = PresentPort::new();
        let token = port.issue(None);
        thread::spawn(move || drop(token)).join().unwrap();
        assert_eq!(port.receiver().try_recv(), Ok(1));
    }

    #[test]
    fn present_confirms_exactly_once() {
        let mut port = PresentPort::new();
        port.issue(None).present();
        assert_eq!(port.receiver().try_recv(), Ok(1));
        assert!(port.receiver().try_recv().is_err());
    }

    #[test]
    fn stale_confirmations_are_skipped() {
        let mut port = PresentPort::new();
        let stale = port.issue(None);
        let current = port.issue(None);
        assert!(!port.is_current(stale.sequence()));
        drop(stale);
        current.present();
        port.wait_current();
        assert!(port.receiver().is_empty());
    }

    #[test]
    fn capture_reuses_recycled_buffer() {
        let mut capture = FrameCapture::default();
        capture.write_frame(2, 1, &[1, 2]);
        let frame = capture.take().unwrap();
        let ptr = frame.pixels.as_ptr();
        capture.recycle(frame);
        capture.write_frame(2, 1, &[3, 4]);
        let frame = capture.take().unwrap();
        assert_eq!(frame.pixels, vec![3, 4]);
        assert_eq!(frame.pixels.as_ptr(), ptr);
    }
}
