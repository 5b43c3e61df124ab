use crate::frame_rate::{FrameRate, VideoSystem};

/// Receives a finished video frame.
pub trait VideoSink {
    /// `pixels` is `width * height` packed `0x00RRGGBB` values.
    fn write_frame(&mut self, width: usize, height: usize, pixels: &[u32]);
}

/// Receives interleaved stereo samples.
pub trait AudioSink {
    /// Returns how many stereo frames were accepted.
    fn write_samples(&mut self, frames: &[[i16; 2]]) -> usize;
}

/// An emulated machine driven one frame at a time by the pacer.
///
/// Implementations must keep emulated state time-accurate regardless of
/// whether sinks are supplied: a frame run with no video sink is a skipped
/// frame, not a dropped one.
pub trait EmuSystem: Send {
    fn run_frame(&mut self, video: Option<&mut dyn VideoSink>, audio: Option<&mut dyn AudioSink>);

    fn video_system(&self) -> VideoSystem {
        VideoSystem::Ntsc
    }

    fn native_frame_rate(&self) -> FrameRate {
        self.video_system().native_frame_rate()
    }

    /// Set while the machine wants to skip ahead (e.g. a disk loader).
    fn should_fast_forward(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "system"
    }
}

impl<S: EmuSystem + ?Sized> EmuSystem for Box<S> {
    fn run_frame(&mut self, video: Option<&mut dyn VideoSink>, audio: Option<&mut dyn AudioSink>) {
        (**self).run_frame(video, audio);
    }

    fn video_system(&self) -> VideoSystem {
        (**self).video_system()
    }

    fn native_frame_rate(&self) -> FrameRate {
        (**self).native_frame_rate()
    }

    fn should_fast_forward(&self) -> bool {
        (**self).should_fast_forward()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Run `frames` frames. Only the last one is rendered; audio is produced for
/// all of them.
pub fn run_frames<S: EmuSystem + ?Sized>(
    system: &mut S,
    video: Option<&mut dyn VideoSink>,
    mut audio: Option<&mut dyn AudioSink>,
    frames: u32,
) {
    if frames == 0 {
        return;
    }
    for _ in 1..frames {
        system.run_frame(None, reborrow_audio(&mut audio));
    }
    system.run_frame(video, audio);
}

fn reborrow_audio<'a>(audio: &'a mut Option<&mut dyn AudioSink>) -> Option<&'a mut dyn AudioSink> {
    match audio {
        Some(sink) => {
            let sink: &'a mut dyn AudioSink = &mut **sink;
            Some(sink)
        }
        None => None,
    }
}
