use emupace_core::{AudioSink, EmuSystem, VideoSink, VideoSystem};

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 6_000.0;

/// Scrolling color bars with a steady tone.
///
/// Stands in for a real emulator core: each frame takes the same emulated
/// time and produces exactly one frame's worth of audio, so pacing problems
/// show up as skipped or repeated frames and as ring underruns.
pub struct TestPatternSystem {
    video_system: VideoSystem,
    frame: u64,
    pixels: Vec<u32>,
    samples_per_frame: f64,
    sample_carry: f64,
    phase: f64,
    phase_step: f64,
    audio_buf: Vec<[i16; 2]>,
    loader_frames: u64,
}

impl TestPatternSystem {
    pub fn new(video_system: VideoSystem, sample_rate: u32) -> Self {
        let frame_hz = video_system.native_frame_rate().hz();
        Self {
            video_system,
            frame: 0,
            pixels: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            samples_per_frame: f64::from(sample_rate) / frame_hz,
            sample_carry: 0.0,
            phase: 0.0,
            phase_step: std::f64::consts::TAU * TONE_HZ / f64::from(sample_rate),
            audio_buf: Vec::new(),
            loader_frames: 0,
        }
    }

    /// Ask to fast-forward through the first `frames` frames, like a slow
    /// tape or disk loader.
    pub fn with_loader(mut self, frames: u64) -> Self {
        self.loader_frames = frames;
        self
    }

    fn draw(&mut self) {
        let offset = self.frame as usize;
        for (y, row) in self.pixels.chunks_mut(SCREEN_WIDTH).enumerate() {
            for (x, px) in row.iter_mut().enumerate() {
                let bar = ((x + offset) / 20) % 8;
                let shade = if y % 16 == 0 { 0x40 } else { 0xFF };
                *px = bar_color(bar, shade);
            }
        }
    }

    fn synth(&mut self) {
        self.sample_carry += self.samples_per_frame;
        let count = self.sample_carry as usize;
        self.sample_carry -= count as f64;
        self.audio_buf.clear();
        for _ in 0..count {
            let value = (self.phase.sin() * TONE_AMPLITUDE) as i16;
            self.audio_buf.push([value, value]);
            self.phase = (self.phase + self.phase_step) % std::f64::consts::TAU;
        }
    }
}

fn bar_color(bar: usize, shade: u32) -> u32 {
    let r = if bar & 1 != 0 { shade } else { 0 };
    let g = if bar & 2 != 0 { shade } else { 0 };
    let b = if bar & 4 != 0 { shade } else { 0 };
    (r << 16) | (g << 8) | b
}

impl EmuSystem for TestPatternSystem {
    fn run_frame(&mut self, video: Option<&mut dyn VideoSink>, audio: Option<&mut dyn AudioSink>) {
        self.frame += 1;
        // Audio state advances even when muted so the tone stays continuous.
        self.synth();
        if let Some(audio) = audio {
            audio.write_samples(&self.audio_buf);
        }
        if let Some(video) = video {
            self.draw();
            video.write_frame(SCREEN_WIDTH, SCREEN_HEIGHT, &self.pixels);
        }
    }

    fn video_system(&self) -> VideoSystem {
        self.video_system
    }

    fn should_fast_forward(&self) -> bool {
        self.frame < self.loader_frames
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect {
        frames: usize,
        samples: usize,
    }

    impl AudioSink for Collect {
        fn write_samples(&mut self, frames: &[[i16; 2]]) -> usize {
            self.samples += frames.len();
            frames.len()
        }
    }

    impl VideoSink for Collect {
        fn write_frame(&mut self, width: usize, height: usize, pixels: &[u32]) {
            assert_eq!(pixels.len(), width * height);
            self.frames += 1;
        }
    }

    #[test]
    fn audio_tracks_emulated_time() {
        let mut system = TestPatternSystem::new(VideoSystem::Pal, 48_000);
        let mut audio = Collect::default();
        for _ in 0..50 {
            system.run_frame(None, Some(&mut audio));
        }
        assert_eq!(audio.samples, 48_000);
    }

    #[test]
    fn loader_requests_fast_forward() {
        let mut system = TestPatternSystem::new(VideoSystem::Ntsc, 48_000).with_loader(2);
        let mut video = Collect::default();
        assert!(system.should_fast_forward());
        system.run_frame(Some(&mut video), None);
        system.run_frame(Some(&mut video), None);
        assert!(!system.should_fast_forward());
        assert_eq!(video.frames, 2);
    }
}
