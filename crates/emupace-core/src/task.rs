//! The emulation thread and its host-side handle.
//!
//! The host forwards every vsync to [`EmuSystemTask::frame_update`]. The task
//! thread runs the due frames through a [`FramePacer`] and hands each rendered
//! (or blank) frame to the renderer as [`TaskEvent::Present`], then waits for
//! the renderer to confirm before it looks at the next callback.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel as cb;
use log::{debug, info, trace, warn};

use crate::detector::{CalibrationStatus, DetectorTolerances, FrameRateCalibration};
use crate::display::{DisplayRefresh, HostWindow};
use crate::error::{PaceError, Result};
use crate::frame_rate::{FrameParams, FrameRate, FrameRateConfig};
use crate::output_timing::OutputTimingManager;
use crate::pacer::{AdvanceOutcome, FramePacer, PacingTolerances};
use crate::stats::FrameTimingStats;
use crate::sync::{FrameCapture, PendingPresent, PresentPort};
use crate::system::{AudioSink, EmuSystem, VideoSink};

const THREAD_NAME: &str = "emupace-emu";

/// Whether a control call blocks until the task thread has applied it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageReplyMode {
    #[default]
    None,
    Wait,
}

type Reply = cb::Sender<()>;

enum TaskCommand {
    FrameUpdate(FrameParams),
    Pause(Option<Reply>),
    Resume(Option<Reply>),
    SetWindow {
        window: Option<HostWindow>,
        reply: cb::Sender<Option<HostWindow>>,
    },
    SetFrameRateConfig(FrameRateConfig),
    SetBlankFrameInsertion(bool),
    SetSpeedMultiplier(f64),
    DetectFrameRate,
    Exit,
}

impl TaskCommand {
    /// Control commands that must not sit behind a present the renderer may
    /// never confirm.
    fn interrupts_present(&self) -> bool {
        matches!(
            self,
            Self::Pause(_) | Self::Resume(_) | Self::SetWindow { .. } | Self::Exit
        )
    }
}

/// Notifications from the task thread.
#[derive(Debug)]
pub enum TaskEvent {
    /// A frame is ready. Confirm with [`PendingPresent::present`] once it is
    /// on screen; dropping the token also releases the task.
    Present(PendingPresent),
    FrameRateChanged(FrameRateConfig),
    FrameRateDetected(FrameRate),
    FrameRateDetectionFailed { fallback: FrameRate },
}

/// Startup settings for [`EmuSystemTask::start`].
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub pacing: PacingTolerances,
    pub detector: DetectorTolerances,
    pub output_timing: OutputTimingManager,
    pub blank_frame_insertion: bool,
    pub speed_multiplier: f64,
    pub window: Option<HostWindow>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            pacing: PacingTolerances::default(),
            detector: DetectorTolerances::default(),
            output_timing: OutputTimingManager::default(),
            blank_frame_insertion: false,
            speed_multiplier: 1.0,
            window: None,
        }
    }
}

/// Host-side handle to the emulation thread.
pub struct EmuSystemTask {
    cmd_tx: cb::Sender<TaskCommand>,
    thread: Option<JoinHandle<Box<dyn EmuSystem>>>,
    waiting_for_present: Arc<AtomicBool>,
    stats: FrameTimingStats,
}

impl EmuSystemTask {
    /// Spawn the emulation thread. Frames rendered by `system` arrive on the
    /// returned receiver; its audio goes to `audio`, if any.
    pub fn start(
        system: Box<dyn EmuSystem>,
        audio: Option<Box<dyn AudioSink + Send>>,
        config: TaskConfig,
        stats: FrameTimingStats,
    ) -> Result<(Self, cb::Receiver<TaskEvent>)> {
        let (cmd_tx, cmd_rx) = cb::unbounded();
        let (event_tx, event_rx) = cb::unbounded();
        let waiting_for_present = Arc::new(AtomicBool::new(false));

        let worker = TaskWorker::new(
            system,
            audio,
            config,
            stats.clone(),
            event_tx,
            Arc::clone(&waiting_for_present),
        );
        info!(
            "Task: starting {} at {}",
            worker.system.name(),
            worker.pacer.frame_rate_config().rate
        );
        let thread = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || worker.run(cmd_rx))
            .map_err(PaceError::TaskSpawn)?;

        Ok((
            Self {
                cmd_tx,
                thread: Some(thread),
                waiting_for_present,
                stats,
            },
            event_rx,
        ))
    }

    pub fn stats(&self) -> &FrameTimingStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Whether the task thread is blocked on an unconfirmed present.
    pub fn is_waiting_for_present(&self) -> bool {
        self.waiting_for_present.load(Ordering::Acquire)
    }

    /// Forward one host vsync.
    pub fn frame_update(&self, params: FrameParams) -> Result<()> {
        self.send(TaskCommand::FrameUpdate(params))
    }

    pub fn pause(&self, mode: MessageReplyMode) -> Result<()> {
        self.send_with_reply(mode, TaskCommand::Pause)
    }

    /// Resume after [`Self::pause`]. Pacing restarts from the next callback.
    pub fn resume(&self, mode: MessageReplyMode) -> Result<()> {
        self.send_with_reply(mode, TaskCommand::Resume)
    }

    /// Hand `window` to the task and get back the one it held before.
    pub fn set_window(&self, window: Option<HostWindow>) -> Result<Option<HostWindow>> {
        let (reply, rx) = cb::bounded(1);
        self.send(TaskCommand::SetWindow { window, reply })?;
        rx.recv().map_err(|_| PaceError::TaskStopped)
    }

    /// Force an output rate, bypassing [`OutputTimingManager`] until the next
    /// window change or detection.
    pub fn set_frame_rate_config(&self, config: FrameRateConfig) -> Result<()> {
        self.send(TaskCommand::SetFrameRateConfig(config))
    }

    pub fn set_blank_frame_insertion(&self, enable: bool) -> Result<()> {
        self.send(TaskCommand::SetBlankFrameInsertion(enable))
    }

    pub fn set_speed_multiplier(&self, speed: f64) -> Result<()> {
        self.send(TaskCommand::SetSpeedMultiplier(speed))
    }

    /// Measure the host refresh from the following vsync timestamps. The
    /// result arrives as [`TaskEvent::FrameRateDetected`] or
    /// [`TaskEvent::FrameRateDetectionFailed`].
    pub fn detect_frame_rate(&self) -> Result<()> {
        self.send(TaskCommand::DetectFrameRate)
    }

    /// Stop the thread and hand the system back.
    pub fn stop(&mut self) -> Result<Box<dyn EmuSystem>> {
        let Some(thread) = self.thread.take() else {
            return Err(PaceError::TaskStopped);
        };
        debug!("Task: stopping");
        let _ = self.cmd_tx.send(TaskCommand::Exit);
        thread.join().map_err(|_| PaceError::TaskPanicked)
    }

    fn send(&self, cmd: TaskCommand) -> Result<()> {
        if self.thread.is_none() {
            return Err(PaceError::TaskStopped);
        }
        self.cmd_tx.send(cmd).map_err(|_| PaceError::TaskStopped)
    }

    fn send_with_reply(
        &self,
        mode: MessageReplyMode,
        cmd: impl FnOnce(Option<Reply>) -> TaskCommand,
    ) -> Result<()> {
        match mode {
            MessageReplyMode::None => self.send(cmd(None)),
            MessageReplyMode::Wait => {
                let (reply, rx) = cb::bounded(1);
                self.send(cmd(Some(reply)))?;
                rx.recv().map_err(|_| PaceError::TaskStopped)
            }
        }
    }
}

impl Drop for EmuSystemTask {
    fn drop(&mut self) {
        if self.thread.is_some()
            && let Err(e) = self.stop()
        {
            warn!("Task: {e} while shutting down");
        }
    }
}

enum PresentWait {
    Presented,
    Interrupted,
}

struct TaskWorker {
    system: Box<dyn EmuSystem>,
    audio: Option<Box<dyn AudioSink + Send>>,
    pacer: FramePacer,
    capture: FrameCapture,
    present: PresentPort,
    output_timing: OutputTimingManager,
    detector_tolerances: DetectorTolerances,
    calibration: Option<FrameRateCalibration>,
    window: Option<HostWindow>,
    paused: bool,
    backlog: VecDeque<TaskCommand>,
    event_tx: cb::Sender<TaskEvent>,
    waiting_for_present: Arc<AtomicBool>,
    stats: FrameTimingStats,
}

impl TaskWorker {
    fn new(
        system: Box<dyn EmuSystem>,
        audio: Option<Box<dyn AudioSink + Send>>,
        config: TaskConfig,
        stats: FrameTimingStats,
        event_tx: cb::Sender<TaskEvent>,
        waiting_for_present: Arc<AtomicBool>,
    ) -> Self {
        let frame_rate_config = frame_rate_config_for(
            &config.output_timing,
            system.as_ref(),
            config.window.as_ref(),
        );
        let mut pacer = FramePacer::new(frame_rate_config, config.pacing, stats.clone());
        pacer.set_blank_frame_insertion(config.blank_frame_insertion);
        pacer.set_speed_multiplier(config.speed_multiplier);
        Self {
            system,
            audio,
            pacer,
            capture: FrameCapture::default(),
            present: PresentPort::new(),
            output_timing: config.output_timing,
            detector_tolerances: config.detector,
            calibration: None,
            window: config.window,
            paused: false,
            backlog: VecDeque::new(),
            event_tx,
            waiting_for_present,
            stats,
        }
    }

    fn run(mut self, cmd_rx: cb::Receiver<TaskCommand>) -> Box<dyn EmuSystem> {
        loop {
            let cmd = match self.backlog.pop_front() {
                Some(cmd) => cmd,
                None => match cmd_rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => {
                        debug!("Task: command port closed");
                        break;
                    }
                },
            };
            self.backlog.extend(cmd_rx.try_iter());

            match cmd {
                TaskCommand::FrameUpdate(mut params) => {
                    while let Some(&TaskCommand::FrameUpdate(newer)) = self.backlog.front() {
                        self.backlog.pop_front();
                        self.stats.record_missed_callback();
                        params = newer.coalesce(params);
                    }
                    self.frame_update(params, &cmd_rx);
                }
                TaskCommand::Pause(reply) => {
                    if !self.paused {
                        debug!("Task: paused");
                    }
                    self.paused = true;
                    ack(reply);
                }
                TaskCommand::Resume(reply) => {
                    if self.paused {
                        debug!("Task: resumed");
                        self.pacer.reset();
                    }
                    self.paused = false;
                    ack(reply);
                }
                TaskCommand::SetWindow { window, reply } => {
                    let previous = std::mem::replace(&mut self.window, window);
                    self.apply_output_timing();
                    let _ = reply.send(previous);
                }
                TaskCommand::SetFrameRateConfig(config) => self.set_frame_rate_config(config),
                TaskCommand::SetBlankFrameInsertion(enable) => {
                    debug!("Task: blank frame insertion {enable}");
                    self.pacer.set_blank_frame_insertion(enable);
                }
                TaskCommand::SetSpeedMultiplier(speed) => self.pacer.set_speed_multiplier(speed),
                TaskCommand::DetectFrameRate => {
                    let reported = self
                        .window
                        .as_ref()
                        .map_or(FrameRate::DEFAULT_HOST, |w| w.refresh.rate);
                    info!("Task: detecting host frame rate (reported {reported})");
                    self.calibration =
                        Some(FrameRateCalibration::new(reported, self.detector_tolerances));
                }
                TaskCommand::Exit => break,
            }
        }
        debug!("Task: exiting");
        self.system
    }

    fn frame_update(&mut self, params: FrameParams, cmd_rx: &cb::Receiver<TaskCommand>) {
        if self.paused {
            trace!("Task: paused, ignoring vsync at {:?}", params.time);
            return;
        }
        self.calibrate(params);

        let audio = self
            .audio
            .as_deref_mut()
            .map(|sink| sink as &mut dyn AudioSink);
        let outcome = self.pacer.advance_frames(
            params,
            self.system.as_mut(),
            Some(&mut self.capture as &mut dyn VideoSink),
            audio,
        );
        match outcome {
            AdvanceOutcome::Idle => {}
            AdvanceOutcome::BlankFrame => self.present_frame(cmd_rx, false),
            AdvanceOutcome::Ran { .. } => self.present_frame(cmd_rx, true),
        }
    }

    fn calibrate(&mut self, params: FrameParams) {
        let Some(calibration) = self.calibration.as_mut() else {
            return;
        };
        match calibration.add_frame(params.time) {
            CalibrationStatus::Calibrating => return,
            CalibrationStatus::Detected(rate) => {
                if let Some(window) = self.window.as_mut() {
                    window.refresh = DisplayRefresh::detected(rate);
                }
                self.emit(TaskEvent::FrameRateDetected(rate));
                self.apply_detected_rate(rate);
            }
            CalibrationStatus::GaveUp { fallback } => {
                self.emit(TaskEvent::FrameRateDetectionFailed { fallback });
            }
        }
        self.calibration = None;
    }

    fn apply_detected_rate(&mut self, rate: FrameRate) {
        if self.window.is_some() {
            self.apply_output_timing();
            return;
        }
        let config = self.output_timing.frame_rate_config(
            self.system.video_system(),
            self.system.native_frame_rate(),
            &DisplayRefresh::detected(rate),
        );
        self.set_frame_rate_config(config);
    }

    fn apply_output_timing(&mut self) {
        let config = frame_rate_config_for(
            &self.output_timing,
            self.system.as_ref(),
            self.window.as_ref(),
        );
        self.set_frame_rate_config(config);
    }

    fn set_frame_rate_config(&mut self, config: FrameRateConfig) {
        if config == self.pacer.frame_rate_config() {
            return;
        }
        info!(
            "Task: output rate {} (refresh multiplier {})",
            config.rate, config.refresh_multiplier
        );
        self.pacer.set_frame_rate_config(config);
        self.emit(TaskEvent::FrameRateChanged(config));
    }

    fn present_frame(&mut self, cmd_rx: &cb::Receiver<TaskCommand>, rendered: bool) {
        let frame = if rendered { self.capture.take() } else { None };
        let token = self.present.issue(frame);
        self.waiting_for_present.store(true, Ordering::Release);
        let started = Instant::now();

        if let Err(cb::SendError(event)) = self.event_tx.send(TaskEvent::Present(token)) {
            trace!("Task: no renderer listening, dropping present");
            drop(event);
        }
        match self.wait_for_present(cmd_rx) {
            PresentWait::Presented => self.stats.record_present(started.elapsed()),
            PresentWait::Interrupted => {
                debug!("Task: present {} abandoned", self.present.sequence());
            }
        }
        self.waiting_for_present.store(false, Ordering::Release);
    }

    fn wait_for_present(&mut self, cmd_rx: &cb::Receiver<TaskCommand>) -> PresentWait {
        if self.backlog.iter().any(TaskCommand::interrupts_present) {
            return PresentWait::Interrupted;
        }
        let confirmations = self.present.receiver().clone();
        loop {
            cb::select! {
                recv(confirmations) -> sequence => match sequence {
                    Ok(sequence) if self.present.is_current(sequence) => {
                        return PresentWait::Presented;
                    }
                    Ok(_) => {}
                    Err(_) => return PresentWait::Interrupted,
                },
                recv(cmd_rx) -> cmd => match cmd {
                    Ok(cmd) => {
                        let interrupt = cmd.interrupts_present();
                        self.backlog.push_back(cmd);
                        if interrupt {
                            return PresentWait::Interrupted;
                        }
                    }
                    Err(_) => return PresentWait::Interrupted,
                },
            }
        }
    }

    fn emit(&self, event: TaskEvent) {
        let _ = self.event_tx.send(event);
    }
}

fn frame_rate_config_for(
    output_timing: &OutputTimingManager,
    system: &dyn EmuSystem,
    window: Option<&HostWindow>,
) -> FrameRateConfig {
    let display = window.map_or_else(DisplayRefresh::fallback, |w| w.refresh);
    output_timing.frame_rate_config(system.video_system(), system.native_frame_rate(), &display)
}

fn ack(reply: Option<Reply>) {
    if let Some(reply) = reply {
        let _ = reply.send(());
    }
}
