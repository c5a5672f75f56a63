//! Session driver.
//!
//! A session pulls frames from one source, runs the detector, reduces each
//! frame to the watched condition and feeds a fresh [`FallDebouncer`]. On an
//! alert it writes an annotated snapshot and notifies. Video sessions with a
//! [`FrameRecorder`] also write every annotated frame to a video file that is
//! sent with the completion message. Sessions:
//! - evaluate every frame exactly once, in capture order
//! - stop between frames when asked
//! - treat notification failures as non-fatal
//! - report progress over an explicit event channel
//!
//! [`spawn_session`] runs a session on its own thread and hands back a
//! [`SessionHandle`] for events, commands and the final summary.

use ab_glyph::FontVec;
use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::annotate::{annotate, load_label_font, save_jpeg, source_stem, timestamp_tag};
use crate::debounce::{AlertDecision, FallDebouncer};
use crate::detect::{DetectionResult, DetectorBackend};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::notify::{deliver, Notification, Notifier};
use crate::record::FrameRecorder;
use crate::settings::SessionConfig;

const DEFAULT_PROGRESS_EVERY: u64 = 30;

const ALERT_SNAPSHOT_STEM: &str = "fall_snapshot";
const MANUAL_SNAPSHOT_STEM: &str = "snapshot";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    Webcam,
    Video,
    Image,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionKind::Webcam => "live",
            SessionKind::Video => "video",
            SessionKind::Image => "image",
        })
    }
}

/// Requests from the interactive layer to a running session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    Stop,
    /// Save and send the most recent annotated frame.
    Snapshot,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Started {
        kind: SessionKind,
        source: String,
        frames_hint: Option<u64>,
    },
    Progress {
        frames: u64,
        condition_frames: u64,
    },
    Alert {
        at: Duration,
        snapshot: Option<PathBuf>,
    },
    Snapshot {
        path: PathBuf,
    },
    NotificationFailed {
        reason: String,
    },
    Finished(SessionSummary),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
    pub kind: SessionKind,
    pub frames: u64,
    /// Frames where the watched condition held.
    pub condition_frames: u64,
    pub alerts: u64,
    /// Annotated image or video written by the session.
    pub output: Option<PathBuf>,
    /// True when the session ended on a stop request rather than exhaustion.
    pub stopped: bool,
}

impl SessionSummary {
    fn new(kind: SessionKind) -> Self {
        Self {
            kind,
            frames: 0,
            condition_frames: 0,
            alerts: 0,
            output: None,
            stopped: false,
        }
    }
}

/// Channels and stop flag a session listens to.
pub struct SessionControl {
    stop: Arc<AtomicBool>,
    commands: Option<Receiver<SessionCommand>>,
    events: Option<Sender<SessionEvent>>,
}

impl SessionControl {
    pub fn new(
        stop: Arc<AtomicBool>,
        commands: Option<Receiver<SessionCommand>>,
        events: Option<Sender<SessionEvent>>,
    ) -> Self {
        Self {
            stop,
            commands,
            events,
        }
    }

    /// No channels; runs until the source is exhausted.
    pub fn detached() -> Self {
        Self::new(Arc::new(AtomicBool::new(false)), None, None)
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = events.send(event);
        }
    }

    /// Drain pending commands. Returns (stop requested, snapshot requested).
    fn poll(&self) -> (bool, bool) {
        let mut stop = self.stop.load(Ordering::SeqCst);
        let mut snapshot = false;
        if let Some(commands) = &self.commands {
            loop {
                match commands.try_recv() {
                    Ok(SessionCommand::Stop) => stop = true,
                    Ok(SessionCommand::Snapshot) => snapshot = true,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }
        (stop, snapshot)
    }
}

pub struct Session {
    kind: SessionKind,
    config: SessionConfig,
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    notifier: Box<dyn Notifier>,
    recorder: Option<Box<dyn FrameRecorder>>,
    font: Option<FontVec>,
    progress_every: u64,
}

impl Session {
    pub fn new(
        kind: SessionKind,
        config: SessionConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            kind,
            config,
            source,
            detector,
            notifier,
            recorder: None,
            font: None,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }

    /// Write every annotated frame to `recorder`; closed when the session ends.
    pub fn with_recorder(mut self, recorder: Box<dyn FrameRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Emit a progress event every `frames` frames (minimum 1).
    pub fn with_progress_every(mut self, frames: u64) -> Self {
        self.progress_every = frames.max(1);
        self
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Process frames until the source is exhausted or a stop is requested.
    pub fn run(&mut self, control: &SessionControl) -> Result<SessionSummary> {
        self.source
            .connect()
            .with_context(|| format!("failed to open {}", self.source.describe()))?;
        self.detector
            .warm_up()
            .with_context(|| format!("{} detector warm-up failed", self.detector.name()))?;
        self.font = load_label_font(self.config.label_font.as_deref());

        let mut debouncer = FallDebouncer::new(self.config.debounce);
        let mut summary = SessionSummary::new(self.kind);
        let mut last: Option<(Frame, DetectionResult)> = None;

        log::info!(
            "{} session started: source={} detector={} sustain={:?} cooldown={:?}",
            self.kind,
            self.source.describe(),
            self.detector.name(),
            self.config.debounce.sustain,
            self.config.debounce.cooldown
        );
        control.emit(SessionEvent::Started {
            kind: self.kind,
            source: self.source.describe(),
            frames_hint: self.source.frame_count_hint(),
        });

        loop {
            let (stop, snapshot) = control.poll();
            if snapshot {
                match &last {
                    Some((frame, result)) => self.manual_snapshot(frame, result, control),
                    None => log::warn!("snapshot requested before the first frame"),
                }
            }
            if stop {
                summary.stopped = true;
                break;
            }

            let Some(frame) = self.source.next_frame()? else {
                break;
            };
            if let Some((prev, _)) = &last {
                if frame.timestamp < prev.timestamp {
                    return Err(anyhow!(
                        "frame {} at {:?} arrived before frame {} at {:?}",
                        frame.index,
                        frame.timestamp,
                        prev.index,
                        prev.timestamp
                    ));
                }
            }

            let result = self
                .detector
                .detect(&frame)
                .with_context(|| format!("detection failed on frame {}", frame.index))?;
            let condition_met = self.config.condition.is_met(&result);
            summary.frames += 1;
            if condition_met {
                summary.condition_frames += 1;
            }

            if let AlertDecision::Alert(at) = debouncer.evaluate(condition_met, frame.timestamp) {
                summary.alerts += 1;
                self.raise_alert(at, &frame, &result, control);
            }
            self.record(&frame, &result);

            if summary.frames % self.progress_every == 0 {
                log::debug!(
                    "{} session: {} frames, {} with {}, healthy={}",
                    self.kind,
                    summary.frames,
                    summary.condition_frames,
                    self.config.condition.watched_label,
                    self.source.is_healthy()
                );
                control.emit(SessionEvent::Progress {
                    frames: summary.frames,
                    condition_frames: summary.condition_frames,
                });
            }

            last = Some((frame, result));
        }

        self.finish(&mut summary, last.as_ref(), control)?;

        log::info!(
            "{} session finished: {} frames, {} alerts{}",
            self.kind,
            summary.frames,
            summary.alerts,
            if summary.stopped { " (stopped)" } else { "" }
        );
        control.emit(SessionEvent::Finished(summary.clone()));
        Ok(summary)
    }

    fn raise_alert(
        &mut self,
        at: Duration,
        frame: &Frame,
        result: &DetectionResult,
        control: &SessionControl,
    ) {
        let tag = timestamp_tag();
        log::warn!(
            "{} detected ({}) at session time {:.1}s",
            self.config.condition.watched_label,
            self.kind,
            at.as_secs_f64()
        );

        let snapshot = match self.write_annotated(frame, result, ALERT_SNAPSHOT_STEM) {
            Ok(path) => Some(path),
            Err(err) => {
                log::warn!("alert snapshot not saved: {:#}", err);
                None
            }
        };
        control.emit(SessionEvent::Alert {
            at,
            snapshot: snapshot.clone(),
        });

        let message = format!(
            "⚠️ {} detected ({}) at {}",
            title_case(&self.config.condition.watched_label),
            self.kind,
            tag
        );
        let notification = match snapshot {
            Some(path) => Notification::with_photo(message, path),
            None => Notification::text(message),
        };
        self.send(&notification, control);
    }

    /// A failing recorder is dropped; detection carries on without it.
    fn record(&mut self, frame: &Frame, result: &DetectionResult) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        let recorded = annotate(frame, result, &self.config.condition, self.font.as_ref())
            .and_then(|image| recorder.record(&image));
        if let Err(err) = recorded {
            log::warn!(
                "annotated video abandoned at frame {}: {:#}",
                frame.index,
                err
            );
            self.recorder = None;
        }
    }

    fn finish_recording(&mut self) -> Option<PathBuf> {
        let mut recorder = self.recorder.take()?;
        match recorder.finish() {
            Ok(path) => Some(path),
            Err(err) => {
                log::warn!("annotated video not written: {:#}", err);
                None
            }
        }
    }

    fn manual_snapshot(&mut self, frame: &Frame, result: &DetectionResult, control: &SessionControl) {
        match self.write_annotated(frame, result, MANUAL_SNAPSHOT_STEM) {
            Ok(path) => {
                log::info!("snapshot saved to {}", path.display());
                control.emit(SessionEvent::Snapshot { path: path.clone() });
                let message = format!("Snapshot captured at {}", timestamp_tag());
                self.send(&Notification::with_photo(message, path), control);
            }
            Err(err) => log::warn!("snapshot not saved: {:#}", err),
        }
    }

    fn finish(
        &mut self,
        summary: &mut SessionSummary,
        last: Option<&(Frame, DetectionResult)>,
        control: &SessionControl,
    ) -> Result<()> {
        let recorded = self.finish_recording();
        match self.kind {
            SessionKind::Image => {
                let (frame, result) = last.context("image produced no frame")?;
                let stem = format!("{}_annotated", source_stem(&self.source.describe()));
                let path = self.write_annotated(frame, result, &stem)?;
                log::info!("annotated image saved to {}", path.display());
                let message = format!("Image detection finished: {}", file_label(&path));
                self.send(&Notification::with_photo(message, path.clone()), control);
                summary.output = Some(path);
            }
            SessionKind::Video => {
                let message = format!(
                    "Video detection finished: {} ({} frames, {} alerts)",
                    file_label(Path::new(&self.source.describe())),
                    summary.frames,
                    summary.alerts
                );
                let notification = match &recorded {
                    Some(path) => Notification::with_video(message, path),
                    None => Notification::text(message),
                };
                self.send(&notification, control);
                summary.output = recorded;
            }
            SessionKind::Webcam => summary.output = recorded,
        }
        Ok(())
    }

    fn write_annotated(&self, frame: &Frame, result: &DetectionResult, stem: &str) -> Result<PathBuf> {
        let image = annotate(frame, result, &self.config.condition, self.font.as_ref())?;
        save_jpeg(&image, &self.config.output_dir, stem)
    }

    fn send(&mut self, notification: &Notification, control: &SessionControl) {
        if let Err(reason) = deliver(self.notifier.as_mut(), notification) {
            control.emit(SessionEvent::NotificationFailed { reason });
        }
    }
}

/// Handle to a session running on a worker thread.
pub struct SessionHandle {
    /// Ends with `Finished` or `Failed`, then disconnects.
    pub events: Receiver<SessionEvent>,
    commands: Sender<SessionCommand>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<Result<SessionSummary>>>,
}

impl SessionHandle {
    /// Shared stop flag, e.g. for a Ctrl-C handler.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn commands(&self) -> Sender<SessionCommand> {
        self.commands.clone()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn request_snapshot(&self) {
        let _ = self.commands.send(SessionCommand::Snapshot);
    }

    /// Wait for the session to end.
    pub fn join(mut self) -> Result<SessionSummary> {
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("session already joined"))?;
        join.join()
            .map_err(|_| anyhow!("session thread panicked"))?
    }
}

/// Run `session` on a dedicated thread.
pub fn spawn_session(mut session: Session) -> Result<SessionHandle> {
    let (event_tx, event_rx) = mpsc::channel();
    let (command_tx, command_rx) = mpsc::channel();
    let stop = Arc::new(AtomicBool::new(false));
    let control = SessionControl::new(stop.clone(), Some(command_rx), Some(event_tx));

    let join = std::thread::Builder::new()
        .name(format!("{}-session", session.kind()))
        .spawn(move || {
            let outcome = session.run(&control);
            if let Err(err) = &outcome {
                log::error!("{} session failed: {:#}", session.kind(), err);
                control.emit(SessionEvent::Failed(format!("{:#}", err)));
            }
            outcome
        })
        .context("failed to spawn session thread")?;

    Ok(SessionHandle {
        events: event_rx,
        commands: command_tx,
        stop,
        join: Some(join),
    })
}

fn title_case(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_match_messages() {
        assert_eq!(SessionKind::Webcam.to_string(), "live");
        assert_eq!(SessionKind::Video.to_string(), "video");
    }

    #[test]
    fn title_case_capitalizes_first_letter() {
        assert_eq!(title_case("fall"), "Fall");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn control_drains_all_pending_commands() {
        let (tx, rx) = mpsc::channel();
        let control = SessionControl::new(Arc::new(AtomicBool::new(false)), Some(rx), None);
        tx.send(SessionCommand::Snapshot).unwrap();
        tx.send(SessionCommand::Stop).unwrap();
        assert_eq!(control.poll(), (true, true));
        assert_eq!(control.poll(), (false, false));
    }

    #[test]
    fn stop_flag_is_honoured_without_channels() {
        let stop = Arc::new(AtomicBool::new(true));
        let control = SessionControl::new(stop, None, None);
        assert_eq!(control.poll(), (true, false));
    }
}
