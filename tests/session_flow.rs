use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use image::RgbImage;
use tempfile::tempdir;

use fall_sentinel::debounce::DebounceConfig;
use fall_sentinel::detect::{BoundingBox, Detection, FallCondition, StubBackend};
use fall_sentinel::frame::Frame;
use fall_sentinel::ingest::{
    FrameSource, ImageSource, SyntheticConfig, SyntheticSource, VideoConfig, VideoSource,
    WebcamConfig, WebcamSource,
};
use fall_sentinel::annotate::MATCH_COLOR;
use fall_sentinel::notify::{Attachment, Notification, Notifier};
use fall_sentinel::record::FrameRecorder;
use fall_sentinel::session::{
    spawn_session, Session, SessionControl, SessionEvent, SessionKind,
};
use fall_sentinel::settings::SessionConfig;

#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn notify(&mut self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn notify(&mut self, _notification: &Notification) -> Result<()> {
        Err(anyhow!("telegram unreachable"))
    }
}

/// Counts frames and keeps whether each one carried a condition box.
#[derive(Clone)]
struct CountingRecorder {
    path: PathBuf,
    frames: Arc<Mutex<Vec<bool>>>,
}

impl CountingRecorder {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            frames: Arc::default(),
        }
    }

    fn frames(&self) -> Vec<bool> {
        self.frames.lock().unwrap().clone()
    }
}

impl FrameRecorder for CountingRecorder {
    fn record(&mut self, image: &RgbImage) -> Result<()> {
        let boxed = image.pixels().any(|px| *px == MATCH_COLOR);
        self.frames.lock().unwrap().push(boxed);
        Ok(())
    }

    fn finish(&mut self) -> Result<PathBuf> {
        std::fs::write(&self.path, b"mp4")?;
        Ok(self.path.clone())
    }
}

/// Fails on the given frame and every one after it.
struct BrokenRecorder {
    fail_at: usize,
    seen: usize,
}

impl FrameRecorder for BrokenRecorder {
    fn record(&mut self, _image: &RgbImage) -> Result<()> {
        self.seen += 1;
        if self.seen > self.fail_at {
            bail!("disk full");
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<PathBuf> {
        bail!("finish called on an abandoned recording")
    }
}

/// Replays fixed timestamps, regardless of order.
struct TimestampSource {
    timestamps: Vec<Duration>,
    next: usize,
}

impl FrameSource for TimestampSource {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(ts) = self.timestamps.get(self.next).copied() else {
            return Ok(None);
        };
        self.next += 1;
        Frame::solid(8, 8, [0, 0, 0], self.next as u64 - 1, ts).map(Some)
    }

    fn describe(&self) -> String {
        "timestamps".to_string()
    }

    fn frames_captured(&self) -> u64 {
        self.next as u64
    }
}

fn config(output_dir: &Path) -> SessionConfig {
    SessionConfig {
        debounce: DebounceConfig {
            sustain: Duration::from_secs(5),
            cooldown: Duration::from_secs(10),
        },
        condition: FallCondition::new("fall", 0.5),
        output_dir: output_dir.to_path_buf(),
        label_font: None,
        telegram: None,
    }
}

fn fall(confidence: f32) -> Detection {
    Detection::new("fall", confidence, BoundingBox::new(4.0, 4.0, 20.0, 20.0))
}

fn synthetic(frames: u64) -> Box<SyntheticSource> {
    Box::new(SyntheticSource::new(SyntheticConfig {
        fps: 10,
        frames: Some(frames),
        ..SyntheticConfig::default()
    }))
}

fn live_stub() -> Box<WebcamSource> {
    Box::new(
        WebcamSource::new(WebcamConfig {
            device: "stub://camera".to_string(),
            width: 16,
            height: 16,
            ..WebcamConfig::default()
        })
        .unwrap(),
    )
}

#[test]
fn sustained_fall_alerts_once_with_snapshot() {
    let out = tempdir().unwrap();
    let notifier = RecordingNotifier::default();
    let mut session = Session::new(
        SessionKind::Webcam,
        config(out.path()),
        synthetic(61),
        Box::new(StubBackend::repeating(vec![vec![fall(0.9)]])),
        Box::new(notifier.clone()),
    );

    let summary = session.run(&SessionControl::detached()).unwrap();

    assert_eq!(summary.frames, 61);
    assert_eq!(summary.condition_frames, 61);
    assert_eq!(summary.alerts, 1);
    assert!(!summary.stopped);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].message.starts_with("⚠️ Fall detected (live) at "));
    match &sent[0].attachment {
        Some(Attachment::Photo(path)) => {
            assert!(path.starts_with(out.path()));
            assert!(path.exists());
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("fall_snapshot_"));
        }
        other => panic!("expected photo attachment, got {:?}", other),
    }
}

#[test]
fn continuous_fall_realerts_after_cooldown() {
    let out = tempdir().unwrap();
    let session = Session::new(
        SessionKind::Webcam,
        config(out.path()),
        synthetic(200),
        Box::new(StubBackend::repeating(vec![vec![fall(0.9)]])),
        Box::new(RecordingNotifier::default()),
    );

    let handle = spawn_session(session).unwrap();
    let alerts: Vec<Duration> = handle
        .events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Alert { at, .. } => Some(at),
            _ => None,
        })
        .collect();
    let summary = handle.join().unwrap();

    // first alert once 5s are sustained, second strictly after the 10s cooldown
    assert_eq!(
        alerts,
        vec![Duration::from_millis(5000), Duration::from_millis(15100)]
    );
    assert_eq!(summary.alerts, 2);
}

#[test]
fn intermittent_fall_never_alerts() {
    let out = tempdir().unwrap();
    let script = (0..150)
        .map(|i| if i % 40 == 39 { Vec::new() } else { vec![fall(0.9)] })
        .collect();
    let notifier = RecordingNotifier::default();
    let mut session = Session::new(
        SessionKind::Webcam,
        config(out.path()),
        synthetic(150),
        Box::new(StubBackend::scripted(script)),
        Box::new(notifier.clone()),
    );

    let summary = session.run(&SessionControl::detached()).unwrap();

    assert_eq!(summary.alerts, 0);
    assert_eq!(summary.condition_frames, 147);
    assert!(notifier.sent().is_empty());
}

#[test]
fn low_confidence_and_other_labels_do_not_count() {
    let out = tempdir().unwrap();
    let detections = vec![
        fall(0.3),
        Detection::new("person", 0.99, BoundingBox::new(0.0, 0.0, 5.0, 5.0)),
    ];
    let mut session = Session::new(
        SessionKind::Webcam,
        config(out.path()),
        synthetic(100),
        Box::new(StubBackend::repeating(vec![detections])),
        Box::new(RecordingNotifier::default()),
    );

    let summary = session.run(&SessionControl::detached()).unwrap();
    assert_eq!(summary.condition_frames, 0);
    assert_eq!(summary.alerts, 0);
}

#[test]
fn image_session_writes_annotated_output_and_notifies() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("hallway.png");
    image::RgbImage::from_pixel(32, 24, image::Rgb([10, 10, 10]))
        .save(&input)
        .unwrap();
    let out = dir.path().join("outputs");

    let notifier = RecordingNotifier::default();
    let mut session = Session::new(
        SessionKind::Image,
        config(&out),
        Box::new(ImageSource::new(&input)),
        Box::new(StubBackend::scripted(vec![vec![fall(0.9)]])),
        Box::new(notifier.clone()),
    );

    let summary = session.run(&SessionControl::detached()).unwrap();

    assert_eq!(summary.frames, 1);
    assert_eq!(summary.condition_frames, 1);
    assert_eq!(summary.alerts, 0);
    let output = summary.output.expect("annotated output");
    assert!(output.exists());
    assert!(output
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("hallway_annotated_"));

    let decoded = image::open(&output).unwrap().into_rgb8();
    assert_eq!(decoded.dimensions(), (32, 24));

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].message.starts_with("Image detection finished: hallway_annotated_"));
    assert_eq!(sent[0].attachment, Some(Attachment::Photo(output)));
}

#[test]
fn unreadable_image_fails_before_processing() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("broken.jpg");
    std::fs::write(&input, b"not an image").unwrap();
    let notifier = RecordingNotifier::default();
    let mut session = Session::new(
        SessionKind::Image,
        config(dir.path()),
        Box::new(ImageSource::new(&input)),
        Box::new(StubBackend::new()),
        Box::new(notifier.clone()),
    );

    let err = session.run(&SessionControl::detached()).unwrap_err();
    assert!(format!("{:#}", err).contains("broken.jpg"));
    assert!(notifier.sent().is_empty());
}

#[test]
fn video_session_without_recorder_reports_completion_as_text() {
    let out = tempdir().unwrap();
    let notifier = RecordingNotifier::default();
    let mut session = Session::new(
        SessionKind::Video,
        config(out.path()),
        Box::new(VideoSource::new(VideoConfig::new("stub://clip.mp4")).unwrap()),
        Box::new(StubBackend::repeating(vec![vec![fall(0.8)]])),
        Box::new(notifier.clone()),
    );

    let summary = session.run(&SessionControl::detached()).unwrap();

    // 250 frames at 25 fps: alert at 5.0s, nothing else within 10s of media time
    assert_eq!(summary.frames, 250);
    assert_eq!(summary.alerts, 1);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].message.contains("(video)"));
    assert_eq!(
        sent[1].message,
        "Video detection finished: clip.mp4 (250 frames, 1 alerts)"
    );
    assert!(sent[1].attachment.is_none());
    assert_eq!(summary.output, None);
}

#[test]
fn video_session_records_every_annotated_frame_and_sends_the_video() {
    let out = tempdir().unwrap();
    let notifier = RecordingNotifier::default();
    let recorder = CountingRecorder::new(out.path().join("clip_annotated_test.mp4"));
    // fall visible for the first 6 s (150 frames at 25 fps)
    let script = (0..250)
        .map(|i| if i < 150 { vec![fall(0.8)] } else { Vec::new() })
        .collect();
    let mut session = Session::new(
        SessionKind::Video,
        config(out.path()),
        Box::new(VideoSource::new(VideoConfig::new("stub://clip.mp4")).unwrap()),
        Box::new(StubBackend::scripted(script)),
        Box::new(notifier.clone()),
    )
    .with_recorder(Box::new(recorder.clone()));

    let summary = session.run(&SessionControl::detached()).unwrap();

    let frames = recorder.frames();
    assert_eq!(frames.len(), 250);
    assert!(frames[..150].iter().all(|&boxed| boxed));
    assert!(frames[150..].iter().all(|&boxed| !boxed));

    let video = out.path().join("clip_annotated_test.mp4");
    assert_eq!(summary.output.as_deref(), Some(video.as_path()));
    let sent = notifier.sent();
    let done = sent.last().unwrap();
    assert_eq!(
        done.message,
        "Video detection finished: clip.mp4 (250 frames, 1 alerts)"
    );
    assert_eq!(done.attachment, Some(Attachment::Video(video)));
}

#[test]
fn recording_failure_does_not_stop_video_detection() {
    let out = tempdir().unwrap();
    let notifier = RecordingNotifier::default();
    let mut session = Session::new(
        SessionKind::Video,
        config(out.path()),
        Box::new(VideoSource::new(VideoConfig::new("stub://clip.mp4")).unwrap()),
        Box::new(StubBackend::repeating(vec![vec![fall(0.8)]])),
        Box::new(notifier.clone()),
    )
    .with_recorder(Box::new(BrokenRecorder {
        fail_at: 3,
        seen: 0,
    }));

    let summary = session.run(&SessionControl::detached()).unwrap();

    assert_eq!(summary.frames, 250);
    assert_eq!(summary.alerts, 1);
    assert_eq!(summary.output, None);
    assert!(notifier.sent().last().unwrap().attachment.is_none());
}

#[test]
fn notification_failures_do_not_stop_the_session() {
    let out = tempdir().unwrap();
    let session = Session::new(
        SessionKind::Webcam,
        config(out.path()),
        synthetic(80),
        Box::new(StubBackend::repeating(vec![vec![fall(0.9)]])),
        Box::new(FailingNotifier),
    );

    let handle = spawn_session(session).unwrap();
    let events: Vec<SessionEvent> = handle.events.iter().collect();
    let summary = handle.join().unwrap();

    assert_eq!(summary.frames, 80);
    assert_eq!(summary.alerts, 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::NotificationFailed { reason } if reason.contains("telegram unreachable")
    )));
    assert!(matches!(events.last(), Some(SessionEvent::Finished(_))));
}

#[test]
fn live_session_stops_on_request() {
    let out = tempdir().unwrap();
    let session = Session::new(
        SessionKind::Webcam,
        config(out.path()),
        live_stub(),
        Box::new(StubBackend::new()),
        Box::new(RecordingNotifier::default()),
    )
    .with_progress_every(10);

    let handle = spawn_session(session).unwrap();
    for event in handle.events.iter() {
        if let SessionEvent::Progress { frames, .. } = event {
            if frames >= 20 {
                handle.request_stop();
                break;
            }
        }
    }
    let summary = handle.join().unwrap();

    assert!(summary.stopped);
    assert!(summary.frames >= 20);
}

#[test]
fn snapshot_command_saves_and_sends_latest_frame() {
    let out = tempdir().unwrap();
    let notifier = RecordingNotifier::default();
    let session = Session::new(
        SessionKind::Webcam,
        config(out.path()),
        live_stub(),
        Box::new(StubBackend::new()),
        Box::new(notifier.clone()),
    )
    .with_progress_every(5);

    let handle = spawn_session(session).unwrap();
    let mut requested = false;
    let mut snapshot = None;
    for event in handle.events.iter() {
        match event {
            SessionEvent::Progress { .. } if !requested => {
                handle.request_snapshot();
                requested = true;
            }
            SessionEvent::Snapshot { path } => {
                snapshot = Some(path);
                handle.request_stop();
            }
            _ => {}
        }
    }
    handle.join().unwrap();

    let path = snapshot.expect("snapshot event");
    assert!(path.exists());
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("snapshot_"));
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].message.starts_with("Snapshot captured at "));
    assert_eq!(sent[0].attachment, Some(Attachment::Photo(path)));
}

#[test]
fn backwards_timestamps_fail_the_session() {
    let out = tempdir().unwrap();
    let source = TimestampSource {
        timestamps: vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_millis(1500),
        ],
        next: 0,
    };
    let session = Session::new(
        SessionKind::Video,
        config(out.path()),
        Box::new(source),
        Box::new(StubBackend::new()),
        Box::new(RecordingNotifier::default()),
    );

    let handle = spawn_session(session).unwrap();
    let events: Vec<SessionEvent> = handle.events.iter().collect();
    let err = handle.join().unwrap_err();

    assert!(err.to_string().contains("arrived before"));
    assert!(matches!(events.last(), Some(SessionEvent::Failed(_))));
}

#[test]
fn each_session_starts_with_fresh_debounce_state() {
    let out = tempdir().unwrap();
    for _ in 0..2 {
        let mut session = Session::new(
            SessionKind::Webcam,
            config(out.path()),
            synthetic(51),
            Box::new(StubBackend::repeating(vec![vec![fall(0.9)]])),
            Box::new(RecordingNotifier::default()),
        );
        // a carried-over last alert would suppress the second run
        assert_eq!(session.run(&SessionControl::detached()).unwrap().alerts, 1);
    }
}
