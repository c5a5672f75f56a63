//! Fall Sentinel
//!
//! Watches a camera feed, video file or still image for falls and notifies
//! over Telegram once a fall has been visible long enough.
//!
//! # Architecture
//!
//! Each session wires four stages together:
//!
//! 1. **Source** (`ingest`): frames with session-clock timestamps.
//! 2. **Detector** (`detect`): bounding boxes with labels and confidences,
//!    reduced to a single "condition present" flag per frame.
//! 3. **Debouncer** (`debounce`): turns the per-frame flag into alerts. The
//!    condition must be sustained, and alerts are spaced by a cooldown.
//! 4. **Notifier** (`notify`): annotated snapshot plus text, best effort.
//!
//! # Module Structure
//!
//! - `frame`: RGB frame container
//! - `settings`: persisted settings and per-session snapshots
//! - `annotate`: box and label drawing, output file naming
//! - `record`: annotated video output for video sessions
//! - `session`: session driver, events and commands

pub mod annotate;
pub mod debounce;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod record;
pub mod session;
pub mod settings;

pub use debounce::{AlertDecision, DebounceConfig, DebounceState, FallDebouncer};
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectionResult, DetectorBackend, FallCondition,
    SharedBackend, StubBackend,
};
#[cfg(feature = "backend-tract")]
pub use detect::{TractBackend, TractConfig};
pub use frame::Frame;
pub use ingest::{
    open_source, FrameSource, ImageSource, SourceSpec, SyntheticConfig, SyntheticSource,
    VideoConfig, VideoSource, WebcamConfig, WebcamSource,
};
pub use notify::{
    deliver, notifier_for, Attachment, LogNotifier, Notification, Notifier, TelegramConfig,
    TelegramNotifier,
};
pub use record::{video_recorder, FrameRecorder};
pub use session::{
    spawn_session, Session, SessionCommand, SessionControl, SessionEvent, SessionHandle,
    SessionKind, SessionSummary,
};
pub use settings::{SessionConfig, Settings, SettingsStore};
