//! fall_sentinel - sustained fall detection with Telegram alerts
//!
//! Runs one detection session per invocation:
//! - `webcam`: live capture until `q` or Ctrl-C (`s` sends a snapshot)
//! - `image`: annotate a single image and send it
//! - `video`: scan a local video file, alerting like a live feed
//! - `demo`: synthetic frames and a scripted detector, no hardware needed
//!
//! Settings are kept in a JSON file (`--settings`, default `settings.json`).

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Sender;

use fall_sentinel::detect::{BackendRegistry, BoundingBox, Detection, DetectorBackend, StubBackend};
use fall_sentinel::ingest::{
    open_source, FrameSource, SourceSpec, SyntheticConfig, SyntheticSource, VideoConfig,
    WebcamConfig,
};
use fall_sentinel::ingest::video::FALLBACK_FPS;
use fall_sentinel::notify::{discover_chat_id, notifier_for, telegram::DEFAULT_API_BASE};
use fall_sentinel::record::video_recorder;
use fall_sentinel::session::{
    spawn_session, Session, SessionCommand, SessionEvent, SessionKind, SessionSummary,
};
use fall_sentinel::settings::{Settings, SettingsStore, DEFAULT_SETTINGS_PATH, SETTINGS_ENV};

#[path = "../ui.rs"]
mod ui;

/// Demo scene: frame rate and length of the synthetic feed.
const DEMO_FPS: u32 = 10;
const DEMO_FRAMES: u64 = 300;

#[derive(Parser, Debug)]
#[command(
    name = "fall_sentinel",
    version,
    about = "Detect sustained falls and send Telegram alerts"
)]
struct Args {
    /// Path to the settings file
    #[arg(long, env = SETTINGS_ENV, default_value = DEFAULT_SETTINGS_PATH, value_name = "PATH")]
    settings: PathBuf,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,

    /// Detector backend (default: tract when a model is available, else stub)
    #[arg(long, value_name = "NAME")]
    backend: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch a webcam. Type `s` + Enter for a snapshot, `q` + Enter to stop.
    Webcam {
        /// Capture device (e.g. /dev/video0, or stub:// for a synthetic feed)
        #[arg(long, default_value = "/dev/video0")]
        device: String,
    },
    /// Run detection on a single image
    Image {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Run detection on a local video file
    Video {
        #[arg(value_name = "PATH")]
        path: String,
    },
    /// Synthetic feed with a scripted fall, exercising the full alert path
    Demo,
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Telegram helpers
    Telegram {
        #[command(subcommand)]
        action: TelegramAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the stored settings
    Show,
    /// Change one setting and save
    Set { key: String, value: String },
    /// List model files in the models directory
    Models,
}

#[derive(Subcommand, Debug)]
enum TelegramAction {
    /// Look up the chat id of the last message sent to the bot and save it
    ChatId {
        /// Bot token (defaults to the configured one)
        #[arg(long)]
        token: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut store = {
        let stage = ui.stage("Load settings");
        let store = SettingsStore::load(&args.settings)?;
        stage.done(Some(&store.path().display().to_string()));
        store
    };

    match args.command {
        Command::Settings { action } => settings_command(&mut store, action),
        Command::Telegram { action } => telegram_command(&ui, &mut store, action),
        Command::Webcam { device } => {
            let source = open_stage(
                &ui,
                SourceSpec::Webcam(WebcamConfig {
                    device,
                    ..WebcamConfig::default()
                }),
            )?;
            let detector = select_detector(&ui, &store, args.backend.as_deref())?;
            run(&ui, &store, SessionKind::Webcam, source, detector, true)
        }
        Command::Image { path } => {
            if !path.is_file() {
                return Err(anyhow!("image not found: {}", path.display()));
            }
            let source = open_stage(&ui, SourceSpec::Image(path))?;
            let detector = select_detector(&ui, &store, args.backend.as_deref())?;
            run(&ui, &store, SessionKind::Image, source, detector, false)
        }
        Command::Video { path } => {
            let source = open_stage(&ui, SourceSpec::Video(VideoConfig::new(path)))?;
            let detector = select_detector(&ui, &store, args.backend.as_deref())?;
            run(&ui, &store, SessionKind::Video, source, detector, false)
        }
        Command::Demo => {
            let label = store.effective()?.watched_label;
            let source = Box::new(SyntheticSource::new(SyntheticConfig {
                name: "stub://demo".to_string(),
                width: 320,
                height: 240,
                fps: DEMO_FPS,
                frames: Some(DEMO_FRAMES),
            }));
            let detector = Box::new(StubBackend::scripted(demo_script(&label)));
            run(&ui, &store, SessionKind::Webcam, source, detector, false)
        }
    }
}

fn settings_command(store: &mut SettingsStore, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Show => {
            println!("# {}", store.path().display());
            println!("{}", serde_json::to_string_pretty(&masked(store.stored()))?);
        }
        SettingsAction::Set { key, value } => {
            store.set(&key, &value)?;
            println!("{} updated", key);
        }
        SettingsAction::Models => {
            let settings = store.effective()?;
            let models = settings.list_models()?;
            if models.is_empty() {
                println!("no models in {}", settings.models_dir.display());
            }
            for model in models {
                let marker = if model == settings.model_name { "*" } else { " " };
                println!("{} {}", marker, model);
            }
        }
    }
    Ok(())
}

fn open_stage(ui: &ui::Ui, spec: SourceSpec) -> Result<Box<dyn FrameSource>> {
    let stage = ui.stage("Open source");
    let source = open_source(spec)?;
    stage.done(Some(&source.describe()));
    Ok(source)
}

fn telegram_command(ui: &ui::Ui, store: &mut SettingsStore, action: TelegramAction) -> Result<()> {
    match action {
        TelegramAction::ChatId { token } => {
            let token = match token {
                Some(token) => token,
                None => store.effective()?.telegram_token,
            };
            if token.trim().is_empty() {
                return Err(anyhow!(
                    "no telegram token; pass --token or set telegram_token first"
                ));
            }
            let stage = ui.stage("Look up Telegram chat id");
            let chat_id = discover_chat_id(DEFAULT_API_BASE, token.trim())?;
            stage.done(chat_id.as_deref());
            match chat_id {
                Some(chat_id) => {
                    if store.stored().telegram_token.trim().is_empty() {
                        store.set("telegram_token", &token)?;
                    }
                    store.set("telegram_chat_id", &chat_id)?;
                    println!("chat id {} saved", chat_id);
                }
                None => println!("no messages yet; send /start to the bot and retry"),
            }
            Ok(())
        }
    }
}

/// Stub is always available; tract joins when a model file is present.
fn select_detector(
    ui: &ui::Ui,
    store: &SettingsStore,
    name: Option<&str>,
) -> Result<Box<dyn DetectorBackend>> {
    let settings = store.effective()?;
    let stage = ui.stage("Select detector");
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());
    register_model(&mut registry, &settings)?;

    let backend = registry.select(name)?;
    stage.done(Some(backend.name()));
    if backend.name() == "stub" {
        log::warn!(
            "using the stub detector; no {} will be detected (available: {})",
            settings.watched_label,
            registry.list().join(", ")
        );
    }
    Ok(Box::new(backend))
}

#[cfg(feature = "backend-tract")]
fn register_model(registry: &mut BackendRegistry, settings: &Settings) -> Result<()> {
    use fall_sentinel::detect::{TractBackend, TractConfig};

    let model_path = settings.model_path();
    if !model_path.is_file() {
        log::warn!("model {} not found", model_path.display());
        return Ok(());
    }
    log::info!("loading model {}", model_path.display());
    registry.register(TractBackend::new(TractConfig::new(
        model_path,
        settings.model_input_size,
        settings.class_names.clone(),
    ))?);
    registry.set_default("tract")
}

#[cfg(not(feature = "backend-tract"))]
fn register_model(_registry: &mut BackendRegistry, settings: &Settings) -> Result<()> {
    log::warn!(
        "built without backend-tract; model {} is not loaded",
        settings.model_path().display()
    );
    Ok(())
}

fn run(
    ui: &ui::Ui,
    store: &SettingsStore,
    kind: SessionKind,
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    interactive: bool,
) -> Result<()> {
    let settings = store.effective()?;
    settings.ensure_folders()?;
    let config = store.session_config()?;
    let notifier = notifier_for(config.telegram.as_ref())?;

    // Video scans also write an annotated copy at the source frame rate.
    let recorder = match kind {
        SessionKind::Video => video_recorder(
            &config.output_dir,
            &source.describe(),
            source.frame_rate().unwrap_or(FALLBACK_FPS),
        )?,
        _ => None,
    };
    let mut session = Session::new(kind, config, source, detector, notifier);
    if let Some(recorder) = recorder {
        session = session.with_recorder(recorder);
    }

    let handle = spawn_session(session)?;
    let stop = handle.stop_flag();
    ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
        .context("error setting Ctrl-C handler")?;
    if interactive {
        eprintln!("type `s` + Enter for a snapshot, `q` + Enter to stop");
        spawn_stdin_commands(handle.commands())?;
    }

    let mut progress = None;
    for event in handle.events.iter() {
        match event {
            SessionEvent::Started {
                source,
                frames_hint,
                ..
            } => progress = Some(ui.frames(&format!("{} {}", kind, source), frames_hint)),
            SessionEvent::Progress { frames, .. } => {
                if let Some(bar) = &progress {
                    bar.set_frames(frames);
                }
            }
            SessionEvent::Alert { at, snapshot } => {
                let line = match snapshot {
                    Some(path) => format!(
                        "ALERT at {:.1}s, snapshot {}",
                        at.as_secs_f64(),
                        path.display()
                    ),
                    None => format!("ALERT at {:.1}s", at.as_secs_f64()),
                };
                emit_line(progress.as_ref(), &line);
            }
            SessionEvent::Snapshot { path } => {
                emit_line(progress.as_ref(), &format!("snapshot {}", path.display()))
            }
            SessionEvent::NotificationFailed { reason } => {
                emit_line(progress.as_ref(), &format!("notification failed: {}", reason))
            }
            SessionEvent::Finished(summary) => {
                if let Some(bar) = &progress {
                    bar.set_frames(summary.frames);
                    bar.finish();
                }
            }
            SessionEvent::Failed(_) => {
                if let Some(bar) = &progress {
                    bar.finish();
                }
            }
        }
    }

    let summary = handle.join()?;
    print_summary(&summary);
    Ok(())
}

fn emit_line(progress: Option<&ui::FrameProgress>, line: &str) {
    match progress {
        Some(bar) => bar.println(line),
        None => eprintln!("{line}"),
    }
}

/// Forward `s` and `q` lines from stdin to the session.
fn spawn_stdin_commands(commands: Sender<SessionCommand>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let command = match line.trim() {
                    "s" | "snapshot" => SessionCommand::Snapshot,
                    "q" | "quit" | "stop" => SessionCommand::Stop,
                    "" => continue,
                    other => {
                        eprintln!("unknown command '{}' (s = snapshot, q = stop)", other);
                        continue;
                    }
                };
                let stop = command == SessionCommand::Stop;
                if commands.send(command).is_err() || stop {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(())
}

fn print_summary(summary: &SessionSummary) {
    println!(
        "{} session: {} frames, {} with condition, {} alerts{}",
        summary.kind,
        summary.frames,
        summary.condition_frames,
        summary.alerts,
        if summary.stopped { " (stopped)" } else { "" }
    );
    if let Some(output) = &summary.output {
        println!("annotated output: {}", output.display());
    }
}

fn masked(settings: &Settings) -> Settings {
    let mut shown = settings.clone();
    if !shown.telegram_token.is_empty() {
        shown.telegram_token = "********".to_string();
    }
    shown
}

/// Fall visible from 2s to 20s with a one-frame dropout at 4s.
fn demo_script(label: &str) -> Vec<Vec<Detection>> {
    let fps = u64::from(DEMO_FPS);
    let fall = Detection::new(label, 0.82, BoundingBox::new(110.0, 140.0, 230.0, 200.0));
    (0..DEMO_FRAMES)
        .map(|i| {
            if (2 * fps..20 * fps).contains(&i) && i != 4 * fps {
                vec![fall.clone()]
            } else {
                Vec::new()
            }
        })
        .collect()
}
