//! Persisted settings and per-session configuration snapshots.
//!
//! Settings live in a flat JSON file. Missing keys fall back to defaults, an
//! unreadable file falls back to defaults without being overwritten, and a
//! missing file is created with defaults on first load.
//!
//! Sessions never read the store directly: they take a [`SessionConfig`]
//! snapshot at start, so editing settings mid-run cannot affect a running
//! session.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::debounce::{DebounceConfig, DEFAULT_COOLDOWN_SECS, DEFAULT_SUSTAIN_SECS};
use crate::detect::FallCondition;
use crate::notify::TelegramConfig;

pub const SETTINGS_ENV: &str = "FALL_SENTINEL_SETTINGS";
pub const DEFAULT_SETTINGS_PATH: &str = "settings.json";

const DEFAULT_MODEL_NAME: &str = "yolo11n_fall.onnx";
const DEFAULT_MODELS_DIR: &str = "models";
const DEFAULT_OUTPUT_DIR: &str = "outputs";
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
const DEFAULT_WATCHED_LABEL: &str = "fall";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;
const MODEL_EXTENSION: &str = "onnx";

/// Keys accepted by [`SettingsStore::set`].
pub const SETTING_KEYS: &[&str] = &[
    "model_name",
    "models_dir",
    "output_dir",
    "confidence_threshold",
    "watched_label",
    "class_names",
    "wait_time",
    "notify_cooldown",
    "model_input_size",
    "label_font",
    "telegram_token",
    "telegram_chat_id",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model_name: String,
    pub models_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(deserialize_with = "number_or_string")]
    pub confidence_threshold: f64,
    pub watched_label: String,
    pub class_names: Vec<String>,
    /// Seconds the condition must hold before alerting.
    #[serde(deserialize_with = "number_or_string")]
    pub wait_time: f64,
    /// Minimum seconds between two alerts.
    #[serde(deserialize_with = "number_or_string")]
    pub notify_cooldown: f64,
    pub model_input_size: u32,
    /// TrueType font for box labels. Empty searches common system fonts.
    pub label_font: String,
    pub telegram_token: String,
    #[serde(deserialize_with = "string_or_number")]
    pub telegram_chat_id: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            watched_label: DEFAULT_WATCHED_LABEL.to_string(),
            class_names: vec![DEFAULT_WATCHED_LABEL.to_string()],
            wait_time: DEFAULT_SUSTAIN_SECS,
            notify_cooldown: DEFAULT_COOLDOWN_SECS,
            model_input_size: DEFAULT_MODEL_INPUT_SIZE,
            label_font: String::new(),
            telegram_token: String::new(),
            telegram_chat_id: String::new(),
        }
    }
}

impl Settings {
    /// Path of the selected model file.
    pub fn model_path(&self) -> PathBuf {
        self.models_dir.join(&self.model_name)
    }

    /// Overlay `FALL_SENTINEL_*` environment overrides. Blank values are ignored.
    pub fn apply_env(&mut self) {
        if let Some(dir) = non_blank_env("FALL_SENTINEL_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(token) = non_blank_env("FALL_SENTINEL_TELEGRAM_TOKEN") {
            self.telegram_token = token;
        }
        if let Some(chat_id) = non_blank_env("FALL_SENTINEL_TELEGRAM_CHAT_ID") {
            self.telegram_chat_id = chat_id;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be between 0.0 and 1.0 (got {})",
                self.confidence_threshold
            ));
        }
        seconds("wait_time", self.wait_time)?;
        seconds("notify_cooldown", self.notify_cooldown)?;
        if self.watched_label.trim().is_empty() {
            return Err(anyhow!("watched_label must not be empty"));
        }
        if self.model_input_size == 0 || self.model_input_size % 32 != 0 {
            return Err(anyhow!(
                "model_input_size must be a positive multiple of 32 (got {})",
                self.model_input_size
            ));
        }
        let token = self.telegram_token.trim();
        if !token.is_empty() && !token_pattern().is_match(token) {
            return Err(anyhow!(
                "telegram_token must look like <bot id>:<key> as issued by BotFather"
            ));
        }
        Ok(())
    }

    /// Telegram credentials, when both token and chat id are set.
    pub fn telegram(&self) -> Option<TelegramConfig> {
        let token = self.telegram_token.trim();
        let chat_id = self.telegram_chat_id.trim();
        if token.is_empty() || chat_id.is_empty() {
            return None;
        }
        Some(TelegramConfig::new(token, chat_id))
    }

    /// Create the output and models directories.
    pub fn ensure_folders(&self) -> Result<()> {
        for dir in [&self.output_dir, &self.models_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Model files available in `models_dir`, sorted by name.
    pub fn list_models(&self) -> Result<Vec<String>> {
        list_models(&self.models_dir)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "model_name" => self.model_name = value.to_string(),
            "models_dir" => self.models_dir = PathBuf::from(value),
            "output_dir" => {
                self.output_dir = PathBuf::from(if value.is_empty() {
                    DEFAULT_OUTPUT_DIR
                } else {
                    value
                })
            }
            "confidence_threshold" => self.confidence_threshold = parse_number(key, value)?,
            "watched_label" => self.watched_label = value.to_string(),
            "class_names" => {
                self.class_names = value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            "wait_time" => self.wait_time = parse_number(key, value)?,
            "notify_cooldown" => self.notify_cooldown = parse_number(key, value)?,
            "model_input_size" => {
                self.model_input_size = value
                    .parse()
                    .map_err(|_| anyhow!("model_input_size must be an integer"))?
            }
            "label_font" => self.label_font = value.to_string(),
            "telegram_token" => self.telegram_token = value.to_string(),
            "telegram_chat_id" => self.telegram_chat_id = value.to_string(),
            other => {
                return Err(anyhow!(
                    "unknown setting '{}' (expected one of: {})",
                    other,
                    SETTING_KEYS.join(", ")
                ))
            }
        }
        Ok(())
    }
}

/// Immutable configuration captured once at session start.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub debounce: DebounceConfig,
    pub condition: FallCondition,
    pub output_dir: PathBuf,
    /// Explicit label font; `None` searches system fonts.
    pub label_font: Option<PathBuf>,
    pub telegram: Option<TelegramConfig>,
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            debounce: DebounceConfig {
                sustain: seconds("wait_time", settings.wait_time)?,
                cooldown: seconds("notify_cooldown", settings.notify_cooldown)?,
            },
            condition: FallCondition::new(
                settings.watched_label.trim(),
                settings.confidence_threshold as f32,
            ),
            output_dir: settings.output_dir.clone(),
            label_font: Some(settings.label_font.trim())
                .filter(|font| !font.is_empty())
                .map(PathBuf::from),
            telegram: settings.telegram(),
        })
    }
}

/// File-backed settings owned by the interactive layer.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl SettingsStore {
    /// Load from `FALL_SENTINEL_SETTINGS`, or `settings.json` in the working directory.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(SETTINGS_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string());
        Self::load(path)
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            let store = Self {
                path,
                settings: Settings::default(),
            };
            store.save()?;
            log::info!("settings: wrote defaults to {}", store.path.display());
            return Ok(store);
        }

        let settings = match read_settings_file(&path) {
            Ok(settings) => settings,
            Err(err) => {
                log::warn!("settings: {:#}; using defaults", err);
                Settings::default()
            }
        };
        Ok(Self { path, settings })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Values as stored on disk, without environment overrides.
    pub fn stored(&self) -> &Settings {
        &self.settings
    }

    /// Stored values with environment overrides applied and validated.
    pub fn effective(&self) -> Result<Settings> {
        let mut settings = self.settings.clone();
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Snapshot for a new session.
    pub fn session_config(&self) -> Result<SessionConfig> {
        SessionConfig::from_settings(&self.effective()?)
    }

    /// Change one key, validate the result, and persist it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut candidate = self.settings.clone();
        candidate.set(key, value)?;
        candidate.validate()?;
        self.settings = candidate;
        self.save()?;
        self.settings.ensure_folders()
    }

    /// Replace all settings at once.
    pub fn replace(&mut self, settings: Settings) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        let serialized = serde_json::to_string_pretty(&self.settings)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write settings to {}", self.path.display()))
    }
}

/// Model files with the `.onnx` extension (case-insensitive), sorted.
pub fn list_models(models_dir: &Path) -> Result<Vec<String>> {
    if !models_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(models_dir)
        .with_context(|| format!("failed to list {}", models_dir.display()))?;
    let mut models = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_model = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION));
        if path.is_file() && is_model {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                models.push(name.to_string());
            }
        }
    }
    models.sort();
    Ok(models)
}

fn read_settings_file(path: &Path) -> Result<Settings> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read settings file {}: {}", path.display(), e))?;
    let settings = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid settings file {}: {}", path.display(), e))?;
    Ok(settings)
}

fn seconds(key: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds (got {})", key, value))
}

fn parse_number(key: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| anyhow!("{} must be a number (got '{}')", key, value))
}

fn non_blank_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+:[A-Za-z0-9_-]+$").expect("static regex"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(v) => Ok(v),
        NumberOrString::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{}'", text))),
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Integer(i64),
        Text(String),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Integer(v) => v.to_string(),
        Raw::Text(text) => text,
    })
}
