//! Telegram Bot API client.
//!
//! Sends a text message via `sendMessage`, then uploads the attachment (if any)
//! via `sendPhoto` or `sendVideo` with the file name as caption. A failed
//! text message does not prevent the attachment upload; all failures are
//! collected into the returned error.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use super::multipart::MultipartForm;
use super::{Attachment, Notification, Notifier};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);
const PHOTO_TIMEOUT: Duration = Duration::from_secs(30);
const VIDEO_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
    /// Bot API root. Overridable for self-hosted Bot API servers and tests.
    pub api_base: String,
}

impl TelegramConfig {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            chat_id: chat_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

/// Bot API envelope: `{"ok": bool, "description": "...", "result": ...}`.
#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(default)]
    message: Option<UpdateMessage>,
}

#[derive(Debug, Deserialize)]
struct UpdateMessage {
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

pub struct TelegramNotifier {
    config: TelegramConfig,
    agent: ureq::Agent,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        validate_api_base(&config.api_base)?;
        if config.token.trim().is_empty() || config.chat_id.trim().is_empty() {
            return Err(anyhow!("telegram token and chat id are required"));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(MESSAGE_TIMEOUT)
            .build();
        Ok(Self { config, agent })
    }

    fn send_message(&self, text: &str) -> Result<()> {
        let url = method_url(&self.config.api_base, &self.config.token, "sendMessage");
        let response = self
            .agent
            .post(&url)
            .timeout(MESSAGE_TIMEOUT)
            .send_form(&[("chat_id", self.config.chat_id.as_str()), ("text", text)]);
        read_reply::<serde_json::Value>("sendMessage", response).map(|_| ())
    }

    fn send_file(&self, attachment: &Attachment) -> Result<()> {
        let (method, field, timeout) = match attachment {
            Attachment::Photo(_) => ("sendPhoto", "photo", PHOTO_TIMEOUT),
            Attachment::Video(_) => ("sendVideo", "video", VIDEO_TIMEOUT),
        };
        let path = attachment.path();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read attachment {}", path.display()))?;
        let filename = file_name(path);

        let form = MultipartForm::new()
            .text("chat_id", &self.config.chat_id)
            .text("caption", &filename)
            .file(field, &filename, content_type_for(path), &bytes);
        let content_type = form.content_type();
        let body = form.finish();

        let url = method_url(&self.config.api_base, &self.config.token, method);
        let response = self
            .agent
            .post(&url)
            .timeout(timeout)
            .set("Content-Type", &content_type)
            .send_bytes(&body);
        read_reply::<serde_json::Value>(method, response).map(|_| ())
    }
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn notify(&mut self, notification: &Notification) -> Result<()> {
        let mut failures = Vec::new();

        if let Err(err) = self.send_message(&notification.message) {
            failures.push(format!("{:#}", err));
        }

        if let Some(attachment) = &notification.attachment {
            if attachment.path().exists() {
                if let Err(err) = self.send_file(attachment) {
                    failures.push(format!("{:#}", err));
                }
            } else {
                log::warn!(
                    "telegram: attachment {} missing; sent text only",
                    attachment.path().display()
                );
            }
        }

        if failures.is_empty() {
            log::debug!("telegram: delivered '{}'", notification.message);
            Ok(())
        } else {
            Err(anyhow!(failures.join("; ")))
        }
    }
}

/// Find the chat id of the most recent message sent to the bot.
///
/// The user has to message the bot (e.g. `/start`) first. Returns `None` when
/// there are no pending updates.
pub fn discover_chat_id(api_base: &str, token: &str) -> Result<Option<String>> {
    validate_api_base(api_base)?;
    let url = method_url(api_base, token, "getUpdates");
    let response = ureq::get(&url).timeout(MESSAGE_TIMEOUT).call();
    let updates: Vec<Update> = read_reply("getUpdates", response)?.unwrap_or_default();
    Ok(updates
        .into_iter()
        .rev()
        .find_map(|update| update.message)
        .map(|message| message.chat.id.to_string()))
}

fn read_reply<T: serde::de::DeserializeOwned>(
    method: &str,
    response: std::result::Result<ureq::Response, ureq::Error>,
) -> Result<Option<T>> {
    let body = match response {
        Ok(response) => response
            .into_string()
            .with_context(|| format!("telegram {} response unreadable", method))?,
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            return Err(anyhow!("telegram {} failed ({}): {}", method, code, body));
        }
        Err(err) => {
            return Err(anyhow::Error::new(err).context(format!("telegram {} request failed", method)))
        }
    };
    let reply: ApiReply<T> = serde_json::from_str(&body)
        .with_context(|| format!("telegram {} returned malformed JSON", method))?;
    if !reply.ok {
        return Err(anyhow!(
            "telegram {} rejected: {}",
            method,
            reply.description.unwrap_or_else(|| "no description".to_string())
        ));
    }
    Ok(reply.result)
}

fn validate_api_base(api_base: &str) -> Result<()> {
    let url = Url::parse(api_base).with_context(|| format!("invalid telegram api base '{}'", api_base))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!(
            "unsupported telegram api scheme '{}'; expected http(s)",
            other
        )),
    }
}

fn method_url(api_base: &str, token: &str, method: &str) -> String {
    format!("{}/bot{}/{}", api_base.trim_end_matches('/'), token, method)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "attachment".to_string())
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}
