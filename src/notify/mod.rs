//! Outbound notifications.
//!
//! Delivery is best-effort: [`deliver`] logs failures and reports them to the
//! caller, but never aborts the session that raised the notification.

mod multipart;
pub mod telegram;

use anyhow::Result;
use std::path::{Path, PathBuf};

pub use multipart::MultipartForm;
pub use telegram::{discover_chat_id, TelegramConfig, TelegramNotifier};

/// Media attached to a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attachment {
    Photo(PathBuf),
    Video(PathBuf),
}

impl Attachment {
    pub fn path(&self) -> &Path {
        match self {
            Attachment::Photo(path) | Attachment::Video(path) => path,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub attachment: Option<Attachment>,
}

impl Notification {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attachment: None,
        }
    }

    pub fn with_photo(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            message: message.into(),
            attachment: Some(Attachment::Photo(path.into())),
        }
    }

    pub fn with_video(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            message: message.into(),
            attachment: Some(Attachment::Video(path.into())),
        }
    }
}

/// Delivers a message and optional attachment to a remote endpoint.
pub trait Notifier: Send {
    fn name(&self) -> &'static str;

    fn notify(&mut self, notification: &Notification) -> Result<()>;
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn notify(&mut self, notification: &Notification) -> Result<()> {
        (**self).notify(notification)
    }
}

/// Used when no remote endpoint is configured.
#[derive(Debug, Default)]
pub struct LogNotifier {
    sent: u64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&mut self, notification: &Notification) -> Result<()> {
        self.sent += 1;
        match &notification.attachment {
            Some(attachment) => log::info!(
                "notification: {} [{}]",
                notification.message,
                attachment.path().display()
            ),
            None => log::info!("notification: {}", notification.message),
        }
        Ok(())
    }
}

/// Pick the Telegram notifier when configured, otherwise log only.
pub fn notifier_for(telegram: Option<&TelegramConfig>) -> Result<Box<dyn Notifier>> {
    Ok(match telegram {
        Some(config) => Box::new(TelegramNotifier::new(config.clone())?),
        None => {
            log::warn!("telegram not configured; notifications are logged only");
            Box::new(LogNotifier::new())
        }
    })
}

/// Send without propagating failure. Returns the failure text, if any.
pub fn deliver(
    notifier: &mut dyn Notifier,
    notification: &Notification,
) -> std::result::Result<(), String> {
    notifier.notify(notification).map_err(|err| {
        log::warn!("{} notification failed: {:#}", notifier.name(), err);
        format!("{:#}", err)
    })
}
