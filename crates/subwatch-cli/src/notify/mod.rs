//! Outbound notifications. Messages are formatted once as Telegram HTML and
//! handed to whichever channel is configured.

pub mod format;

mod console;
mod telegram;

pub use console::ConsoleNotifier;
use subwatch_core::{
  model::{Classification, IdentityStatus, ReportLine},
  ports::{MessageOptions, Notifier},
};
pub use telegram::{Message, TelegramNotifier, Update};
use thiserror::Error;

use self::format::{
  REPORT_CHUNK_LINES, START_MESSAGE, STOP_MESSAGE, change_message, chunk, report_lines,
};

#[derive(Debug, Error)]
pub enum NotifyError {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("telegram returned {status}: {description}")]
  Telegram { status: u16, description: String },
}

#[derive(Clone)]
pub enum AppNotifier {
  Telegram(TelegramNotifier),
  Console(ConsoleNotifier),
}

impl AppNotifier {
  pub fn channel(&self) -> &'static str {
    match self {
      Self::Telegram(_) => "telegram",
      Self::Console(_) => "console",
    }
  }
}

impl Notifier for AppNotifier {
  type Error = NotifyError;

  async fn notify_about_change(
    &self,
    status: &IdentityStatus,
    current: Classification,
  ) -> Result<(), NotifyError> {
    self.send_message(&change_message(status, current), MessageOptions::default()).await
  }

  async fn notify_about_start(&self) -> Result<(), NotifyError> {
    self.send_message(START_MESSAGE, MessageOptions::silent()).await
  }

  async fn notify_about_stop(&self) -> Result<(), NotifyError> {
    self.send_message(STOP_MESSAGE, MessageOptions::silent()).await
  }

  /// Long reports go out as several silent messages.
  async fn notify_report(
    &self,
    lines: &[ReportLine],
    checks: u64,
    errors: u64,
  ) -> Result<(), NotifyError> {
    for message in chunk(&report_lines(lines, checks, errors), REPORT_CHUNK_LINES) {
      self.send_message(&message, MessageOptions::silent()).await?;
    }
    Ok(())
  }

  async fn send_message(&self, text: &str, options: MessageOptions) -> Result<(), NotifyError> {
    match self {
      Self::Telegram(t) => t.send(text, options).await,
      Self::Console(c) => {
        c.send(text, options);
        Ok(())
      }
    }
  }
}
