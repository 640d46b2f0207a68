use subwatch_core::ports::MessageOptions;
use tracing::info;

use super::format::html_to_plain;

/// Writes notifications to the log when no chat is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
  pub fn send(&self, text: &str, options: MessageOptions) {
    let text = html_to_plain(text);
    info!(target: "subwatch::notify", silent = options.disable_notification, "{text}");
  }
}
