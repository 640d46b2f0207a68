//! Watchlist management through Telegram chat commands.
//!
//! The bot long-polls `getUpdates` and answers `/add <login>`,
//! `/remove <login>` and `/list` from the configured chat only.

use std::time::Duration;

use subwatch_bus::EventBus;
use subwatch_core::ports::{MessageOptions, WatchlistRepository};
use subwatch_engine::{CancelToken, Error as EngineError, WatchlistService};
use tracing::{info, warn};

use crate::notify::{
  Message, TelegramNotifier, Update,
  format::{REPORT_CHUNK_LINES, channel_url, chunk, escape},
};

const POLL_WAIT: Duration = Duration::from_secs(25);
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
  Add(String),
  Remove(String),
  List,
  /// A known command with a missing argument.
  Usage(&'static str),
  Unknown,
}

impl BotCommand {
  /// Returns `None` for text that is not a command. A `@botname` suffix on
  /// the command is ignored.
  pub fn parse(text: &str) -> Option<Self> {
    let text = text.trim();
    if !text.starts_with('/') {
      return None;
    }
    let (head, arg) = match text.split_once(char::is_whitespace) {
      Some((head, arg)) => (head, arg.trim()),
      None => (text, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    Some(match (name, arg) {
      ("/add", "") => Self::Usage("Usage: /add <username>"),
      ("/add", login) => Self::Add(login.to_owned()),
      ("/remove", "") => Self::Usage("Usage: /remove <username>"),
      ("/remove", login) => Self::Remove(login.to_owned()),
      ("/list", "") => Self::List,
      _ => Self::Unknown,
    })
  }
}

pub struct TelegramWatchlistBot<W, B> {
  telegram: TelegramNotifier,
  service:  WatchlistService<W, B>,
}

impl<W: WatchlistRepository, B: EventBus> TelegramWatchlistBot<W, B> {
  pub fn new(telegram: TelegramNotifier, service: WatchlistService<W, B>) -> Self {
    Self { telegram, service }
  }

  /// Poll until `cancel` fires. Poll failures are logged and retried.
  pub async fn run(&self, cancel: &CancelToken) {
    info!(chat_id = self.telegram.chat_id(), "watchlist bot polling");
    let mut offset = None;
    loop {
      let polled = tokio::select! {
        () = cancel.cancelled() => break,
        polled = self.telegram.get_updates(offset, POLL_WAIT) => polled,
      };
      match polled {
        Ok(updates) => {
          for update in updates {
            offset = Some(update.update_id + 1);
            self.handle_update(update).await;
          }
        }
        Err(e) => {
          warn!(error = %e, "failed to poll telegram updates");
          tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(RETRY_DELAY) => {}
          }
        }
      }
    }
    info!("watchlist bot stopped");
  }

  async fn handle_update(&self, update: Update) {
    let Some(Message { chat, text: Some(text) }) = update.message else { return };
    let Some(replies) = self.replies(chat.id, &text).await else { return };
    for reply in replies {
      if let Err(e) = self.telegram.send(&reply, MessageOptions::default()).await {
        warn!(error = %e, "failed to send bot reply");
      }
    }
  }

  /// Messages answering `text`, or `None` when it came from another chat or
  /// is not a command.
  pub async fn replies(&self, chat_id: i64, text: &str) -> Option<Vec<String>> {
    if chat_id.to_string() != self.telegram.chat_id() {
      info!(chat_id, "ignoring message from unregistered chat");
      return None;
    }
    let command = BotCommand::parse(text)?;
    Some(self.execute(command).await)
  }

  async fn execute(&self, command: BotCommand) -> Vec<String> {
    match command {
      BotCommand::Add(login) => vec![match self.service.add(&login).await {
        Ok(true) => format!("Added {}", escape(&login)),
        Ok(false) => format!("{} already present", escape(&login)),
        Err(e) => failure(&login, e),
      }],
      BotCommand::Remove(login) => vec![match self.service.remove(&login).await {
        Ok(true) => format!("Removed {}", escape(&login)),
        Ok(false) => format!("{} not found", escape(&login)),
        Err(e) => failure(&login, e),
      }],
      BotCommand::List => match self.service.list().await {
        Ok(logins) if logins.is_empty() => vec!["Watchlist is empty".to_owned()],
        Ok(logins) => chunk(&list_lines(&logins), REPORT_CHUNK_LINES),
        Err(e) => vec![failure("", e)],
      },
      BotCommand::Usage(usage) => vec![usage.to_owned()],
      BotCommand::Unknown => vec!["Unknown command".to_owned()],
    }
  }
}

fn failure(login: &str, error: EngineError) -> String {
  match error {
    EngineError::InvalidIdentity(_) => format!("Invalid login: {}", escape(login)),
    e => {
      warn!(identity = login, error = %e, "watchlist command failed");
      "Watchlist update failed".to_owned()
    }
  }
}

fn list_lines(logins: &[String]) -> Vec<String> {
  let mut lines = vec!["📊 <b>List</b>".to_owned(), String::new()];
  lines.extend(
    logins
      .iter()
      .map(|login| format!("• <a href=\"{}\">{}</a>", channel_url(login), escape(login))),
  );
  lines
}

#[cfg(test)]
mod tests {
  use subwatch_bus::InProcessBus;
  use subwatch_store_sqlite::SqliteStore;

  use super::*;

  const CHAT: i64 = 42;

  async fn bot() -> TelegramWatchlistBot<SqliteStore, InProcessBus> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let telegram = TelegramNotifier::new("123:abc", CHAT.to_string()).unwrap();
    TelegramWatchlistBot::new(telegram, WatchlistService::new(store, InProcessBus::new()))
  }

  async fn reply(bot: &TelegramWatchlistBot<SqliteStore, InProcessBus>, text: &str) -> String {
    bot.replies(CHAT, text).await.unwrap().join("\n")
  }

  #[test]
  fn commands_parse() {
    assert_eq!(BotCommand::parse("/add Alice"), Some(BotCommand::Add("Alice".into())));
    assert_eq!(BotCommand::parse("  /remove   bob "), Some(BotCommand::Remove("bob".into())));
    assert_eq!(BotCommand::parse("/list"), Some(BotCommand::List));
    assert_eq!(BotCommand::parse("/list@subwatch_bot"), Some(BotCommand::List));
    assert_eq!(BotCommand::parse("/add@subwatch_bot carol"), Some(BotCommand::Add("carol".into())));
    assert_eq!(BotCommand::parse("/add"), Some(BotCommand::Usage("Usage: /add <username>")));
    assert_eq!(BotCommand::parse("/remove"), Some(BotCommand::Usage("Usage: /remove <username>")));
    assert_eq!(BotCommand::parse("/list everything"), Some(BotCommand::Unknown));
    assert_eq!(BotCommand::parse("/start"), Some(BotCommand::Unknown));
    assert_eq!(BotCommand::parse("hello"), None);
    assert_eq!(BotCommand::parse(""), None);
  }

  #[tokio::test]
  async fn add_remove_and_list() {
    let bot = bot().await;
    assert_eq!(reply(&bot, "/list").await, "Watchlist is empty");
    assert_eq!(reply(&bot, "/add zed").await, "Added zed");
    assert_eq!(reply(&bot, "/add ZED").await, "ZED already present");
    assert_eq!(reply(&bot, "/add amy").await, "Added amy");
    assert_eq!(
      reply(&bot, "/list").await,
      "📊 <b>List</b>\n\n• <a href=\"https://www.twitch.tv/amy\">amy</a>\n• <a \
       href=\"https://www.twitch.tv/zed\">zed</a>"
    );
    assert_eq!(reply(&bot, "/remove zed").await, "Removed zed");
    assert_eq!(reply(&bot, "/remove zed").await, "zed not found");
  }

  #[tokio::test]
  async fn invalid_and_unknown_commands_get_an_answer() {
    let bot = bot().await;
    assert_eq!(reply(&bot, "/add a b").await, "Invalid login: a b");
    assert_eq!(reply(&bot, "/add").await, "Usage: /add <username>");
    assert_eq!(reply(&bot, "/help").await, "Unknown command");
  }

  #[tokio::test]
  async fn other_chats_and_plain_text_are_ignored() {
    let bot = bot().await;
    assert!(bot.replies(7, "/add mallory").await.is_none());
    assert!(bot.replies(CHAT, "just chatting").await.is_none());
    assert_eq!(reply(&bot, "/list").await, "Watchlist is empty");
  }

  #[tokio::test]
  async fn long_lists_are_split() {
    let bot = bot().await;
    for i in 0..150 {
      bot.replies(CHAT, &format!("/add user{i:03}")).await.unwrap();
    }
    let messages = bot.replies(CHAT, "/list").await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].lines().count(), REPORT_CHUNK_LINES);
    assert!(messages[1].ends_with("user149</a>"));
  }
}
