//! Runtime configuration: `config.toml` overlaid with `SUBWATCH_*`
//! environment variables.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use subwatch_engine::DEFAULT_REPORT_CRON;

/// Which [`subwatch_bus::Bus`] backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusKind {
  #[default]
  InProcess,
  /// The durable bus over an in-process broker.
  Local,
  Amqp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub database_path:        PathBuf,
  pub interval_secs:        u64,
  pub report_cron:          String,
  /// Default level when `RUST_LOG` is unset.
  pub log_level:            Option<String>,
  pub twitch_client_id:     Option<String>,
  pub twitch_client_secret: Option<String>,
  /// Without both Telegram settings notifications go to the log.
  pub telegram_bot_token:   Option<String>,
  pub telegram_chat_id:     Option<String>,
  pub event_bus:            BusKind,
  pub amqp_url:             Option<String>,
  pub amqp_exchange:        String,
  pub amqp_queue:           Option<String>,
  pub amqp_prefetch:        u16,
  pub dedup_capacity:       usize,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      database_path:        PathBuf::from("subwatch.db"),
      interval_secs:        300,
      report_cron:          DEFAULT_REPORT_CRON.to_owned(),
      log_level:            None,
      twitch_client_id:     None,
      twitch_client_secret: None,
      telegram_bot_token:   None,
      telegram_chat_id:     None,
      event_bus:            BusKind::InProcess,
      amqp_url:             None,
      amqp_exchange:        "subwatch.events".to_owned(),
      amqp_queue:           None,
      amqp_prefetch:        10,
      dedup_capacity:       subwatch_bus::DEFAULT_DEDUP_CAPACITY,
    }
  }
}

impl AppConfig {
  /// Read `path` if it exists, then apply the environment.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("SUBWATCH"))
      .build()?
      .try_deserialize()
  }

  /// Bot token and chat id, when both are set and non-empty.
  pub fn telegram(&self) -> Option<(&str, &str)> {
    let token = self.telegram_bot_token.as_deref().filter(|s| !s.is_empty())?;
    let chat = self.telegram_chat_id.as_deref().filter(|s| !s.is_empty())?;
    Some((token, chat))
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
