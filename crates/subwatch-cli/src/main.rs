mod bot;
mod config;
mod notify;
mod twitch;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use subwatch_bus::{
  AmqpConfig, AmqpTransport, Bus, DurableBus, DurableBusConfig, EventBus, InProcessBus, LocalBroker,
};
use subwatch_engine::{
  CancelToken, DayChangeScheduler, StaticIdentities, Watcher, WatchlistIdentities,
  WatchlistService, register_notification_handlers,
};
use subwatch_store_sqlite::SqliteStore;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, filter::Directive};

use crate::{
  bot::TelegramWatchlistBot,
  config::{AppConfig, BusKind, expand_tilde},
  notify::{AppNotifier, ConsoleNotifier, TelegramNotifier},
  twitch::{TwitchClient, TwitchCredentials},
};

#[derive(Parser)]
#[command(author, version, about = "Watch Twitch channels for subscription availability")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml", env = "SUBWATCH_CONFIG")]
  config: PathBuf,

  /// Emit logs as JSON lines.
  #[arg(long)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run reconciliation passes until interrupted.
  Watch {
    /// Logins to watch. Defaults to the stored watchlist, re-read each pass.
    logins:   Vec<String>,
    /// Seconds between passes; overrides `interval_secs`.
    #[arg(short, long)]
    interval: Option<u64>,
  },
  /// Add a login to the watchlist.
  Add { login: String },
  /// Remove a login from the watchlist.
  Remove { login: String },
  /// Print the watchlist.
  List,
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let cfg = AppConfig::load(&cli.config)
    .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
  init_tracing(cfg.log_level.as_deref(), cli.json);

  let db_path = expand_tilde(&cfg.database_path);
  let store = SqliteStore::open(&db_path)
    .await
    .with_context(|| format!("failed to open database at {}", db_path.display()))?;
  let notifier = build_notifier(&cfg)?;
  // The local broker lives only as long as this process, so one-shot
  // commands fall back to dispatching in-process.
  let kind = match (&cli.command, cfg.event_bus) {
    (Command::Watch { .. }, kind) | (_, kind @ BusKind::Amqp) => kind,
    _ => BusKind::InProcess,
  };
  let bus = Arc::new(build_bus(&cfg, kind)?);

  match cli.command {
    Command::Watch { logins, interval } => {
      let interval = Duration::from_secs(interval.unwrap_or(cfg.interval_secs).max(1));
      watch(&cfg, store, notifier, bus, logins, interval).await
    }
    Command::Add { login } => {
      let service = watchlist_service(&bus, store, notifier);
      if service.add(&login).await? {
        println!("added {login}");
      } else {
        println!("{login} is already watched");
      }
      bus.stop().await?;
      Ok(())
    }
    Command::Remove { login } => {
      let service = watchlist_service(&bus, store, notifier);
      if service.remove(&login).await? {
        println!("removed {login}");
      } else {
        println!("{login} was not watched");
      }
      bus.stop().await?;
      Ok(())
    }
    Command::List => {
      let service = WatchlistService::new(store, Arc::clone(&bus));
      for login in service.list().await? {
        println!("{login}");
      }
      Ok(())
    }
  }
}

async fn watch(
  cfg: &AppConfig,
  store: SqliteStore,
  notifier: AppNotifier,
  bus: Arc<Bus>,
  logins: Vec<String>,
  interval: Duration,
) -> Result<()> {
  let (Some(client_id), Some(client_secret)) =
    (cfg.twitch_client_id.clone(), cfg.twitch_client_secret.clone())
  else {
    bail!("twitch_client_id and twitch_client_secret are required to watch");
  };
  let lookup = TwitchClient::new(TwitchCredentials { client_id, client_secret })
    .context("failed to build Twitch client")?;

  let collector = register_notification_handlers(&bus, notifier.clone(), store.clone());
  bus.start().await.context("failed to start event bus")?;

  let scheduler = DayChangeScheduler::new(Arc::clone(&bus), &cfg.report_cron)
    .context("invalid report_cron")?;
  scheduler.start();
  if let Some(next) = scheduler.next_fire() {
    info!(next = %next, "next daily report");
  }

  let cancel = CancelToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    shutdown_signal().await;
    on_signal.cancel();
  });

  let bot = match &notifier {
    AppNotifier::Telegram(telegram) => {
      let bot = TelegramWatchlistBot::new(
        telegram.clone(),
        WatchlistService::new(store.clone(), Arc::clone(&bus)),
      );
      let cancel = cancel.clone();
      Some(tokio::spawn(async move { bot.run(&cancel).await }))
    }
    AppNotifier::Console(_) => None,
  };

  info!(
    backend = bus.backend(),
    notifier = notifier.channel(),
    interval_secs = interval.as_secs(),
    "watcher starting"
  );
  let watcher = Watcher::new(lookup, store.clone(), notifier, Arc::clone(&bus));
  if logins.is_empty() {
    watcher.watch(&WatchlistIdentities::new(store), interval, &cancel).await;
  } else {
    let logins = logins.iter().map(|l| l.trim().to_lowercase());
    watcher.watch(&StaticIdentities::new(logins), interval, &cancel).await;
  }

  cancel.cancel();
  if let Some(bot) = bot
    && let Err(e) = bot.await
  {
    warn!(error = %e, "watchlist bot task failed");
  }
  scheduler.stop();
  let snapshot = collector.snapshot();
  info!(
    tracked = snapshot.tracked.len(),
    checks = snapshot.checks,
    errors = snapshot.errors,
    "unreported statistics discarded"
  );
  bus.stop().await.context("failed to stop event bus")?;
  Ok(())
}

/// Watchlist commands announce changes in-process only when nothing else is
/// consuming the bus.
fn watchlist_service(
  bus: &Arc<Bus>,
  store: SqliteStore,
  notifier: AppNotifier,
) -> WatchlistService<SqliteStore, Arc<Bus>> {
  if matches!(**bus, Bus::InProcess(_)) {
    register_notification_handlers(bus, notifier, store.clone());
  }
  WatchlistService::new(store, Arc::clone(bus))
}

// ─── Setup ───────────────────────────────────────────────────────────────────

fn init_tracing(level: Option<&str>, json: bool) {
  let default = level
    .and_then(|l| l.parse::<Directive>().ok())
    .unwrap_or_else(|| LevelFilter::INFO.into());
  let filter = EnvFilter::builder().with_default_directive(default).from_env_lossy();

  if json {
    tracing_subscriber::fmt().json().with_env_filter(filter).init();
  } else {
    tracing_subscriber::fmt().with_env_filter(filter).init();
  }
}

fn build_notifier(cfg: &AppConfig) -> Result<AppNotifier> {
  match cfg.telegram() {
    Some((token, chat_id)) => Ok(AppNotifier::Telegram(
      TelegramNotifier::new(token, chat_id).context("failed to build Telegram client")?,
    )),
    None => {
      warn!("telegram is not configured; notifications go to the log");
      Ok(AppNotifier::Console(ConsoleNotifier))
    }
  }
}

fn build_bus(cfg: &AppConfig, kind: BusKind) -> Result<Bus> {
  let durable = DurableBusConfig { dedup_capacity: cfg.dedup_capacity, ..Default::default() };
  match kind {
    BusKind::InProcess => Ok(InProcessBus::new().into()),
    BusKind::Local => {
      let queue = cfg.amqp_queue.clone().unwrap_or_else(|| "subwatch".to_owned());
      Ok(DurableBus::new(LocalBroker::new().transport(queue), durable).into())
    }
    BusKind::Amqp => {
      let Some(url) = cfg.amqp_url.clone() else {
        bail!("event_bus = \"amqp\" requires amqp_url");
      };
      let transport = AmqpTransport::new(AmqpConfig {
        url,
        exchange: cfg.amqp_exchange.clone(),
        queue: cfg.amqp_queue.clone(),
        prefetch_count: cfg.amqp_prefetch,
      });
      Ok(DurableBus::new(transport, durable).into())
    }
  }
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      warn!(error = %e, "failed to install Ctrl+C handler");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        warn!(error = %e, "failed to install SIGTERM handler");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    () = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
    () = terminate => info!("received SIGTERM, initiating graceful shutdown"),
  }
}
