//! The reconciliation engine: the watch loop, daily reporting, the
//! day-change scheduler and the handlers that turn domain events into
//! notifications.
//!
//! Everything here is generic over the ports in [`subwatch_core::ports`] and
//! over [`subwatch_bus::EventBus`], so the binary decides which lookup client,
//! store, notifier and bus backend to plug in.

mod cancel;
mod handlers;
mod reporting;
mod scheduler;
mod sources;
mod watcher;
mod watchlist;

pub mod error;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use handlers::register_notification_handlers;
pub use reporting::{DailyReportCollector, Report, ReportSnapshot};
pub use scheduler::{DEFAULT_REPORT_CRON, DayChangeScheduler};
pub use sources::{StaticIdentities, WatchlistIdentities};
pub use watcher::Watcher;
pub use watchlist::WatchlistService;

#[cfg(test)]
mod fakes;
