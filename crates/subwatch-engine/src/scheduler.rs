//! Publishes `DayChanged` on a cron schedule.

use std::{
  str::FromStr as _,
  sync::{Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use chrono::{DateTime, Local};
use cron::Schedule;
use subwatch_bus::EventBus;
use subwatch_core::event::DomainEvent;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Midnight, every day.
pub const DEFAULT_REPORT_CRON: &str = "0 0 * * *";

pub struct DayChangeScheduler<B> {
  bus:        B,
  expression: String,
  schedule:   Schedule,
  job:        Mutex<Option<JoinHandle<()>>>,
}

impl<B: EventBus + Clone + 'static> DayChangeScheduler<B> {
  /// Accepts standard five-field expressions (`min hour dom mon dow`, Sunday
  /// is 0 or 7) as well as the six- and seven-field forms of the `cron` crate,
  /// which have seconds and years and number weekdays 1-7 from Sunday.
  pub fn new(bus: B, expression: &str) -> Result<Self> {
    let schedule = parse_schedule(expression)?;
    Ok(Self {
      bus,
      expression: expression.to_owned(),
      schedule,
      job: Mutex::new(None),
    })
  }

  pub fn expression(&self) -> &str { &self.expression }

  pub fn next_fire(&self) -> Option<DateTime<Local>> { self.schedule.upcoming(Local).next() }

  pub fn is_running(&self) -> bool { self.job().is_some() }

  /// Start the timer. Calling it again while running does nothing. Must be
  /// called from within a tokio runtime.
  pub fn start(&self) {
    let mut job = self.job();
    if job.is_some() {
      return;
    }

    let bus = self.bus.clone();
    let schedule = self.schedule.clone();
    *job = Some(tokio::spawn(async move {
      loop {
        let Some(next) = schedule.upcoming(Local).next() else { break };
        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(next = %next, "day change scheduled");
        tokio::time::sleep(wait).await;
        if let Err(e) = emit(&bus).await {
          warn!(error = %e, "failed to publish DayChanged");
        }
      }
      info!("cron schedule exhausted");
    }));
    info!(cron = %self.expression, "day change scheduler started");
  }

  /// Cancel the timer. Safe to call when not started.
  pub fn stop(&self) {
    if let Some(job) = self.job().take() {
      job.abort();
      info!("day change scheduler stopped");
    }
  }

  /// Publish `DayChanged` now.
  pub async fn emit(&self) -> Result<()> { emit(&self.bus).await }

  fn job(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    self.job.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<B> Drop for DayChangeScheduler<B> {
  fn drop(&mut self) {
    if let Some(job) = self.job.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
      job.abort();
    }
  }
}

async fn emit<B: EventBus>(bus: &B) -> Result<()> {
  bus.publish_one(DomainEvent::day_changed()).await?;
  Ok(())
}

fn parse_schedule(expression: &str) -> Result<Schedule> {
  let invalid = |reason: String| Error::Cron { expr: expression.to_owned(), reason };

  let fields: Vec<&str> = expression.split_whitespace().collect();
  let normalized = match fields.as_slice() {
    [minute, hour, dom, month, dow] => {
      let dow = weekday_field(dow).map_err(invalid)?;
      format!("0 {minute} {hour} {dom} {month} {dow}")
    }
    _ => fields.join(" "),
  };
  Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
}

/// The `cron` crate numbers weekdays 1-7 from Sunday; five-field expressions
/// use 0-7 with both 0 and 7 meaning Sunday. Numbers become names.
const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

fn weekday_field(field: &str) -> std::result::Result<String, String> {
  let items = field.split(',').map(weekday_item).collect::<std::result::Result<Vec<_>, _>>()?;
  Ok(items.join(","))
}

fn weekday_item(item: &str) -> std::result::Result<String, String> {
  let (range, step) = match item.split_once('/') {
    Some((range, step)) => (range, Some(step)),
    None => (item, None),
  };
  let step = step.map(|s| format!("/{s}")).unwrap_or_default();

  let Some((start, end)) = range.split_once('-') else {
    return Ok(format!("{}{step}", weekday(range)?));
  };
  // `5-7` cannot wrap past Saturday; end on Saturday and add Sunday back.
  if end == "7" {
    let sunday = if step.is_empty() { ",Sun" } else { "" };
    return Ok(format!("{}-Sat{step}{sunday}", weekday(start)?));
  }
  Ok(format!("{}-{}{step}", weekday(start)?, weekday(end)?))
}

fn weekday(token: &str) -> std::result::Result<String, String> {
  match token.parse::<usize>() {
    Ok(n) if n <= 7 => Ok(WEEKDAYS[n % 7].to_owned()),
    Ok(n) => Err(format!("day of week {n} is out of range")),
    Err(_) => Ok(token.to_owned()),
  }
}
