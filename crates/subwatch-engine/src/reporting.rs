//! Daily roll-up of loop statistics.

use std::{
  collections::BTreeSet,
  sync::{Mutex, MutexGuard, PoisonError},
};

use subwatch_core::{
  model::ReportLine,
  ports::{Notifier, SubscriptionStateRepo},
};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Counters {
  tracked: BTreeSet<String>,
  checks:  u64,
  errors:  u64,
}

/// Point-in-time view of the collector's counters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportSnapshot {
  /// Sorted.
  pub tracked: Vec<String>,
  pub checks:  u64,
  pub errors:  u64,
}

/// The report handed to the notifier on a day change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
  pub lines:  Vec<ReportLine>,
  pub checks: u64,
  pub errors: u64,
}

/// Counts passes and failures between day changes and reports them.
pub struct DailyReportCollector<N, R> {
  notifier: N,
  repo:     R,
  counters: Mutex<Counters>,
}

impl<N: Notifier, R: SubscriptionStateRepo> DailyReportCollector<N, R> {
  pub fn new(notifier: N, repo: R) -> Self {
    Self { notifier, repo, counters: Mutex::new(Counters::default()) }
  }

  fn counters(&self) -> MutexGuard<'_, Counters> {
    self.counters.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn handle_loop_checked(&self, identities: &[String]) {
    let mut c = self.counters();
    c.tracked.extend(identities.iter().cloned());
    c.checks += 1;
  }

  pub fn handle_loop_failed(&self, identities: &[String]) {
    let mut c = self.counters();
    c.tracked.extend(identities.iter().cloned());
    c.checks += 1;
    c.errors += 1;
  }

  /// Build and send the report, then start a new period.
  ///
  /// The counters are taken up front so passes finishing while the report is
  /// being built count towards the next period. A failed state read projects
  /// that identity as `none`; a failed send is logged.
  pub async fn handle_day_changed(&self) -> Report {
    let Counters { tracked, checks, errors } = std::mem::take(&mut *self.counters());

    let mut lines = Vec::with_capacity(tracked.len());
    for identity in &tracked {
      let state = match self.repo.get(identity).await {
        Ok(state) => state,
        Err(e) => {
          warn!(identity = %identity, error = %e, "failed to read state for report");
          None
        }
      };
      lines.push(ReportLine::project(identity, state.as_ref()));
    }

    info!(identities = lines.len(), checks, errors, "sending daily report");
    if let Err(e) = self.notifier.notify_report(&lines, checks, errors).await {
      warn!(error = %e, "failed to send daily report");
    }
    Report { lines, checks, errors }
  }

  pub fn snapshot(&self) -> ReportSnapshot {
    let c = self.counters();
    ReportSnapshot {
      tracked: c.tracked.iter().cloned().collect(),
      checks:  c.checks,
      errors:  c.errors,
    }
  }
}
