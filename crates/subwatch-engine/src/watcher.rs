//! The reconciliation loop.
//!
//! A pass looks up every identity in order, compares the notifiable predicate
//! with the stored state, announces transitions on the bus and writes all new
//! records in one batch at the end. A cancelled pass writes nothing.

use std::{panic::AssertUnwindSafe, time::Duration};

use chrono::Utc;
use futures::FutureExt as _;
use subwatch_bus::EventBus;
use subwatch_core::{
  event::DomainEvent,
  model::{IdentityStatus, SubscriptionState},
  ports::{IdentitySource, Notifier, StatusLookup, SubscriptionStateRepo},
};
use tracing::{debug, info, warn};

use crate::{CancelToken, Error, Result};

pub struct Watcher<L, R, N, B> {
  lookup:   L,
  repo:     R,
  notifier: N,
  bus:      B,
}

impl<L, R, N, B> Watcher<L, R, N, B>
where
  L: StatusLookup,
  R: SubscriptionStateRepo,
  N: Notifier,
  B: EventBus,
{
  pub fn new(lookup: L, repo: R, notifier: N, bus: B) -> Self {
    Self { lookup, repo, notifier, bus }
  }

  /// Look up one identity. An unknown identity has classification `None`.
  pub async fn check(&self, identity: &str) -> Result<IdentityStatus> {
    let record = self
      .lookup
      .lookup(identity)
      .await
      .map_err(|e| Error::Lookup { identity: identity.to_owned(), source: Box::new(e) })?;
    Ok(IdentityStatus::from_lookup(identity, record))
  }

  /// One reconciliation pass. Returns whether any identity crossed the
  /// notifiable boundary in either direction.
  pub async fn run_once(&self, identities: &[String], cancel: &CancelToken) -> Result<bool> {
    let mut changed = false;
    let mut updates = Vec::with_capacity(identities.len());

    for identity in identities {
      if cancel.is_cancelled() {
        debug!(identity = %identity, "pass cancelled; discarding {} pending updates", updates.len());
        return Ok(false);
      }

      let status = self.check(identity).await?;
      let current = status.classification;
      let prev = self.repo.get(identity).await.map_err(Error::persistence)?;

      let was_notifiable = prev.as_ref().is_some_and(SubscriptionState::is_notifiable);
      let is_notifiable = current.is_notifiable();
      if was_notifiable != is_notifiable {
        changed = true;
        if is_notifiable {
          info!(identity = %identity, classification = %current, "identity became subscribable");
          self
            .bus
            .publish_one(DomainEvent::user_become_subscribable(identity.as_str(), current))
            .await?;
        }
      }

      updates.push(SubscriptionState::reconcile(
        prev.as_ref(),
        identity.as_str(),
        current,
        Utc::now(),
      ));
      self
        .bus
        .publish_one(DomainEvent::once_checked(identity.as_str(), current))
        .await?;
    }

    self.repo.set_many(updates).await.map_err(Error::persistence)?;
    self
      .bus
      .publish_one(DomainEvent::loop_checked(identities.to_vec()))
      .await?;
    Ok(changed)
  }

  /// Run passes every `interval` until `cancel` fires. A failed pass is
  /// published as `LoopCheckFailed` and the loop carries on. The stop
  /// notification is sent on every exit path, including a panic.
  pub async fn watch<S: IdentitySource>(&self, source: &S, interval: Duration, cancel: &CancelToken) {
    if let Err(e) = self.notifier.notify_about_start().await {
      warn!(error = %e, "failed to send start notification");
    }

    let outcome = AssertUnwindSafe(self.watch_loop(source, interval, cancel))
      .catch_unwind()
      .await;

    info!("watcher stopping");
    if let Err(e) = self.notifier.notify_about_stop().await {
      warn!(error = %e, "failed to send stop notification");
    }
    if let Err(panic) = outcome {
      std::panic::resume_unwind(panic);
    }
  }

  async fn watch_loop<S: IdentitySource>(
    &self,
    source: &S,
    interval: Duration,
    cancel: &CancelToken,
  ) {
    while !cancel.is_cancelled() {
      let (identities, result) = match source.get().await {
        Ok(identities) => {
          let result = self.run_once(&identities, cancel).await;
          (identities, result)
        }
        Err(e) => (Vec::new(), Err(Error::Source(Box::new(e)))),
      };

      match result {
        Ok(changed) => debug!(count = identities.len(), changed, "pass complete"),
        Err(e) => {
          warn!(error = %e, "reconciliation pass failed");
          let failed = DomainEvent::loop_check_failed(identities, e.to_string());
          if let Err(e) = self.bus.publish_one(failed).await {
            warn!(error = %e, "failed to publish LoopCheckFailed");
          }
        }
      }

      tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(interval) => {}
      }
    }
  }
}
