//! Default subscribers: notifications, logging and the daily report.

use std::sync::Arc;

use subwatch_bus::{EventBus, handler};
use subwatch_core::{
  event::{EventKind, EventPayload},
  model::IdentityStatus,
  ports::{MessageOptions, Notifier, SubscriptionStateRepo},
};
use tracing::{debug, info, warn};

use crate::DailyReportCollector;

/// Subscribe the standard handlers on `bus` and return the collector that
/// receives loop statistics.
///
/// Notification failures are logged here and never reach the bus.
pub fn register_notification_handlers<B, N, R>(
  bus: &B,
  notifier: N,
  repo: R,
) -> Arc<DailyReportCollector<N, R>>
where
  B: EventBus,
  N: Notifier + Clone + 'static,
  R: SubscriptionStateRepo + 'static,
{
  // ── Watchlist changes ──────────────────────────────────────────────────────

  let n = notifier.clone();
  bus.subscribe(
    EventKind::UserAdded,
    handler(move |event| {
      let n = n.clone();
      async move {
        if let EventPayload::UserAdded { identity } = &event.payload {
          let text = format!("➕ <code>{identity}</code> added to the watchlist");
          if let Err(e) = n.send_message(&text, MessageOptions::default()).await {
            warn!(identity = %identity, error = %e, "failed to announce watchlist add");
          }
        }
        Ok(())
      }
    }),
  );

  let n = notifier.clone();
  bus.subscribe(
    EventKind::UserRemoved,
    handler(move |event| {
      let n = n.clone();
      async move {
        if let EventPayload::UserRemoved { identity } = &event.payload {
          let text = format!("➖ <code>{identity}</code> removed from the watchlist");
          if let Err(e) = n.send_message(&text, MessageOptions::default()).await {
            warn!(identity = %identity, error = %e, "failed to announce watchlist removal");
          }
        }
        Ok(())
      }
    }),
  );

  // ── Transitions ────────────────────────────────────────────────────────────

  let n = notifier.clone();
  bus.subscribe(
    EventKind::UserBecomeSubscribable,
    handler(move |event| {
      let n = n.clone();
      async move {
        if let EventPayload::UserBecomeSubscribable { identity, current_state } = &event.payload {
          let status = IdentityStatus {
            identity:       identity.clone(),
            classification: *current_state,
            record:         None,
          };
          if let Err(e) = n.notify_about_change(&status, *current_state).await {
            warn!(identity = %identity, error = %e, "failed to send change notification");
          }
        }
        Ok(())
      }
    }),
  );

  bus.subscribe(
    EventKind::UserBecomeSubscribable,
    handler(|event| async move {
      if let EventPayload::UserBecomeSubscribable { identity, current_state } = &event.payload {
        info!(identity = %identity, classification = %current_state, "identity became subscribable");
      }
      Ok(())
    }),
  );

  // ── Loop logging ───────────────────────────────────────────────────────────

  bus.subscribe(
    EventKind::OnceChecked,
    handler(|event| async move {
      if let EventPayload::OnceChecked { identity, current_state } = &event.payload {
        debug!(identity = %identity, classification = %current_state, "identity checked");
      }
      Ok(())
    }),
  );

  bus.subscribe(
    EventKind::LoopChecked,
    handler(|event| async move {
      if let EventPayload::LoopChecked { identities } = &event.payload {
        debug!(?identities, "pass checked");
      }
      Ok(())
    }),
  );

  bus.subscribe(
    EventKind::LoopCheckFailed,
    handler(|event| async move {
      if let EventPayload::LoopCheckFailed { identities, error } = &event.payload {
        warn!(?identities, error = %error, "pass failed");
      }
      Ok(())
    }),
  );

  // ── Daily report ───────────────────────────────────────────────────────────

  let collector = Arc::new(DailyReportCollector::new(notifier, repo));

  let c = Arc::clone(&collector);
  bus.subscribe(
    EventKind::LoopChecked,
    handler(move |event| {
      let c = Arc::clone(&c);
      async move {
        if let EventPayload::LoopChecked { identities } = &event.payload {
          c.handle_loop_checked(identities);
        }
        Ok(())
      }
    }),
  );

  let c = Arc::clone(&collector);
  bus.subscribe(
    EventKind::LoopCheckFailed,
    handler(move |event| {
      let c = Arc::clone(&c);
      async move {
        if let EventPayload::LoopCheckFailed { identities, .. } = &event.payload {
          c.handle_loop_failed(identities);
        }
        Ok(())
      }
    }),
  );

  let c = Arc::clone(&collector);
  bus.subscribe(
    EventKind::DayChanged,
    handler(move |_| {
      let c = Arc::clone(&c);
      async move {
        c.handle_day_changed().await;
        Ok(())
      }
    }),
  );

  collector
}
