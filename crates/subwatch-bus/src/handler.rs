//! Handler closures and the registration table shared by both backends.

use std::{
  future::Future,
  sync::{Arc, PoisonError, RwLock},
};

use futures::future::BoxFuture;
use subwatch_core::event::{DomainEvent, EventKind, Topic};

/// A type-erased async event handler.
pub type Handler = Arc<dyn Fn(DomainEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
  F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
  Arc::new(move |event| Box::pin(f(event)))
}

/// Outcome of dispatching one event.
#[derive(Debug, Default)]
pub struct Dispatch {
  pub invoked:  usize,
  pub failures: Vec<anyhow::Error>,
}

/// Ordered `(topic, handler)` registrations.
///
/// Registration is append-only. Dispatch copies the matching handlers out of
/// the lock before awaiting them, so `register` may run concurrently with an
/// active consumer.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
  entries: Arc<RwLock<Vec<(Topic, Handler)>>>,
}

impl HandlerRegistry {
  pub fn new() -> Self { Self::default() }

  pub fn register(&self, topic: Topic, handler: Handler) {
    self
      .entries
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .push((topic, handler));
  }

  /// Handlers whose topic is satisfied by `kind`, in registration order.
  pub fn matching(&self, kind: EventKind) -> Vec<Handler> {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .filter(|(topic, _)| topic.matches(kind))
      .map(|(_, h)| Arc::clone(h))
      .collect()
  }

  /// Distinct registered topics, in first-registration order.
  pub fn topics(&self) -> Vec<Topic> {
    let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
    let mut topics: Vec<Topic> = Vec::new();
    for (topic, _) in entries.iter() {
      if !topics.contains(topic) {
        topics.push(*topic);
      }
    }
    topics
  }

  /// Whether any handler would receive an event of `kind`.
  pub fn is_subscribed(&self, kind: EventKind) -> bool {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .any(|(topic, _)| topic.matches(kind))
  }

  /// Await every matching handler in order. A failing handler does not stop
  /// the ones after it.
  pub async fn dispatch(&self, event: &DomainEvent) -> Dispatch {
    let mut outcome = Dispatch::default();
    for h in self.matching(event.kind()) {
      outcome.invoked += 1;
      if let Err(e) = h(event.clone()).await {
        outcome.failures.push(e);
      }
    }
    outcome
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;

  fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Handler {
    let log = Arc::clone(log);
    handler(move |event| {
      let log = Arc::clone(&log);
      async move {
        log.lock().unwrap().push(format!("{tag}:{}", event.name()));
        Ok(())
      }
    })
  }

  #[tokio::test]
  async fn dispatch_preserves_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = HandlerRegistry::new();
    registry.register(EventKind::LoopChecked.into(), recorder(&log, "first"));
    registry.register(Topic::All, recorder(&log, "all"));
    registry.register(EventKind::LoopChecked.into(), recorder(&log, "second"));
    registry.register(EventKind::DayChanged.into(), recorder(&log, "day"));

    let outcome = registry.dispatch(&DomainEvent::loop_checked(vec![])).await;
    assert_eq!(outcome.invoked, 3);
    assert_eq!(
      *log.lock().unwrap(),
      vec!["first:LoopChecked", "all:LoopChecked", "second:LoopChecked"]
    );
  }

  #[tokio::test]
  async fn failing_handler_does_not_stop_the_rest() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = HandlerRegistry::new();
    registry.register(
      EventKind::DayChanged.into(),
      handler(|_| async { anyhow::bail!("boom") }),
    );
    registry.register(EventKind::DayChanged.into(), recorder(&log, "after"));

    let outcome = registry.dispatch(&DomainEvent::day_changed()).await;
    assert_eq!(outcome.invoked, 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(log.lock().unwrap().len(), 1);
  }

  #[test]
  fn topics_are_distinct() {
    let registry = HandlerRegistry::new();
    let noop = handler(|_| async { Ok(()) });
    registry.register(EventKind::LoopChecked.into(), Arc::clone(&noop));
    registry.register(EventKind::LoopChecked.into(), Arc::clone(&noop));
    registry.register(Topic::All, noop);
    assert_eq!(registry.topics(), vec![Topic::Kind(EventKind::LoopChecked), Topic::All]);
    assert!(registry.is_subscribed(EventKind::UserAdded));
  }
}
