use subwatch_core::event::{DomainEvent, Topic};
use tracing::warn;

use crate::{EventBus, Result, handler::{Handler, HandlerRegistry}};

/// Dispatches inside `publish`, awaiting every matching handler in turn.
///
/// A failing handler is logged and skipped; `publish` itself only fails if
/// the bus does.
#[derive(Clone, Default)]
pub struct InProcessBus {
  registry: HandlerRegistry,
}

impl InProcessBus {
  pub fn new() -> Self { Self::default() }
}

impl EventBus for InProcessBus {
  fn subscribe(&self, topic: impl Into<Topic>, handler: Handler) {
    self.registry.register(topic.into(), handler);
  }

  async fn publish(&self, events: Vec<DomainEvent>) -> Result<()> {
    for event in events {
      let outcome = self.registry.dispatch(&event).await;
      for error in outcome.failures {
        warn!(event = event.name(), event_id = %event.id, error = %error, "event handler failed");
      }
    }
    Ok(())
  }

  async fn start(&self) -> Result<()> { Ok(()) }

  async fn stop(&self) -> Result<()> { Ok(()) }
}
