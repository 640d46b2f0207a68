use std::{future::Future, sync::Arc};

use subwatch_core::event::{DomainEvent, Topic};

use crate::{
  DurableBus, InProcessBus, Result,
  handler::Handler,
  transport::{amqp::AmqpTransport, local::LocalTransport},
};

/// Topic-based publish/subscribe.
///
/// Handlers for the same topic run in registration order. Subscribing after
/// [`start`](EventBus::start) takes effect for events delivered afterwards.
pub trait EventBus: Send + Sync {
  fn subscribe(&self, topic: impl Into<Topic>, handler: Handler);

  /// Hand events to the bus. Publishing nothing is a no-op.
  fn publish(&self, events: Vec<DomainEvent>) -> impl Future<Output = Result<()>> + Send + '_;

  fn publish_one(&self, event: DomainEvent) -> impl Future<Output = Result<()>> + Send + '_ {
    self.publish(vec![event])
  }

  fn start(&self) -> impl Future<Output = Result<()>> + Send + '_;

  /// Stop consuming. Safe to call more than once, or without `start`.
  fn stop(&self) -> impl Future<Output = Result<()>> + Send + '_;
}

impl<B: EventBus> EventBus for Arc<B> {
  fn subscribe(&self, topic: impl Into<Topic>, handler: Handler) {
    (**self).subscribe(topic, handler)
  }

  fn publish(&self, events: Vec<DomainEvent>) -> impl Future<Output = Result<()>> + Send + '_ {
    (**self).publish(events)
  }

  fn start(&self) -> impl Future<Output = Result<()>> + Send + '_ { (**self).start() }

  fn stop(&self) -> impl Future<Output = Result<()>> + Send + '_ { (**self).stop() }
}

/// The backend chosen at startup.
pub enum Bus {
  InProcess(InProcessBus),
  Amqp(DurableBus<AmqpTransport>),
  Local(DurableBus<LocalTransport>),
}

impl Bus {
  pub fn backend(&self) -> &'static str {
    match self {
      Self::InProcess(_) => "in-process",
      Self::Amqp(_) => "amqp",
      Self::Local(_) => "local",
    }
  }
}

impl EventBus for Bus {
  fn subscribe(&self, topic: impl Into<Topic>, handler: Handler) {
    match self {
      Self::InProcess(bus) => bus.subscribe(topic, handler),
      Self::Amqp(bus) => bus.subscribe(topic, handler),
      Self::Local(bus) => bus.subscribe(topic, handler),
    }
  }

  async fn publish(&self, events: Vec<DomainEvent>) -> Result<()> {
    match self {
      Self::InProcess(bus) => bus.publish(events).await,
      Self::Amqp(bus) => bus.publish(events).await,
      Self::Local(bus) => bus.publish(events).await,
    }
  }

  async fn start(&self) -> Result<()> {
    match self {
      Self::InProcess(bus) => bus.start().await,
      Self::Amqp(bus) => bus.start().await,
      Self::Local(bus) => bus.start().await,
    }
  }

  async fn stop(&self) -> Result<()> {
    match self {
      Self::InProcess(bus) => bus.stop().await,
      Self::Amqp(bus) => bus.stop().await,
      Self::Local(bus) => bus.stop().await,
    }
  }
}

impl From<InProcessBus> for Bus {
  fn from(bus: InProcessBus) -> Self { Self::InProcess(bus) }
}

impl From<DurableBus<AmqpTransport>> for Bus {
  fn from(bus: DurableBus<AmqpTransport>) -> Self { Self::Amqp(bus) }
}

impl From<DurableBus<LocalTransport>> for Bus {
  fn from(bus: DurableBus<LocalTransport>) -> Self { Self::Local(bus) }
}
