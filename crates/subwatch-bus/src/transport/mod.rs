//! Broker abstraction behind [`DurableBus`](crate::DurableBus).
//!
//! A transport owns one topic exchange and one consuming queue. It publishes
//! with broker confirmation, binds routing keys to its queue incrementally,
//! and hands out deliveries that must be acked or rejected explicitly.

pub mod amqp;
pub mod local;

use std::{collections::BTreeMap, fmt, future::Future};

use futures::{future::BoxFuture, stream::BoxStream};

use crate::{EVENT_ID_HEADER, Result};

/// A message on its way to the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
  pub headers: BTreeMap<String, String>,
  pub body:    Vec<u8>,
}

impl OutboundMessage {
  pub fn new(body: Vec<u8>) -> Self { Self { headers: BTreeMap::new(), body } }

  pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(key.into(), value.into());
    self
  }
}

/// Settles one delivery with the broker.
pub trait Acker: Send {
  fn ack(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
  fn reject(self: Box<Self>, requeue: bool) -> BoxFuture<'static, Result<()>>;
}

/// A received message. Dropping it without settling leaves it unacked until
/// the consumer goes away.
pub struct Delivery {
  pub headers: BTreeMap<String, String>,
  pub body:    Vec<u8>,
  acker:       Box<dyn Acker>,
}

impl Delivery {
  pub fn new(headers: BTreeMap<String, String>, body: Vec<u8>, acker: impl Acker + 'static) -> Self {
    Self { headers, body, acker: Box::new(acker) }
  }

  pub fn event_id(&self) -> Option<&str> {
    self
      .headers
      .get(EVENT_ID_HEADER)
      .map(String::as_str)
      .filter(|id| !id.is_empty())
  }

  pub async fn ack(self) -> Result<()> { self.acker.ack().await }

  pub async fn reject(self, requeue: bool) -> Result<()> { self.acker.reject(requeue).await }
}

impl fmt::Debug for Delivery {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Delivery")
      .field("headers", &self.headers)
      .field("body_len", &self.body.len())
      .finish_non_exhaustive()
  }
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

pub trait Transport: Send + Sync + 'static {
  /// Ensure the connection, exchange and queue exist, re-establishing them
  /// (and every earlier binding) if the connection was lost.
  fn declare(&self) -> impl Future<Output = Result<()>> + Send + '_;

  /// Bind `routing_key` to the consuming queue. Bindings are remembered and
  /// replayed after a reconnect.
  fn bind<'a>(&'a self, routing_key: &'a str) -> impl Future<Output = Result<()>> + Send + 'a;

  /// Publish and wait until the broker has accepted the message.
  fn publish<'a>(
    &'a self,
    routing_key: &'a str,
    message: OutboundMessage,
  ) -> impl Future<Output = Result<()>> + Send + 'a;

  /// Start consuming the queue.
  fn consume(&self) -> impl Future<Output = Result<DeliveryStream>> + Send + '_;

  /// Stop the active consumer. Unsettled deliveries go back to the queue.
  fn cancel(&self) -> impl Future<Output = Result<()>> + Send + '_;

  /// Release channels and connections. Safe to call more than once.
  fn close(&self) -> impl Future<Output = Result<()>> + Send + '_;
}
