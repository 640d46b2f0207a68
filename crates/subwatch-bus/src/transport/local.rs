//! An in-process topic exchange.
//!
//! [`LocalBroker`] mimics the parts of an AMQP broker the durable bus relies
//! on: topic routing with `*`/`#` bindings, per-queue buffering while no
//! consumer is attached, unacked tracking, and requeue on reject or cancel.
//! It backs single-node runs without a broker and the durable-bus tests.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::{StreamExt as _, future::BoxFuture};
use tokio::sync::mpsc;

use super::{Acker, Delivery, DeliveryStream, OutboundMessage, Transport};
use crate::{Result, routing::topic_matches};

/// Header set on messages that are delivered more than once.
pub const REDELIVERED_HEADER: &str = "x-redelivered";

#[derive(Debug, Clone)]
struct StoredMessage {
  headers: BTreeMap<String, String>,
  body:    Vec<u8>,
}

#[derive(Default)]
struct QueueState {
  bindings: BTreeSet<String>,
  ready:    VecDeque<StoredMessage>,
  unacked:  BTreeMap<u64, StoredMessage>,
  consumer: Option<mpsc::UnboundedSender<Delivery>>,
}

#[derive(Default)]
struct BrokerState {
  queues:   HashMap<String, QueueState>,
  next_tag: u64,
}

/// Cloning is cheap; every clone talks to the same exchange.
#[derive(Clone, Default)]
pub struct LocalBroker {
  state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
  pub fn new() -> Self { Self::default() }

  /// A transport consuming from `queue` on this broker.
  pub fn transport(&self, queue: impl Into<String>) -> LocalTransport {
    LocalTransport { broker: self.clone(), queue: queue.into() }
  }

  /// Route `message` to every queue with a matching binding. Returns the
  /// number of queues that received it; unroutable messages are dropped.
  pub fn publish(&self, routing_key: &str, message: OutboundMessage) -> usize {
    let mut state = self.lock();
    let targets: Vec<String> = state
      .queues
      .iter()
      .filter(|(_, q)| q.bindings.iter().any(|b| topic_matches(b, routing_key)))
      .map(|(name, _)| name.clone())
      .collect();
    for queue in &targets {
      let stored = StoredMessage { headers: message.headers.clone(), body: message.body.clone() };
      self.enqueue(&mut state, queue, stored);
    }
    targets.len()
  }

  /// Messages in `queue` that are not yet acknowledged.
  pub fn pending(&self, queue: &str) -> usize {
    self
      .lock()
      .queues
      .get(queue)
      .map(|q| q.ready.len() + q.unacked.len())
      .unwrap_or(0)
  }

  pub fn bindings(&self, queue: &str) -> Vec<String> {
    self
      .lock()
      .queues
      .get(queue)
      .map(|q| q.bindings.iter().cloned().collect())
      .unwrap_or_default()
  }

  fn lock(&self) -> MutexGuard<'_, BrokerState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Hand `message` to the queue's consumer, or buffer it.
  fn enqueue(&self, state: &mut BrokerState, queue: &str, message: StoredMessage) {
    state.next_tag += 1;
    let tag = state.next_tag;
    let Some(q) = state.queues.get_mut(queue) else { return };

    let Some(consumer) = q.consumer.as_ref() else {
      q.ready.push_back(message);
      return;
    };

    let acker = LocalAcker { broker: self.clone(), queue: queue.to_owned(), tag };
    let delivery = Delivery::new(message.headers.clone(), message.body.clone(), acker);
    q.unacked.insert(tag, message.clone());
    if consumer.send(delivery).is_err() {
      q.unacked.remove(&tag);
      q.consumer = None;
      q.ready.push_front(message);
    }
  }

  fn settle(&self, queue: &str, tag: u64, requeue: bool) {
    let mut state = self.lock();
    let Some(message) = state.queues.get_mut(queue).and_then(|q| q.unacked.remove(&tag)) else {
      return;
    };
    if requeue {
      let mut message = message;
      message.headers.insert(REDELIVERED_HEADER.to_owned(), "true".to_owned());
      self.enqueue(&mut state, queue, message);
    }
  }

  /// Detach the consumer and put every unsettled message back in front.
  fn detach(&self, queue: &str) {
    let mut state = self.lock();
    let Some(q) = state.queues.get_mut(queue) else { return };
    q.consumer = None;
    let unacked = std::mem::take(&mut q.unacked);
    for (_, mut message) in unacked.into_iter().rev() {
      message.headers.insert(REDELIVERED_HEADER.to_owned(), "true".to_owned());
      q.ready.push_front(message);
    }
  }
}

struct LocalAcker {
  broker: LocalBroker,
  queue:  String,
  tag:    u64,
}

impl Acker for LocalAcker {
  fn ack(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
    self.broker.settle(&self.queue, self.tag, false);
    Box::pin(async { Ok(()) })
  }

  fn reject(self: Box<Self>, requeue: bool) -> BoxFuture<'static, Result<()>> {
    self.broker.settle(&self.queue, self.tag, requeue);
    Box::pin(async { Ok(()) })
  }
}

/// One queue on a [`LocalBroker`].
#[derive(Clone)]
pub struct LocalTransport {
  broker: LocalBroker,
  queue:  String,
}

impl LocalTransport {
  pub fn queue(&self) -> &str { &self.queue }

  pub fn broker(&self) -> &LocalBroker { &self.broker }
}

impl Transport for LocalTransport {
  async fn declare(&self) -> Result<()> {
    self.broker.lock().queues.entry(self.queue.clone()).or_default();
    Ok(())
  }

  async fn bind(&self, routing_key: &str) -> Result<()> {
    self
      .broker
      .lock()
      .queues
      .entry(self.queue.clone())
      .or_default()
      .bindings
      .insert(routing_key.to_owned());
    Ok(())
  }

  async fn publish(&self, routing_key: &str, message: OutboundMessage) -> Result<()> {
    let routed = self.broker.publish(routing_key, message);
    tracing::trace!(routing_key, routed, "local publish");
    Ok(())
  }

  async fn consume(&self) -> Result<DeliveryStream> {
    let (tx, rx) = mpsc::unbounded_channel();
    {
      let mut state = self.broker.lock();
      let q = state.queues.entry(self.queue.clone()).or_default();
      q.consumer = Some(tx);
      let backlog: Vec<StoredMessage> = q.ready.drain(..).collect();
      for message in backlog {
        self.broker.enqueue(&mut state, &self.queue, message);
      }
    }
    let stream = futures::stream::unfold(rx, |mut rx| async move {
      rx.recv().await.map(|delivery| (Ok(delivery), rx))
    });
    Ok(stream.boxed())
  }

  async fn cancel(&self) -> Result<()> {
    self.broker.detach(&self.queue);
    Ok(())
  }

  async fn close(&self) -> Result<()> {
    self.broker.detach(&self.queue);
    Ok(())
  }
}
