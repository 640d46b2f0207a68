//! At-least-once bus over a [`Transport`].
//!
//! `publish` seals each event into an [`Envelope`], tags the message with the
//! event id and returns once the broker confirms. A consumer task started by
//! `start` reads the queue, drops ids already in the dedup window, dispatches
//! the rest and acks. Messages that cannot be decoded or whose handlers fail
//! are acked too, unless the bus is stopping, in which case they are requeued
//! for the next consumer.

use std::{
  collections::HashSet,
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use futures::StreamExt as _;
use subwatch_core::event::{DomainEvent, EventKind, Topic};
use tokio::{runtime::Handle, sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
  DEFAULT_DEDUP_CAPACITY, DedupWindow, EVENT_ID_HEADER, Envelope, Error, EventBus, Result,
  handler::{Handler, HandlerRegistry},
  routing::{routing_key, topic_routing_key},
  transport::{Delivery, DeliveryStream, OutboundMessage, Transport},
};

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DurableBusConfig {
  pub dedup_capacity:  usize,
  /// Upper bound on waiting for the consumer task in `stop`.
  pub stop_timeout:    Duration,
  /// First delay before re-opening a dropped consumer; doubles up to 30s.
  pub reconnect_delay: Duration,
}

impl Default for DurableBusConfig {
  fn default() -> Self {
    Self {
      dedup_capacity:  DEFAULT_DEDUP_CAPACITY,
      stop_timeout:    Duration::from_secs(5),
      reconnect_delay: Duration::from_secs(1),
    }
  }
}

pub struct DurableBus<T: Transport> {
  inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for DurableBus<T> {
  fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

struct Inner<T> {
  transport: T,
  registry:  HandlerRegistry,
  config:    DurableBusConfig,
  dedup:     Mutex<DedupWindow>,
  bound:     Mutex<HashSet<String>>,
  started:   AtomicBool,
  closing:   AtomicBool,
  consumer:  tokio::sync::Mutex<Option<ConsumerTask>>,
}

struct ConsumerTask {
  shutdown: watch::Sender<bool>,
  handle:   JoinHandle<()>,
}

/// What happened to one delivery.
#[derive(Debug, PartialEq, Eq)]
enum Handled {
  Dispatched,
  Duplicate,
  Skipped,
}

impl<T: Transport> DurableBus<T> {
  pub fn new(transport: T, config: DurableBusConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        transport,
        registry: HandlerRegistry::new(),
        dedup: Mutex::new(DedupWindow::new(config.dedup_capacity)),
        bound: Mutex::new(HashSet::new()),
        started: AtomicBool::new(false),
        closing: AtomicBool::new(false),
        consumer: tokio::sync::Mutex::new(None),
        config,
      }),
    }
  }

  pub fn transport(&self) -> &T { &self.inner.transport }

  pub fn is_started(&self) -> bool { self.inner.started.load(Ordering::SeqCst) }
}

impl<T: Transport> EventBus for DurableBus<T> {
  fn subscribe(&self, topic: impl Into<Topic>, handler: Handler) {
    let topic = topic.into();
    self.inner.registry.register(topic, handler);
    if !self.is_started() {
      return;
    }

    let key = topic_routing_key(topic);
    match Handle::try_current() {
      Ok(runtime) => {
        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
          if let Err(e) = inner.bind(&key).await {
            warn!(routing_key = %key, error = %e, "failed to bind late subscription");
          }
        });
      }
      Err(_) => {
        warn!(routing_key = %key, "no runtime to bind late subscription; it applies from the next start")
      }
    }
  }

  async fn publish(&self, events: Vec<DomainEvent>) -> Result<()> {
    for event in &events {
      let body = Envelope::seal(event)?.to_bytes()?;
      let message = OutboundMessage::new(body).with_header(EVENT_ID_HEADER, event.id.to_string());
      let key = routing_key(event.kind());
      self.inner.transport.publish(&key, message).await?;
      debug!(event = event.name(), event_id = %event.id, routing_key = %key, "event published");
    }
    Ok(())
  }

  async fn start(&self) -> Result<()> {
    if self.inner.started.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    self.inner.closing.store(false, Ordering::SeqCst);

    let stream = match self.inner.open().await {
      Ok(stream) => stream,
      Err(e) => {
        self.inner.started.store(false, Ordering::SeqCst);
        return Err(e);
      }
    };

    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(consume(Arc::clone(&self.inner), stream, shutdown_rx));
    *self.inner.consumer.lock().await = Some(ConsumerTask { shutdown, handle });

    info!(topics = self.inner.registry.topics().len(), "durable bus started");
    Ok(())
  }

  async fn stop(&self) -> Result<()> {
    if !self.inner.started.swap(false, Ordering::SeqCst) {
      return Ok(());
    }
    self.inner.closing.store(true, Ordering::SeqCst);

    let task = self.inner.consumer.lock().await.take();
    if let Some(ConsumerTask { shutdown, mut handle }) = task {
      let _ = shutdown.send(true);
      if tokio::time::timeout(self.inner.config.stop_timeout, &mut handle)
        .await
        .is_err()
      {
        warn!(timeout = ?self.inner.config.stop_timeout, "consumer did not stop in time; aborting");
        handle.abort();
      }
    }

    if let Err(e) = self.inner.transport.cancel().await {
      warn!(error = %e, "failed to cancel consumer");
    }
    self.inner.transport.close().await?;
    self.inner.bound_keys().clear();
    info!("durable bus stopped");
    Ok(())
  }
}

impl<T: Transport> Inner<T> {
  fn dedup(&self) -> MutexGuard<'_, DedupWindow> {
    self.dedup.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn bound_keys(&self) -> MutexGuard<'_, HashSet<String>> {
    self.bound.lock().unwrap_or_else(PoisonError::into_inner)
  }

  async fn bind(&self, key: &str) -> Result<()> {
    if !self.bound_keys().insert(key.to_owned()) {
      return Ok(());
    }
    if let Err(e) = self.transport.bind(key).await {
      self.bound_keys().remove(key);
      return Err(e);
    }
    debug!(routing_key = %key, "routing key bound");
    Ok(())
  }

  /// Declare, bind every registered topic and start consuming.
  async fn open(&self) -> Result<DeliveryStream> {
    self.transport.declare().await?;
    for topic in self.registry.topics() {
      self.bind(&topic_routing_key(topic)).await?;
    }
    self.transport.consume().await
  }

  async fn handle_delivery(&self, delivery: Delivery) {
    let header_id = delivery.event_id().map(str::to_owned);
    let result = self.process(&delivery.body, header_id).await;

    let settled = match result {
      Ok(handled) => {
        debug!(?handled, "delivery handled");
        delivery.ack().await
      }
      Err(e) => {
        let requeue = self.closing.load(Ordering::SeqCst);
        warn!(error = %e, requeue, "failed to handle delivery");
        if requeue { delivery.reject(true).await } else { delivery.ack().await }
      }
    };
    if let Err(e) = settled {
      warn!(error = %e, "failed to settle delivery");
    }
  }

  async fn process(&self, body: &[u8], header_id: Option<String>) -> Result<Handled> {
    let envelope = Envelope::from_slice(body)?;
    let id = header_id.unwrap_or_else(|| envelope.id.to_string());
    if self.dedup().contains(&id) {
      debug!(event_id = %id, "duplicate delivery dropped");
      return Ok(Handled::Duplicate);
    }

    let Some(kind) = EventKind::from_name(&envelope.name) else {
      warn!(event = %envelope.name, event_id = %id, "unknown event type; skipping");
      return Ok(Handled::Skipped);
    };
    if !self.registry.is_subscribed(kind) {
      warn!(event = kind.name(), event_id = %id, "no handler for event; skipping");
      return Ok(Handled::Skipped);
    }

    let event = envelope.open()?;
    let outcome = self.registry.dispatch(&event).await;
    // A redelivery would re-run the handlers that already succeeded.
    if outcome.failures.len() < outcome.invoked {
      self.dedup().remember(&id);
    }
    if !outcome.failures.is_empty() {
      for error in &outcome.failures {
        warn!(event = kind.name(), event_id = %id, error = %error, "event handler failed");
      }
      return Err(Error::Handlers {
        event:  kind.name(),
        failed: outcome.failures.len(),
        total:  outcome.invoked,
      });
    }
    Ok(Handled::Dispatched)
  }
}

enum Step {
  Shutdown,
  Next(Option<Result<Delivery>>),
}

async fn consume<T: Transport>(
  inner: Arc<Inner<T>>,
  mut stream: DeliveryStream,
  mut shutdown: watch::Receiver<bool>,
) {
  let mut delay = inner.config.reconnect_delay;
  loop {
    let step = tokio::select! {
      biased;
      _ = shutdown.changed() => Step::Shutdown,
      next = stream.next() => Step::Next(next),
    };

    match step {
      Step::Shutdown => break,
      Step::Next(Some(Ok(delivery))) => {
        delay = inner.config.reconnect_delay;
        inner.handle_delivery(delivery).await;
        continue;
      }
      Step::Next(Some(Err(e))) => warn!(error = %e, "consumer stream failed"),
      Step::Next(None) => debug!("consumer stream ended"),
    }

    // The stream is gone; reopen it unless we are stopping.
    loop {
      if inner.closing.load(Ordering::SeqCst) {
        return;
      }
      tokio::select! {
        biased;
        _ = shutdown.changed() => return,
        _ = tokio::time::sleep(delay) => {}
      }
      match inner.open().await {
        Ok(reopened) => {
          info!("consumer re-established");
          stream = reopened;
          break;
        }
        Err(e) => {
          warn!(error = %e, retry_in = ?delay, "failed to re-establish consumer");
          delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        }
      }
    }
  }
  debug!("consumer task exiting");
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;

  use subwatch_core::model::Classification;

  use super::*;
  use crate::{LocalBroker, LocalTransport, handler};

  const QUEUE: &str = "subwatch-test";

  fn bus(broker: &LocalBroker) -> DurableBus<LocalTransport> {
    DurableBus::new(broker.transport(QUEUE), DurableBusConfig {
      reconnect_delay: Duration::from_millis(10),
      ..Default::default()
    })
  }

  fn counter(count: &Arc<AtomicUsize>) -> Handler {
    let count = Arc::clone(count);
    handler(move |_| {
      let count = Arc::clone(&count);
      async move {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    })
  }

  async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..400 {
      if cond() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
  }

  #[tokio::test]
  async fn publish_reaches_subscribers_through_the_broker() {
    let broker = LocalBroker::new();
    let bus = bus(&broker);
    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe(EventKind::UserBecomeSubscribable, counter(&count));
    bus.start().await.unwrap();
    assert_eq!(broker.bindings(QUEUE), vec!["domain.user.become-subscribable"]);

    bus
      .publish_one(DomainEvent::user_become_subscribable("alice", Classification::Affiliate))
      .await
      .unwrap();
    eventually("dispatch", || count.load(Ordering::SeqCst) == 1).await;
    eventually("ack", || broker.pending(QUEUE) == 0).await;
    bus.stop().await.unwrap();
  }

  #[tokio::test]
  async fn same_event_id_dispatches_once() {
    let broker = LocalBroker::new();
    let bus = bus(&broker);
    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe(EventKind::LoopChecked, counter(&count));
    bus.start().await.unwrap();

    let event = DomainEvent::loop_checked(vec!["a".into()]);
    bus.publish(vec![event.clone()]).await.unwrap();
    eventually("first dispatch", || count.load(Ordering::SeqCst) == 1).await;
    bus.publish(vec![event]).await.unwrap();
    eventually("duplicate ack", || broker.pending(QUEUE) == 0).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    bus.stop().await.unwrap();
  }

  #[tokio::test]
  async fn poison_messages_are_acked_and_consumption_continues() {
    let broker = LocalBroker::new();
    let bus = bus(&broker);
    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe(Topic::All, counter(&count));
    bus.start().await.unwrap();

    broker.publish("domain.user.added", OutboundMessage::new(b"not json".to_vec()));
    let unknown = serde_json::json!({
      "id": uuid::Uuid::new_v4(),
      "occurred_at": "2024-05-01T00:00:00Z",
      "name": "SomethingElse",
      "version": 1,
      "payload": {},
    });
    broker.publish(
      "domain.something.else",
      OutboundMessage::new(serde_json::to_vec(&unknown).unwrap()),
    );
    eventually("poison ack", || broker.pending(QUEUE) == 0).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    bus.publish_one(DomainEvent::user_added("carol")).await.unwrap();
    eventually("dispatch after poison", || count.load(Ordering::SeqCst) == 1).await;
    bus.stop().await.unwrap();
  }

  #[tokio::test]
  async fn failed_handlers_are_acked_not_retried() {
    let broker = LocalBroker::new();
    let bus = bus(&broker);
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    bus.subscribe(
      EventKind::DayChanged,
      handler(move |_| {
        let seen = Arc::clone(&seen);
        async move {
          seen.fetch_add(1, Ordering::SeqCst);
          anyhow::bail!("notifier down")
        }
      }),
    );
    bus.start().await.unwrap();

    bus.publish_one(DomainEvent::day_changed()).await.unwrap();
    eventually("ack", || {
      attempts.load(Ordering::SeqCst) == 1 && broker.pending(QUEUE) == 0
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    bus.stop().await.unwrap();
  }

  #[tokio::test]
  async fn partial_failure_is_not_redispatched() {
    let broker = LocalBroker::new();
    let bus = bus(&broker);
    let count = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    bus.subscribe(EventKind::LoopChecked, counter(&count));
    bus.subscribe(
      EventKind::LoopChecked,
      handler(move |_| {
        let seen = Arc::clone(&seen);
        async move {
          seen.fetch_add(1, Ordering::SeqCst);
          anyhow::bail!("notifier down")
        }
      }),
    );
    bus.start().await.unwrap();

    let event = DomainEvent::loop_checked(vec!["a".into()]);
    bus.publish(vec![event.clone()]).await.unwrap();
    eventually("first ack", || {
      attempts.load(Ordering::SeqCst) == 1 && broker.pending(QUEUE) == 0
    })
    .await;
    bus.publish(vec![event]).await.unwrap();
    eventually("redelivery ack", || broker.pending(QUEUE) == 0).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    bus.stop().await.unwrap();
  }

  #[tokio::test]
  async fn failures_while_closing_are_requeued() {
    let broker = LocalBroker::new();
    let bus = bus(&broker);
    bus.subscribe(EventKind::DayChanged, handler(|_| async { anyhow::bail!("shutting down") }));

    let peer = broker.transport(QUEUE);
    peer.bind("#").await.unwrap();
    let mut stream = peer.consume().await.unwrap();
    bus.publish_one(DomainEvent::day_changed()).await.unwrap();
    let delivery = stream.next().await.unwrap().unwrap();

    bus.inner.closing.store(true, Ordering::SeqCst);
    bus.inner.handle_delivery(delivery).await;

    assert_eq!(broker.pending(QUEUE), 1);
    let again = stream.next().await.unwrap().unwrap();
    assert!(again.headers.contains_key(crate::transport::local::REDELIVERED_HEADER));
  }

  #[tokio::test]
  async fn subscribe_after_start_binds_incrementally() {
    let broker = LocalBroker::new();
    let bus = bus(&broker);
    bus.subscribe(EventKind::LoopChecked, handler(|_| async { Ok(()) }));
    bus.start().await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe(EventKind::DayChanged, counter(&count));
    eventually("late bind", || {
      broker.bindings(QUEUE).contains(&"domain.day.changed".to_owned())
    })
    .await;

    bus.publish_one(DomainEvent::day_changed()).await.unwrap();
    eventually("late dispatch", || count.load(Ordering::SeqCst) == 1).await;
    bus.stop().await.unwrap();
  }

  #[tokio::test]
  async fn consumer_reopens_after_the_stream_ends() {
    let broker = LocalBroker::new();
    let bus = bus(&broker);
    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe(EventKind::UserRemoved, counter(&count));
    bus.start().await.unwrap();

    bus.transport().cancel().await.unwrap();
    bus.publish_one(DomainEvent::user_removed("dave")).await.unwrap();
    eventually("dispatch after reopen", || count.load(Ordering::SeqCst) == 1).await;
    bus.stop().await.unwrap();
  }

  #[tokio::test]
  async fn stop_is_idempotent_and_empty_publish_is_a_no_op() {
    let broker = LocalBroker::new();
    let bus = bus(&broker);
    bus.stop().await.unwrap();
    bus.start().await.unwrap();
    bus.start().await.unwrap();
    bus.publish(Vec::new()).await.unwrap();
    bus.stop().await.unwrap();
    bus.stop().await.unwrap();
    assert!(!bus.is_started());
  }
}
