//! AMQP 0-9-1 transport over [`lapin`].
//!
//! The connection and channel are opened lazily and re-opened whenever they
//! are found closed; re-opening re-declares the exchange and queue and replays
//! every binding made so far.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{Mutex, PoisonError},
};

use futures::{StreamExt as _, TryStreamExt as _, future::BoxFuture};
use lapin::{
  BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
  acker::Acker as LapinAcker,
  message::Delivery as LapinDelivery,
  options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
  },
  types::{AMQPValue, FieldTable, LongString, ShortString},
};
use tracing::{debug, info};

use super::{Acker, Delivery, DeliveryStream, OutboundMessage, Transport};
use crate::{Error, Result};

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

#[derive(Debug, Clone)]
pub struct AmqpConfig {
  pub url:            String,
  pub exchange:       String,
  /// Named queues are durable; `None` declares an exclusive, auto-deleted
  /// server-named queue.
  pub queue:          Option<String>,
  pub prefetch_count: u16,
}

impl AmqpConfig {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url:            url.into(),
      exchange:       "subwatch.events".to_owned(),
      queue:          None,
      prefetch_count: 10,
    }
  }
}

#[derive(Default)]
struct Link {
  connection: Option<Connection>,
  channel:    Option<Channel>,
  queue:      Option<String>,
}

pub struct AmqpTransport {
  config:       AmqpConfig,
  link:         tokio::sync::Mutex<Link>,
  bindings:     Mutex<BTreeSet<String>>,
  consumer_tag: Mutex<Option<String>>,
}

impl AmqpTransport {
  pub fn new(config: AmqpConfig) -> Self {
    Self {
      config,
      link: tokio::sync::Mutex::new(Link::default()),
      bindings: Mutex::new(BTreeSet::new()),
      consumer_tag: Mutex::new(None),
    }
  }

  pub fn config(&self) -> &AmqpConfig { &self.config }

  /// Return a usable channel and the queue name, reconnecting if needed.
  async fn ensure(&self) -> Result<(Channel, String)> {
    let mut link = self.link.lock().await;

    let connected = link.connection.as_ref().is_some_and(|c| c.status().connected());
    if connected
      && let (Some(channel), Some(queue)) = (&link.channel, &link.queue)
      && channel.status().connected()
    {
      return Ok((channel.clone(), queue.clone()));
    }

    let connection = match link.connection.take() {
      Some(connection) if connection.status().connected() => connection,
      stale => {
        if stale.is_some() {
          info!(url = %self.config.url, "amqp connection lost; reconnecting");
        }
        link.channel = None;
        link.queue = None;
        Connection::connect(&self.config.url, ConnectionProperties::default()).await?
      }
    };
    let declared = self.declare_channel(&connection).await;
    link.connection = Some(connection);

    let (channel, queue) = declared?;
    link.channel = Some(channel.clone());
    link.queue = Some(queue.clone());
    Ok((channel, queue))
  }

  /// Open a channel on `connection`, declare the exchange and queue, and
  /// replay the remembered bindings.
  async fn declare_channel(&self, connection: &Connection) -> Result<(Channel, String)> {
    let channel = connection.create_channel().await?;
    channel
      .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
      .await?;
    channel
      .confirm_select(ConfirmSelectOptions::default())
      .await?;
    channel
      .exchange_declare(
        &self.config.exchange,
        ExchangeKind::Topic,
        ExchangeDeclareOptions { durable: true, ..Default::default() },
        FieldTable::default(),
      )
      .await?;

    let named = self.config.queue.is_some();
    let queue = channel
      .queue_declare(
        self.config.queue.as_deref().unwrap_or(""),
        QueueDeclareOptions {
          durable: named,
          exclusive: !named,
          auto_delete: !named,
          ..Default::default()
        },
        FieldTable::default(),
      )
      .await?;
    let queue_name = queue.name().as_str().to_owned();

    let replay: Vec<String> = self
      .bindings
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .cloned()
      .collect();
    for key in &replay {
      channel
        .queue_bind(
          &queue_name,
          &self.config.exchange,
          key,
          QueueBindOptions::default(),
          FieldTable::default(),
        )
        .await?;
    }
    debug!(queue = %queue_name, bindings = replay.len(), "amqp channel declared");
    Ok((channel, queue_name))
  }
}

impl Transport for AmqpTransport {
  async fn declare(&self) -> Result<()> {
    self.ensure().await?;
    Ok(())
  }

  async fn bind(&self, routing_key: &str) -> Result<()> {
    let fresh = self
      .bindings
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(routing_key.to_owned());
    if !fresh {
      return Ok(());
    }
    let (channel, queue) = self.ensure().await?;
    channel
      .queue_bind(
        &queue,
        &self.config.exchange,
        routing_key,
        QueueBindOptions::default(),
        FieldTable::default(),
      )
      .await?;
    debug!(queue = %queue, routing_key, "amqp queue bound");
    Ok(())
  }

  async fn publish(&self, routing_key: &str, message: OutboundMessage) -> Result<()> {
    let (channel, _) = self.ensure().await?;

    let mut headers = FieldTable::default();
    for (k, v) in message.headers {
      headers.insert(ShortString::from(k), AMQPValue::LongString(LongString::from(v)));
    }
    let properties = BasicProperties::default()
      .with_content_type(ShortString::from("application/json"))
      .with_delivery_mode(PERSISTENT)
      .with_headers(headers);

    let confirmation = channel
      .basic_publish(
        &self.config.exchange,
        routing_key,
        BasicPublishOptions::default(),
        &message.body,
        properties,
      )
      .await?
      .await?;
    if confirmation.is_nack() {
      return Err(Error::Rejected(routing_key.to_owned()));
    }
    Ok(())
  }

  async fn consume(&self) -> Result<DeliveryStream> {
    let (channel, queue) = self.ensure().await?;
    let consumer = channel
      .basic_consume(
        &queue,
        "",
        BasicConsumeOptions::default(),
        FieldTable::default(),
      )
      .await?;
    *self
      .consumer_tag
      .lock()
      .unwrap_or_else(PoisonError::into_inner) = Some(consumer.tag().as_str().to_owned());

    let stream = consumer.map_err(Error::from).map_ok(into_delivery);
    Ok(stream.boxed())
  }

  async fn cancel(&self) -> Result<()> {
    let tag = self
      .consumer_tag
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    let Some(tag) = tag else { return Ok(()) };

    let channel = self.link.lock().await.channel.clone();
    if let Some(channel) = channel.filter(|c| c.status().connected()) {
      channel
        .basic_cancel(&tag, BasicCancelOptions::default())
        .await?;
    }
    Ok(())
  }

  async fn close(&self) -> Result<()> {
    let mut link = self.link.lock().await;
    if let Some(channel) = link.channel.take()
      && channel.status().connected()
    {
      channel.close(200, "closing").await?;
    }
    if let Some(connection) = link.connection.take()
      && connection.status().connected()
    {
      connection.close(200, "closing").await?;
    }
    link.queue = None;
    Ok(())
  }
}

fn into_delivery(delivery: LapinDelivery) -> Delivery {
  let headers: BTreeMap<String, String> = delivery
    .properties
    .headers()
    .as_ref()
    .map(|table| {
      table
        .inner()
        .iter()
        .filter_map(|(k, v)| header_text(v).map(|text| (k.as_str().to_owned(), text)))
        .collect()
    })
    .unwrap_or_default();
  Delivery::new(headers, delivery.data, AmqpAcker(delivery.acker))
}

fn header_text(value: &AMQPValue) -> Option<String> {
  match value {
    AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
    AMQPValue::ShortString(s) => Some(s.as_str().to_owned()),
    _ => None,
  }
}

struct AmqpAcker(LapinAcker);

impl Acker for AmqpAcker {
  fn ack(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
      self.0.ack(BasicAckOptions::default()).await?;
      Ok(())
    })
  }

  fn reject(self: Box<Self>, requeue: bool) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
      self
        .0
        .nack(BasicNackOptions { requeue, ..Default::default() })
        .await?;
      Ok(())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn unreachable() -> AmqpTransport { AmqpTransport::new(AmqpConfig::new("amqp://127.0.0.1:1/%2f")) }

  #[tokio::test]
  async fn unreachable_broker_is_an_error() {
    let transport = unreachable();
    assert!(transport.declare().await.is_err());
    // A second attempt reconnects from scratch rather than reusing state.
    assert!(transport.declare().await.is_err());
    assert!(transport.link.lock().await.channel.is_none());
  }

  #[tokio::test]
  async fn bindings_survive_a_failed_connect() {
    let transport = unreachable();
    assert!(transport.bind("subwatch.user.added").await.is_err());
    let bindings = transport.bindings.lock().unwrap().clone();
    assert!(bindings.contains("subwatch.user.added"));
  }
}
