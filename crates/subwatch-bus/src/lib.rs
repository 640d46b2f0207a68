//! Topic-based publish/subscribe for subwatch domain events.
//!
//! Two interchangeable backends implement [`EventBus`]:
//!
//! - [`InProcessBus`] invokes handlers synchronously inside `publish`.
//! - [`DurableBus`] serialises events into JSON envelopes, routes them through
//!   a topic exchange behind a [`Transport`], and dispatches them from a
//!   consumer task with at-least-once delivery and a bounded dedup window.
//!
//! [`Bus`] selects one of them at construction time.

#![allow(async_fn_in_trait)]

mod bus;
mod dedup;
mod durable;
mod envelope;
mod handler;
mod in_process;
mod routing;

pub mod error;
pub mod transport;

pub use bus::{Bus, EventBus};
pub use dedup::{DEFAULT_DEDUP_CAPACITY, DedupWindow};
pub use durable::{DurableBus, DurableBusConfig};
pub use envelope::{ENVELOPE_VERSION, EVENT_ID_HEADER, Envelope};
pub use error::{Error, Result};
pub use handler::{Handler, HandlerRegistry, handler};
pub use in_process::InProcessBus;
pub use routing::{ROUTING_PREFIX, routing_key, topic_matches, topic_routing_key};
pub use transport::{
  Delivery, OutboundMessage, Transport,
  amqp::{AmqpConfig, AmqpTransport},
  local::{LocalBroker, LocalTransport},
};
