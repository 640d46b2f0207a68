//! JSON wire format of the durable bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subwatch_core::event::{DomainEvent, EventPayload};
use uuid::Uuid;

use crate::Result;

pub const ENVELOPE_VERSION: u32 = 1;

/// Message header carrying the event id; the dedup key on receipt.
pub const EVENT_ID_HEADER: &str = "event_id";

/// `{id, occurred_at, name, version, payload}` with `occurred_at` in RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
  pub id:          Uuid,
  pub occurred_at: DateTime<Utc>,
  pub name:        String,
  pub version:     u32,
  #[serde(default)]
  pub payload:     serde_json::Value,
}

impl Envelope {
  pub fn seal(event: &DomainEvent) -> Result<Self> {
    let (name, payload) = event.payload.to_parts()?;
    Ok(Self {
      id: event.id,
      occurred_at: event.occurred_at,
      name: name.to_owned(),
      version: ENVELOPE_VERSION,
      payload,
    })
  }

  /// Rebuild the event. A missing or `null` payload reads as `{}`.
  pub fn open(self) -> Result<DomainEvent> {
    let payload = match self.payload {
      serde_json::Value::Null => serde_json::Value::Object(Default::default()),
      other => other,
    };
    let payload = EventPayload::from_parts(&self.name, payload)?;
    Ok(DomainEvent { id: self.id, occurred_at: self.occurred_at, payload })
  }

  pub fn to_bytes(&self) -> Result<Vec<u8>> { Ok(serde_json::to_vec(self)?) }

  pub fn from_slice(body: &[u8]) -> Result<Self> { Ok(serde_json::from_slice(body)?) }
}
