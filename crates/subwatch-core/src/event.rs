//! Domain events emitted by the watcher, the scheduler and watchlist
//! management.
//!
//! Every event carries a unique `id` (the sole deduplication key on the
//! durable bus) and the instant it occurred. The variant data lives in
//! [`EventPayload`], whose serde form is `{"name": ..., "payload": {...}}`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, model::Classification};

// ─── Event ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
  pub id:          Uuid,
  pub occurred_at: DateTime<Utc>,
  pub payload:     EventPayload,
}

impl DomainEvent {
  /// Stamp `payload` with a fresh id and the current time.
  pub fn new(payload: EventPayload) -> Self {
    Self { id: Uuid::new_v4(), occurred_at: Utc::now(), payload }
  }

  pub fn kind(&self) -> EventKind { self.payload.kind() }

  /// The type name, e.g. `"LoopCheckFailed"`.
  pub fn name(&self) -> &'static str { self.kind().name() }

  pub fn once_checked(identity: impl Into<String>, current_state: Classification) -> Self {
    Self::new(EventPayload::OnceChecked { identity: identity.into(), current_state })
  }

  pub fn loop_checked(identities: Vec<String>) -> Self {
    Self::new(EventPayload::LoopChecked { identities })
  }

  pub fn loop_check_failed(identities: Vec<String>, error: impl Into<String>) -> Self {
    Self::new(EventPayload::LoopCheckFailed { identities, error: error.into() })
  }

  pub fn user_become_subscribable(
    identity: impl Into<String>,
    current_state: Classification,
  ) -> Self {
    Self::new(EventPayload::UserBecomeSubscribable { identity: identity.into(), current_state })
  }

  pub fn user_added(identity: impl Into<String>) -> Self {
    Self::new(EventPayload::UserAdded { identity: identity.into() })
  }

  pub fn user_removed(identity: impl Into<String>) -> Self {
    Self::new(EventPayload::UserRemoved { identity: identity.into() })
  }

  pub fn day_changed() -> Self { Self::new(EventPayload::DayChanged {}) }
}

// ─── Payload ─────────────────────────────────────────────────────────────────

/// Variant data of a [`DomainEvent`].
///
/// All variants are struct variants so that every payload serialises as a
/// JSON object, including the empty `DayChanged {}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload")]
pub enum EventPayload {
  /// Emitted after each individual identity lookup.
  OnceChecked { identity: String, current_state: Classification },
  /// Emitted after a reconciliation pass completed.
  LoopChecked { identities: Vec<String> },
  /// Emitted when a reconciliation pass failed.
  LoopCheckFailed { identities: Vec<String>, error: String },
  /// Emitted exactly when the notifiable predicate flips from false to true.
  UserBecomeSubscribable { identity: String, current_state: Classification },
  UserAdded { identity: String },
  UserRemoved { identity: String },
  /// Emitted by the day-change scheduler on every cron tick.
  DayChanged {},
}

impl EventPayload {
  pub fn kind(&self) -> EventKind {
    match self {
      Self::OnceChecked { .. } => EventKind::OnceChecked,
      Self::LoopChecked { .. } => EventKind::LoopChecked,
      Self::LoopCheckFailed { .. } => EventKind::LoopCheckFailed,
      Self::UserBecomeSubscribable { .. } => EventKind::UserBecomeSubscribable,
      Self::UserAdded { .. } => EventKind::UserAdded,
      Self::UserRemoved { .. } => EventKind::UserRemoved,
      Self::DayChanged {} => EventKind::DayChanged,
    }
  }

  /// Split into the type name and the bare payload object.
  pub fn to_parts(&self) -> Result<(&'static str, serde_json::Value)> {
    // The full serialised form is `{"name": "...", "payload": {...}}`.
    // We want only the payload.
    let full = serde_json::to_value(self)?;
    let payload = full
      .get("payload")
      .cloned()
      .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
    Ok((self.kind().name(), payload))
  }

  /// Rebuild from a type name and bare payload object.
  pub fn from_parts(name: &str, payload: serde_json::Value) -> Result<Self> {
    EventKind::from_name(name).ok_or_else(|| Error::UnknownEvent(name.to_owned()))?;
    let full = serde_json::json!({ "name": name, "payload": payload });
    Ok(serde_json::from_value(full)?)
  }
}

// ─── Kind & topic ────────────────────────────────────────────────────────────

/// The fieldless tag of every [`EventPayload`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
  OnceChecked,
  LoopChecked,
  LoopCheckFailed,
  UserBecomeSubscribable,
  UserAdded,
  UserRemoved,
  DayChanged,
}

impl EventKind {
  pub const ALL: [EventKind; 7] = [
    Self::OnceChecked,
    Self::LoopChecked,
    Self::LoopCheckFailed,
    Self::UserBecomeSubscribable,
    Self::UserAdded,
    Self::UserRemoved,
    Self::DayChanged,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Self::OnceChecked => "OnceChecked",
      Self::LoopChecked => "LoopChecked",
      Self::LoopCheckFailed => "LoopCheckFailed",
      Self::UserBecomeSubscribable => "UserBecomeSubscribable",
      Self::UserAdded => "UserAdded",
      Self::UserRemoved => "UserRemoved",
      Self::DayChanged => "DayChanged",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|k| k.name() == name)
  }
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// What a handler subscribes to: one concrete kind, or every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
  Kind(EventKind),
  All,
}

impl Topic {
  pub fn matches(self, kind: EventKind) -> bool {
    match self {
      Self::Kind(k) => k == kind,
      Self::All => true,
    }
  }
}

impl From<EventKind> for Topic {
  fn from(kind: EventKind) -> Self { Self::Kind(kind) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parts_split_name_and_payload() {
    let event = DomainEvent::loop_check_failed(vec!["b".into(), "c".into()], "boom");
    let (name, payload) = event.payload.to_parts().unwrap();
    assert_eq!(name, "LoopCheckFailed");
    assert_eq!(payload["identities"], serde_json::json!(["b", "c"]));
    assert_eq!(payload["error"], "boom");

    let rebuilt = EventPayload::from_parts(name, payload).unwrap();
    assert_eq!(rebuilt, event.payload);
  }

  #[test]
  fn empty_payload_is_an_object() {
    let (name, payload) = DomainEvent::day_changed().payload.to_parts().unwrap();
    assert_eq!(name, "DayChanged");
    assert!(payload.is_object());
    assert_eq!(
      EventPayload::from_parts(name, payload).unwrap(),
      EventPayload::DayChanged {}
    );
  }

  #[test]
  fn unknown_name_is_rejected() {
    let err = EventPayload::from_parts("Nope", serde_json::json!({})).unwrap_err();
    assert!(matches!(err, Error::UnknownEvent(_)));
  }

  #[test]
  fn kind_names_round_trip() {
    for kind in EventKind::ALL {
      assert_eq!(EventKind::from_name(kind.name()), Some(kind));
    }
  }

  #[test]
  fn topic_all_matches_everything() {
    assert!(Topic::All.matches(EventKind::DayChanged));
    assert!(Topic::from(EventKind::LoopChecked).matches(EventKind::LoopChecked));
    assert!(!Topic::from(EventKind::LoopChecked).matches(EventKind::LoopCheckFailed));
  }

  #[test]
  fn event_ids_are_unique() {
    let a = DomainEvent::day_changed();
    let b = DomainEvent::day_changed();
    assert_ne!(a.id, b.id);
  }
}
