//! Domain model: classifications, lookup records and persisted state.
//!
//! An identity is an externally tracked account under watch. Its
//! [`Classification`] is observed through the lookup collaborator and the
//! last known value is kept as a [`SubscriptionState`].

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Classification ──────────────────────────────────────────────────────────

/// The three-valued status of an identity.
///
/// `Affiliate` and `Partner` are the two notifiable tiers.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
  #[default]
  None,
  Affiliate,
  Partner,
}

impl Classification {
  /// True iff the identity currently has a notifiable tier. This predicate
  /// alone decides whether a transition fires a notification.
  pub fn is_notifiable(self) -> bool { matches!(self, Self::Affiliate | Self::Partner) }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::None => "none",
      Self::Affiliate => "affiliate",
      Self::Partner => "partner",
    }
  }
}

impl fmt::Display for Classification {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Classification {
  type Err = Error;

  /// Accepts the external service's empty string as [`Classification::None`].
  fn from_str(s: &str) -> Result<Self> {
    match s {
      "" | "none" => Ok(Self::None),
      "affiliate" => Ok(Self::Affiliate),
      "partner" => Ok(Self::Partner),
      other => Err(Error::UnknownClassification(other.to_owned())),
    }
  }
}

// ─── Lookup results ──────────────────────────────────────────────────────────

/// The raw record returned by the external status service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
  pub id:             String,
  pub login:          String,
  pub display_name:   String,
  pub classification: Classification,
}

/// Result of checking a single identity. `record` is `None` when the service
/// does not know the identity, in which case the classification is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStatus {
  pub identity:       String,
  pub classification: Classification,
  pub record:         Option<IdentityRecord>,
}

impl IdentityStatus {
  pub fn from_lookup(identity: impl Into<String>, record: Option<IdentityRecord>) -> Self {
    let classification = record
      .as_ref()
      .map(|r| r.classification)
      .unwrap_or_default();
    Self { identity: identity.into(), classification, record }
  }

  /// Human-facing name: the service's display name if known.
  pub fn display_name(&self) -> &str {
    self
      .record
      .as_ref()
      .map(|r| r.display_name.as_str())
      .unwrap_or(&self.identity)
  }
}

// ─── Persisted state ─────────────────────────────────────────────────────────

/// The last known classification of one watched identity.
///
/// `since` is set iff `classification` is notifiable and records when the
/// identity entered the notifiable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionState {
  pub identity:       String,
  pub classification: Classification,
  pub since:          Option<DateTime<Utc>>,
  pub updated_at:     DateTime<Utc>,
}

impl SubscriptionState {
  /// Build a record, clearing `since` when the classification is not
  /// notifiable.
  pub fn new(
    identity: impl Into<String>,
    classification: Classification,
    since: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
  ) -> Self {
    let since = if classification.is_notifiable() { since } else { None };
    Self { identity: identity.into(), classification, since, updated_at }
  }

  /// The state that follows `prev` after observing `current` at `now`.
  ///
  /// `since` is kept while the identity stays notifiable (including
  /// tier-to-tier moves), set to `now` on entry and cleared on exit.
  pub fn reconcile(
    prev: Option<&SubscriptionState>,
    identity: impl Into<String>,
    current: Classification,
    now: DateTime<Utc>,
  ) -> Self {
    let since = match prev {
      Some(p) if p.is_notifiable() && current.is_notifiable() => p.since.or(Some(now)),
      _ if current.is_notifiable() => Some(now),
      _ => None,
    };
    Self::new(identity, current, since, now)
  }

  pub fn is_notifiable(&self) -> bool { self.classification.is_notifiable() }
}

/// One line of the periodic report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLine {
  pub identity:       String,
  pub classification: Classification,
}

impl ReportLine {
  /// Project a stored state (or its absence) onto a report line.
  pub fn project(identity: &str, state: Option<&SubscriptionState>) -> Self {
    let classification = state
      .filter(|s| s.is_notifiable())
      .map(|s| s.classification)
      .unwrap_or_default();
    Self { identity: identity.to_owned(), classification }
  }
}
