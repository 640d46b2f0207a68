//! Conversions between domain types and the text stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings; classifications use their lowercase name.

use chrono::{DateTime, Utc};
use subwatch_core::model::{Classification, SubscriptionState};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column values of one `subscription_state` row.
pub struct RawState {
  pub login:          String,
  pub classification: String,
  pub since:          Option<String>,
  pub updated_at:     String,
}

impl RawState {
  pub fn encode(state: &SubscriptionState) -> Self {
    Self {
      login:          state.identity.clone(),
      classification: state.classification.as_str().to_owned(),
      since:          state.since.map(encode_dt),
      updated_at:     encode_dt(state.updated_at),
    }
  }

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      login:          row.get(0)?,
      classification: row.get(1)?,
      since:          row.get(2)?,
      updated_at:     row.get(3)?,
    })
  }

  pub fn into_state(self) -> Result<SubscriptionState> {
    let classification: Classification = self.classification.parse()?;
    let since = self.since.as_deref().map(decode_dt).transpose()?;
    let updated_at = decode_dt(&self.updated_at)?;
    Ok(SubscriptionState::new(self.login, classification, since, updated_at))
  }
}
