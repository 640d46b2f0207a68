//! [`SqliteStore`], the SQLite implementation of the persistence ports.

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use subwatch_core::{
  model::SubscriptionState,
  ports::{SubscriptionStateRepo, WatchlistRepository},
};
use tracing::debug;

use crate::{
  Error, Result,
  encode::{RawState, encode_dt},
  schema::{SCHEMA, UPSERT_STATE},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// Watchlist and subscription state backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── SubscriptionStateRepo impl ──────────────────────────────────────────────

impl SubscriptionStateRepo for SqliteStore {
  type Error = Error;

  async fn get(&self, identity: &str) -> Result<Option<SubscriptionState>> {
    let login = identity.to_owned();
    let raw: Option<RawState> = self
      .conn
      .call(move |conn| {
        let raw = conn
          .query_row(
            "SELECT login, classification, since, updated_at
             FROM subscription_state WHERE login = ?1",
            rusqlite::params![login],
            RawState::from_row,
          )
          .optional()?;
        Ok(raw)
      })
      .await?;

    raw.map(RawState::into_state).transpose()
  }

  async fn upsert(&self, state: SubscriptionState) -> Result<()> {
    let raw = RawState::encode(&state);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          UPSERT_STATE,
          rusqlite::params![raw.login, raw.classification, raw.since, raw.updated_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn set_many(&self, states: Vec<SubscriptionState>) -> Result<()> {
    if states.is_empty() {
      return Ok(());
    }
    let rows: Vec<RawState> = states.iter().map(RawState::encode).collect();
    let count = rows.len();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare_cached(UPSERT_STATE)?;
          for raw in &rows {
            stmt.execute(rusqlite::params![
              raw.login,
              raw.classification,
              raw.since,
              raw.updated_at,
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    debug!(count, "subscription states written");
    Ok(())
  }

  async fn list_all(&self) -> Result<Vec<SubscriptionState>> {
    let raws: Vec<RawState> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT login, classification, since, updated_at
           FROM subscription_state ORDER BY login ASC",
        )?;
        let rows = stmt
          .query_map([], RawState::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawState::into_state).collect()
  }
}

// ─── WatchlistRepository impl ────────────────────────────────────────────────

impl WatchlistRepository for SqliteStore {
  type Error = Error;

  async fn add(&self, identity: &str) -> Result<()> {
    let login = identity.to_owned();
    let created_at = encode_dt(Utc::now());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO watchlist (login, created_at) VALUES (?1, ?2)",
          rusqlite::params![login, created_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn remove(&self, identity: &str) -> Result<bool> {
    let login = identity.to_owned();
    let removed = self
      .conn
      .call(move |conn| {
        let n = conn.execute("DELETE FROM watchlist WHERE login = ?1", rusqlite::params![login])?;
        Ok(n > 0)
      })
      .await?;
    Ok(removed)
  }

  async fn list(&self) -> Result<Vec<String>> {
    let logins = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT login FROM watchlist ORDER BY login ASC")?;
        let rows = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(logins)
  }

  async fn exists(&self, identity: &str) -> Result<bool> {
    let login = identity.to_owned();
    let found = self
      .conn
      .call(move |conn| {
        let found = conn
          .query_row(
            "SELECT 1 FROM watchlist WHERE login = ?1",
            rusqlite::params![login],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        Ok(found)
      })
      .await?;
    Ok(found)
  }
}
