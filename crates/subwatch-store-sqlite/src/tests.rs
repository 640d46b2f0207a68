//! Tests for `SqliteStore` against in-memory and file-backed databases.

use chrono::{DateTime, TimeZone, Utc};
use subwatch_core::{
  model::{Classification, SubscriptionState},
  ports::{SubscriptionStateRepo, WatchlistRepository},
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn t(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

fn state(login: &str, classification: Classification, since: Option<i64>, at: i64) -> SubscriptionState {
  SubscriptionState::new(login, classification, since.map(t), t(at))
}

// ─── Subscription state ──────────────────────────────────────────────────────

#[tokio::test]
async fn get_missing_returns_none() {
  let s = store().await;
  assert!(s.get("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_then_get_round_trips_since() {
  let s = store().await;
  let alice = state("alice", Classification::Affiliate, Some(100), 100);
  s.upsert(alice.clone()).await.unwrap();
  assert_eq!(s.get("alice").await.unwrap(), Some(alice));
}

#[tokio::test]
async fn upsert_overwrites_existing_row() {
  let s = store().await;
  s.upsert(state("bob", Classification::Partner, Some(10), 10)).await.unwrap();
  s.upsert(state("bob", Classification::None, None, 20)).await.unwrap();

  let bob = s.get("bob").await.unwrap().unwrap();
  assert_eq!(bob.classification, Classification::None);
  assert_eq!(bob.since, None);
  assert_eq!(bob.updated_at, t(20));
}

#[tokio::test]
async fn set_many_writes_every_record() {
  let s = store().await;
  s.upsert(state("a", Classification::None, None, 1)).await.unwrap();
  s.set_many(vec![
    state("a", Classification::Affiliate, Some(5), 5),
    state("b", Classification::None, None, 5),
    state("c", Classification::Partner, Some(5), 5),
  ])
  .await
  .unwrap();

  let all = s.list_all().await.unwrap();
  let logins: Vec<&str> = all.iter().map(|st| st.identity.as_str()).collect();
  assert_eq!(logins, vec!["a", "b", "c"]);
  assert_eq!(all[0].classification, Classification::Affiliate);
  assert_eq!(all[0].since, Some(t(5)));
}

#[tokio::test]
async fn set_many_empty_is_a_no_op() {
  let s = store().await;
  s.set_many(Vec::new()).await.unwrap();
  assert!(s.list_all().await.unwrap().is_empty());
}

// ─── Watchlist ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn watchlist_add_is_idempotent_and_sorted() {
  let s = store().await;
  s.add("zed").await.unwrap();
  s.add("amy").await.unwrap();
  s.add("zed").await.unwrap();

  assert_eq!(s.list().await.unwrap(), vec!["amy", "zed"]);
  assert!(s.exists("amy").await.unwrap());
  assert!(!s.exists("bob").await.unwrap());
}

#[tokio::test]
async fn watchlist_remove_reports_presence() {
  let s = store().await;
  s.add("amy").await.unwrap();
  assert!(s.remove("amy").await.unwrap());
  assert!(!s.remove("amy").await.unwrap());
  assert!(s.list().await.unwrap().is_empty());
}

// ─── Persistence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn file_store_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("subwatch.db");

  {
    let s = SqliteStore::open(&path).await.unwrap();
    s.add("amy").await.unwrap();
    s.upsert(state("amy", Classification::Partner, Some(7), 7)).await.unwrap();
  }

  let s = SqliteStore::open(&path).await.unwrap();
  assert_eq!(s.list().await.unwrap(), vec!["amy"]);
  assert_eq!(s.get("amy").await.unwrap().unwrap().since, Some(t(7)));
}
