//! Narrow interfaces to the collaborators around the reconciliation core.
//!
//! The engine depends on these traits only; concrete implementations live in
//! `subwatch-store-sqlite` (persistence) and `subwatch-cli` (the HTTP lookup
//! client and the notifiers).
//!
//! All methods return `Send` futures so implementations can be driven from a
//! multi-threaded tokio runtime and from spawned tasks.

use std::future::Future;

use crate::model::{
  Classification, IdentityRecord, IdentityStatus, ReportLine, SubscriptionState,
};

/// Error type bound shared by every port.
pub trait PortError: std::error::Error + Send + Sync + 'static {}
impl<T: std::error::Error + Send + Sync + 'static> PortError for T {}

// ─── Lookup ──────────────────────────────────────────────────────────────────

/// Given an identity, returns its current record, or `None` if the external
/// service does not know it. Transport failures are errors, never `None`.
pub trait StatusLookup: Send + Sync {
  type Error: PortError;

  fn lookup<'a>(
    &'a self,
    identity: &'a str,
  ) -> impl Future<Output = Result<Option<IdentityRecord>, Self::Error>> + Send + 'a;
}

// ─── Persistence ─────────────────────────────────────────────────────────────

/// Per-identity last known classification.
pub trait SubscriptionStateRepo: Send + Sync {
  type Error: PortError;

  fn get<'a>(
    &'a self,
    identity: &'a str,
  ) -> impl Future<Output = Result<Option<SubscriptionState>, Self::Error>> + Send + 'a;

  fn upsert(
    &self,
    state: SubscriptionState,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Upsert every record in a single write transaction. An empty batch is a
  /// no-op.
  fn set_many(
    &self,
    states: Vec<SubscriptionState>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_all(
    &self,
  ) -> impl Future<Output = Result<Vec<SubscriptionState>, Self::Error>> + Send + '_;
}

/// Ordered set of identities under watch.
pub trait WatchlistRepository: Send + Sync {
  type Error: PortError;

  /// Add `identity`. Idempotent.
  fn add<'a>(
    &'a self,
    identity: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Remove `identity`; returns `true` if it was present.
  fn remove<'a>(
    &'a self,
    identity: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// All identities, sorted alphabetically.
  fn list(&self) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  fn exists<'a>(
    &'a self,
    identity: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;
}

/// Supplies the identity list; re-queried on every reconciliation pass.
pub trait IdentitySource: Send + Sync {
  type Error: PortError;

  fn get(&self) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;
}

// ─── Notification ────────────────────────────────────────────────────────────

/// Delivery options for [`Notifier::send_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageOptions {
  pub disable_web_page_preview: bool,
  pub disable_notification:     bool,
}

impl Default for MessageOptions {
  fn default() -> Self { Self { disable_web_page_preview: true, disable_notification: false } }
}

impl MessageOptions {
  pub fn silent() -> Self { Self { disable_notification: true, ..Self::default() } }
}

/// Best-effort outbound messaging. Every call may fail; callers log and
/// swallow the error.
pub trait Notifier: Send + Sync {
  type Error: PortError;

  fn notify_about_change<'a>(
    &'a self,
    status: &'a IdentityStatus,
    current: Classification,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn notify_about_start(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn notify_about_stop(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn notify_report<'a>(
    &'a self,
    lines: &'a [ReportLine],
    checks: u64,
    errors: u64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn send_message<'a>(
    &'a self,
    text: &'a str,
    options: MessageOptions,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
