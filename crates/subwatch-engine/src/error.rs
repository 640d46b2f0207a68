//! Error type for `subwatch-engine`.

use thiserror::Error;

/// A boxed port error; the ports each bring their own error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
  /// The lookup collaborator failed; the identity is retried next pass.
  #[error("lookup failed for {identity}: {source}")]
  Lookup {
    identity: String,
    #[source]
    source:   BoxError,
  },

  #[error("persistence error: {0}")]
  Persistence(#[source] BoxError),

  #[error("identity source error: {0}")]
  Source(#[source] BoxError),

  #[error("event bus error: {0}")]
  Bus(#[from] subwatch_bus::Error),

  #[error("invalid cron expression {expr:?}: {reason}")]
  Cron { expr: String, reason: String },

  #[error("invalid identity: {0:?}")]
  InvalidIdentity(String),
}

impl Error {
  pub(crate) fn persistence(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Persistence(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
