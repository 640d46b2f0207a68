//! Error types for `subwatch-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown classification: {0:?}")]
  UnknownClassification(String),

  #[error("unknown event type: {0:?}")]
  UnknownEvent(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
