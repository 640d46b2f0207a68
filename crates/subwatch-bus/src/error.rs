//! Error type for `subwatch-bus`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] subwatch_core::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("transport error: {0}")]
  Transport(#[from] lapin::Error),

  /// The broker refused a published message.
  #[error("broker rejected message for {0}")]
  Rejected(String),

  #[error("{failed} of {total} handlers failed for {event}")]
  Handlers {
    event:  &'static str,
    failed: usize,
    total:  usize,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
