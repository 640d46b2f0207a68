use subwatch_bus::EventBus;
use subwatch_core::{event::DomainEvent, ports::WatchlistRepository};
use tracing::info;

use crate::{Error, Result};

/// Watchlist management that announces changes on the bus.
pub struct WatchlistService<W, B> {
  repo: W,
  bus:  B,
}

impl<W: WatchlistRepository, B: EventBus> WatchlistService<W, B> {
  pub fn new(repo: W, bus: B) -> Self { Self { repo, bus } }

  /// Returns `false` if the identity was already watched.
  pub async fn add(&self, identity: &str) -> Result<bool> {
    let identity = normalize(identity)?;
    if self.repo.exists(&identity).await.map_err(Error::persistence)? {
      return Ok(false);
    }
    self.repo.add(&identity).await.map_err(Error::persistence)?;
    info!(identity = %identity, "added to watchlist");
    self.bus.publish_one(DomainEvent::user_added(identity)).await?;
    Ok(true)
  }

  /// Returns `true` if the identity was present and removed.
  pub async fn remove(&self, identity: &str) -> Result<bool> {
    let identity = normalize(identity)?;
    let removed = self.repo.remove(&identity).await.map_err(Error::persistence)?;
    if removed {
      info!(identity = %identity, "removed from watchlist");
      self.bus.publish_one(DomainEvent::user_removed(identity)).await?;
    }
    Ok(removed)
  }

  /// All watched identities, alphabetically.
  pub async fn list(&self) -> Result<Vec<String>> {
    let mut identities = self.repo.list().await.map_err(Error::persistence)?;
    identities.sort();
    Ok(identities)
  }
}

/// Logins are case-insensitive; store them trimmed and lowercase.
fn normalize(identity: &str) -> Result<String> {
  let trimmed = identity.trim();
  if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
    return Err(Error::InvalidIdentity(identity.to_owned()));
  }
  Ok(trimmed.to_lowercase())
}
