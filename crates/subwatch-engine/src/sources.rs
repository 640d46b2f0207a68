//! [`IdentitySource`] implementations.

use std::{collections::HashSet, convert::Infallible};

use subwatch_core::ports::{IdentitySource, WatchlistRepository};

/// A fixed list given on the command line. Duplicates are dropped, first
/// occurrence wins.
#[derive(Debug, Clone)]
pub struct StaticIdentities {
  identities: Vec<String>,
}

impl StaticIdentities {
  pub fn new<I, S>(identities: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut seen = HashSet::new();
    let identities = identities
      .into_iter()
      .map(Into::into)
      .filter(|id: &String| seen.insert(id.clone()))
      .collect();
    Self { identities }
  }
}

impl IdentitySource for StaticIdentities {
  type Error = Infallible;

  async fn get(&self) -> Result<Vec<String>, Infallible> { Ok(self.identities.clone()) }
}

/// Re-reads the watchlist on every pass so edits apply without a restart.
#[derive(Debug, Clone)]
pub struct WatchlistIdentities<W> {
  repo: W,
}

impl<W: WatchlistRepository> WatchlistIdentities<W> {
  pub fn new(repo: W) -> Self { Self { repo } }
}

impl<W: WatchlistRepository> IdentitySource for WatchlistIdentities<W> {
  type Error = W::Error;

  async fn get(&self) -> Result<Vec<String>, W::Error> { self.repo.list().await }
}
