//! Helix `users` lookup authenticated with an app access token.

use std::{sync::Arc, time::Duration};

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use subwatch_core::{model::IdentityRecord, ports::StatusLookup};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

pub const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
pub const HELIX_URL: &str = "https://api.twitch.tv/helix";

#[derive(Debug, Error)]
pub enum TwitchError {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{endpoint} returned {status}")]
  Status { endpoint: &'static str, status: StatusCode },

  #[error(transparent)]
  Classification(#[from] subwatch_core::Error),
}

#[derive(Debug, Clone)]
pub struct TwitchCredentials {
  pub client_id:     String,
  pub client_secret: String,
}

/// Cheap to clone; clones share the cached token.
#[derive(Clone)]
pub struct TwitchClient {
  http:        Client,
  credentials: TwitchCredentials,
  token:       Arc<RwLock<Option<String>>>,
  token_url:   String,
  helix_url:   String,
}

impl TwitchClient {
  pub fn new(credentials: TwitchCredentials) -> Result<Self, TwitchError> {
    let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
    Ok(Self {
      http,
      credentials,
      token: Arc::new(RwLock::new(None)),
      token_url: TOKEN_URL.to_owned(),
      helix_url: HELIX_URL.to_owned(),
    })
  }

  async fn token(&self) -> Result<String, TwitchError> {
    let cached = self.token.read().await.clone();
    match cached {
      Some(token) => Ok(token),
      None => self.refresh_token().await,
    }
  }

  async fn refresh_token(&self) -> Result<String, TwitchError> {
    let resp = self
      .http
      .post(&self.token_url)
      .form(&[
        ("client_id", self.credentials.client_id.as_str()),
        ("client_secret", self.credentials.client_secret.as_str()),
        ("grant_type", "client_credentials"),
      ])
      .send()
      .await?;
    if !resp.status().is_success() {
      return Err(TwitchError::Status { endpoint: "token", status: resp.status() });
    }
    let TokenResponse { access_token } = resp.json().await?;
    debug!("obtained app access token");
    *self.token.write().await = Some(access_token.clone());
    Ok(access_token)
  }

  async fn get_user(&self, login: &str, token: &str) -> Result<Response, TwitchError> {
    Ok(
      self
        .http
        .get(format!("{}/users", self.helix_url))
        .query(&[("login", login)])
        .header("Client-Id", &self.credentials.client_id)
        .bearer_auth(token)
        .send()
        .await?,
    )
  }
}

impl StatusLookup for TwitchClient {
  type Error = TwitchError;

  async fn lookup(&self, identity: &str) -> Result<Option<IdentityRecord>, TwitchError> {
    let token = self.token().await?;
    let mut resp = self.get_user(identity, &token).await?;

    if resp.status() == StatusCode::UNAUTHORIZED {
      debug!("app access token rejected, refreshing");
      let token = self.refresh_token().await?;
      resp = self.get_user(identity, &token).await?;
    }
    if !resp.status().is_success() {
      return Err(TwitchError::Status { endpoint: "users", status: resp.status() });
    }

    let users: HelixUsers = resp.json().await?;
    users.into_record()
  }
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TokenResponse {
  access_token: String,
}

#[derive(Debug, Deserialize)]
struct HelixUsers {
  #[serde(default)]
  data: Vec<HelixUser>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
  id:               String,
  login:            String,
  #[serde(default)]
  display_name:     String,
  #[serde(default)]
  broadcaster_type: String,
}

impl HelixUsers {
  /// First entry, or `None` when the login is unknown.
  fn into_record(self) -> Result<Option<IdentityRecord>, TwitchError> {
    let Some(user) = self.data.into_iter().next() else { return Ok(None) };
    let classification = user.broadcaster_type.parse()?;
    let display_name = if user.display_name.is_empty() { user.login.clone() } else { user.display_name };
    Ok(Some(IdentityRecord { id: user.id, login: user.login, display_name, classification }))
  }
}
