//! Actor resolution at the HTTP edge.
//!
//! * auth disabled: every request runs as [`Actor::System`].
//! * `X-API-Key: fg_…` (or `Authorization: Bearer fg_…`): the key's actor.
//! * `Authorization: Basic …`: a configured user, checked against the
//!   argon2 hash from `config.toml`.
//!
//! Invalid credentials are rejected with `401`. Requests without any are
//! passed on without an actor; handlers that need one answer `401` too.

use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::{Request, State},
  http::{HeaderMap, header},
  middleware::Next,
  response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use flaggate_api::{ApiError, FlagService};
use flaggate_core::{
  actor::Actor,
  store::{FlagStore, GovernanceStore},
};
use tracing::debug;

use crate::config::UserConfig;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Resolves request credentials to an [`Actor`].
pub struct Authenticator<F, G> {
  service:      Arc<FlagService<F, G>>,
  users:        Vec<UserConfig>,
  auth_enabled: bool,
}

impl<F, G> Authenticator<F, G>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  pub fn new(service: Arc<FlagService<F, G>>, users: Vec<UserConfig>) -> Self {
    let auth_enabled = service.settings().auth_enabled;
    Self {
      service,
      users,
      auth_enabled,
    }
  }

  pub async fn resolve(&self, headers: &HeaderMap) -> Result<Option<Actor>, ApiError> {
    if !self.auth_enabled {
      return Ok(Some(Actor::System));
    }

    if let Some(secret) = api_key_from(headers) {
      return match self.service.authenticate_api_key(secret).await? {
        Some(actor) => Ok(Some(actor)),
        None => {
          debug!("rejected api key");
          Err(ApiError::Unauthorized)
        }
      };
    }

    match headers.get(header::AUTHORIZATION) {
      Some(_) => self.verify_basic(headers).map(Some),
      None => Ok(None),
    }
  }

  /// Check HTTP Basic credentials against the configured users.
  pub fn verify_basic(&self, headers: &HeaderMap) -> Result<Actor, ApiError> {
    let encoded = headers
      .get(header::AUTHORIZATION)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.strip_prefix("Basic "))
      .ok_or(ApiError::Unauthorized)?;

    let decoded = B64.decode(encoded).map_err(|_| ApiError::Unauthorized)?;
    let creds = std::str::from_utf8(&decoded).map_err(|_| ApiError::Unauthorized)?;
    let (login, password) = creds.split_once(':').ok_or(ApiError::Unauthorized)?;

    let user = self
      .users
      .iter()
      .find(|u| u.login() == login)
      .ok_or(ApiError::Unauthorized)?;

    let parsed_hash =
      PasswordHash::new(&user.password_hash).map_err(|_| ApiError::Unauthorized)?;
    Argon2::default()
      .verify_password(password.as_bytes(), &parsed_hash)
      .map_err(|_| ApiError::Unauthorized)?;

    Ok(Actor::User {
      id:    user.id.clone(),
      email: user.email.clone(),
      name:  user.name.clone().or_else(|| user.username.clone()),
    })
  }
}

/// The presented API key, if any.
fn api_key_from(headers: &HeaderMap) -> Option<&str> {
  if let Some(v) = headers.get(API_KEY_HEADER) {
    return v.to_str().ok();
  }
  headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
}

/// Middleware storing the resolved [`Actor`] as a request extension.
pub async fn resolve_actor<F, G>(
  State(auth): State<Arc<Authenticator<F, G>>>,
  mut req: Request,
  next: Next,
) -> Result<Response, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  if let Some(actor) = auth.resolve(req.headers()).await? {
    req.extensions_mut().insert(actor);
  }
  Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
  use argon2::{PasswordHasher, password_hash::SaltString};
  use axum::http::HeaderValue;
  use flaggate_api::ServiceSettings;
  use flaggate_store_sqlite::SqliteStore;
  use rand_core::OsRng;

  use super::*;

  fn hash(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .unwrap()
      .to_string()
  }

  async fn authenticator(auth_enabled: bool) -> Authenticator<SqliteStore, SqliteStore> {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let service = FlagService::new(store.clone(), store, ServiceSettings {
      auth_enabled,
      ..ServiceSettings::default()
    });
    Authenticator::new(Arc::new(service), vec![UserConfig {
      id:            "u1".into(),
      username:      Some("alice".into()),
      email:         Some("alice@example.com".into()),
      name:          None,
      password_hash: hash("hunter2"),
      admin:         false,
    }])
  }

  fn basic(login: &str, password: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let value = format!("Basic {}", B64.encode(format!("{login}:{password}")));
    headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
    headers
  }

  #[tokio::test]
  async fn correct_password_resolves_user() {
    let auth = authenticator(true).await;
    let actor = auth.resolve(&basic("alice", "hunter2")).await.unwrap().unwrap();
    assert_eq!(actor, Actor::User {
      id:    "u1".into(),
      email: Some("alice@example.com".into()),
      name:  Some("alice".into()),
    });
  }

  #[tokio::test]
  async fn wrong_password_or_user_is_rejected() {
    let auth = authenticator(true).await;
    assert!(matches!(
      auth.resolve(&basic("alice", "nope")).await,
      Err(ApiError::Unauthorized)
    ));
    assert!(matches!(
      auth.resolve(&basic("mallory", "hunter2")).await,
      Err(ApiError::Unauthorized)
    ));
  }

  #[tokio::test]
  async fn no_credentials_means_no_actor() {
    let auth = authenticator(true).await;
    assert!(auth.resolve(&HeaderMap::new()).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn unknown_api_key_is_rejected() {
    let auth = authenticator(true).await;
    let mut headers = HeaderMap::new();
    headers.insert(API_KEY_HEADER, HeaderValue::from_static("fg_bogus"));
    assert!(matches!(auth.resolve(&headers).await, Err(ApiError::Unauthorized)));
  }

  #[tokio::test]
  async fn disabled_auth_is_the_system_actor() {
    let auth = authenticator(false).await;
    let actor = auth.resolve(&basic("alice", "wrong")).await.unwrap();
    assert_eq!(actor, Some(Actor::System));
  }
}
