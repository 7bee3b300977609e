//! HTTP server for the flaggate control plane.
//!
//! Wires configuration, actor resolution, and request tracing around
//! [`flaggate_api::api_router`].

pub mod auth;
pub mod config;

use std::sync::Arc;

use axum::{Router, middleware};
use flaggate_api::FlagService;
use flaggate_core::{
  Error, Result,
  store::{FlagStore, GovernanceStore, RoleStore},
};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use config::ServerConfig;

use auth::{Authenticator, resolve_actor};
use config::UserConfig;

/// The complete application: API routes behind actor resolution and
/// request tracing.
pub fn router<F, G>(service: Arc<FlagService<F, G>>, users: Vec<UserConfig>) -> Router
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  let auth = Arc::new(Authenticator::new(service.clone(), users));
  flaggate_api::api_router(service)
    .layer(middleware::from_fn_with_state(auth, resolve_actor::<F, G>))
    .layer(TraceLayer::new_for_http())
}

/// Give every configured user marked `admin = true` the built-in admin role,
/// keeping their other assignments.
pub async fn bootstrap_admins<R: RoleStore>(store: &R, users: &[UserConfig]) -> Result<()> {
  let roles = store.list_roles().await.map_err(Into::<Error>::into)?;
  let Some(admin) = roles.iter().find(|r| r.builtin && r.name == "admin") else {
    return Err(Error::not_found("role", "admin"));
  };

  for user in users.iter().filter(|u| u.admin) {
    let held = store.user_roles(&user.id).await.map_err(Into::<Error>::into)?;
    if held.iter().any(|r| r.id == admin.id) {
      continue;
    }
    let ids: Vec<_> = held.iter().map(|r| r.id).chain([admin.id]).collect();
    store
      .set_user_roles(&user.id, &ids)
      .await
      .map_err(Into::<Error>::into)?;
    info!(user = %user.id, "granted admin role from configuration");
  }
  Ok(())
}
