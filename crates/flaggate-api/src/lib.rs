//! JSON REST API for the flaggate control plane.
//!
//! Exposes the [`FlagService`] orchestrator and an axum [`Router`] over it.
//! Authentication, TLS, and transport concerns are the caller's
//! responsibility: the caller resolves an
//! [`Actor`](flaggate_core::actor::Actor) and stores it as a request
//! extension before the router runs.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", flaggate_api::api_router(service.clone()))
//! ```

pub mod actor;
pub mod api_key;
pub mod audit_log;
pub mod error;
pub mod handlers;
pub mod permissions;
pub mod refresh;
pub mod service;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post, put},
};
use flaggate_core::store::{FlagStore, GovernanceStore};

pub use actor::CurrentActor;
pub use error::ApiError;
pub use service::{FlagService, ServiceSettings};

use handlers::{admin, api_keys, audit, change_requests, flags, roles};

/// Build a fully-materialised API router over `service`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<F, G>(service: Arc<FlagService<F, G>>) -> Router<()>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Router::new()
    .route("/health", get(admin::health))
    // Flags
    .route("/projects", get(flags::projects::<F, G>))
    .route(
      "/projects/{project}",
      get(flags::project::<F, G>)
        .post(flags::create_project::<F, G>)
        .delete(flags::delete_project::<F, G>),
    )
    .route("/projects/{project}/flags", get(flags::list::<F, G>))
    .route("/projects/{project}/flags/bulk/toggle", post(flags::bulk_toggle::<F, G>))
    .route("/projects/{project}/flags/bulk/delete", post(flags::bulk_delete::<F, G>))
    .route(
      "/projects/{project}/flags/{key}",
      get(flags::get_one::<F, G>)
        .post(flags::create::<F, G>)
        .put(flags::update::<F, G>)
        .delete(flags::delete::<F, G>),
    )
    .route("/projects/{project}/flags/{key}/clone", post(flags::clone::<F, G>))
    .route("/projects/{project}/flags/{key}/audit", get(audit::flag_history::<F, G>))
    .route("/flags/raw/{project}", get(flags::raw::<F, G>))
    // Change requests
    .route(
      "/change-requests",
      get(change_requests::list::<F, G>).post(change_requests::create::<F, G>),
    )
    .route("/change-requests/count", get(change_requests::count::<F, G>))
    .route("/change-requests/{id}", get(change_requests::get_one::<F, G>))
    .route("/change-requests/{id}/review", post(change_requests::review::<F, G>))
    .route("/change-requests/{id}/apply", post(change_requests::apply::<F, G>))
    .route("/change-requests/{id}/cancel", post(change_requests::cancel::<F, G>))
    // Roles and users
    .route("/roles", get(roles::list::<F, G>).post(roles::create::<F, G>))
    .route(
      "/roles/{id}",
      get(roles::get_one::<F, G>)
        .put(roles::update::<F, G>)
        .delete(roles::delete::<F, G>),
    )
    .route("/users", get(roles::users::<F, G>))
    .route("/users/{id}/roles", put(roles::set_roles::<F, G>))
    // API keys
    .route("/api-keys", get(api_keys::list::<F, G>).post(api_keys::create::<F, G>))
    .route("/api-keys/{id}", axum::routing::delete(api_keys::delete::<F, G>))
    // Audit
    .route("/audit", get(audit::list::<F, G>))
    .route("/audit/export", get(audit::export::<F, G>))
    // Admin
    .route("/admin/refresh", post(admin::refresh::<F, G>))
    .with_state(service)
}

#[cfg(test)]
mod tests;
