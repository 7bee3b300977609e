//! Handlers for `/roles` and `/users` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`    | `/roles` | |
//! | `POST`   | `/roles` | 201; 409 on a duplicate name |
//! | `GET`    | `/roles/{id}` | |
//! | `PUT`    | `/roles/{id}` | Partial update; built-in roles are refused |
//! | `DELETE` | `/roles/{id}` | 204; built-in roles are refused |
//! | `GET`    | `/users` | Users with their roles |
//! | `PUT`    | `/users/{id}/roles` | Body: `{"roleIds":[...]}` |

use axum::{Json, http::StatusCode, response::IntoResponse};
use flaggate_core::{
  rbac::{NewRole, Role, RoleUpdate, UserRoles},
  store::{FlagStore, GovernanceStore},
};
use serde::Deserialize;
use uuid::Uuid;

use super::{AppState, JsonBody, PathParams};
use crate::{actor::CurrentActor, error::ApiError, service::UserSummary};

// ─── Roles ────────────────────────────────────────────────────────────────────

/// `GET /roles`
pub async fn list<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<Role>>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.list_roles(&actor).await?))
}

/// `POST /roles`
pub async fn create<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  JsonBody(body): JsonBody<NewRole>,
) -> Result<impl IntoResponse, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  let role = state.create_role(&actor, body).await?;
  Ok((StatusCode::CREATED, Json(role)))
}

/// `GET /roles/{id}`
pub async fn get_one<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(id): PathParams<Uuid>,
) -> Result<Json<Role>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.get_role(&actor, id).await?))
}

/// `PUT /roles/{id}`
pub async fn update<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(id): PathParams<Uuid>,
  JsonBody(body): JsonBody<RoleUpdate>,
) -> Result<Json<Role>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.update_role(&actor, id, body).await?))
}

/// `DELETE /roles/{id}`
pub async fn delete<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(id): PathParams<Uuid>,
) -> Result<StatusCode, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  state.delete_role(&actor, id).await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Users ────────────────────────────────────────────────────────────────────

/// `GET /users`
pub async fn users<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<UserSummary>>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.list_users(&actor).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBody {
  pub role_ids: Vec<Uuid>,
}

/// `PUT /users/{id}/roles`
pub async fn set_roles<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(user_id): PathParams<String>,
  JsonBody(body): JsonBody<AssignBody>,
) -> Result<Json<UserRoles>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.set_user_roles(&actor, &user_id, &body.role_ids).await?))
}
