//! Handlers for `/api-keys` endpoints.
//!
//! The secret is returned once, in the `POST` response; listings only carry
//! its prefix.

use axum::{Json, http::StatusCode, response::IntoResponse};
use flaggate_core::{
  rbac::ApiKey,
  store::{FlagStore, GovernanceStore},
};
use uuid::Uuid;

use super::{AppState, JsonBody, PathParams};
use crate::{actor::CurrentActor, error::ApiError, service::CreateApiKey};

/// `GET /api-keys`
pub async fn list<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<ApiKey>>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.list_api_keys(&actor).await?))
}

/// `POST /api-keys`, body: `{"name":"ci","tier":"write","expiresAt":null}`
pub async fn create<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  JsonBody(body): JsonBody<CreateApiKey>,
) -> Result<impl IntoResponse, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  let issued = state.create_api_key(&actor, body).await?;
  Ok((StatusCode::CREATED, Json(issued)))
}

/// `DELETE /api-keys/{id}`
pub async fn delete<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(id): PathParams<Uuid>,
) -> Result<StatusCode, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  state.delete_api_key(&actor, id).await?;
  Ok(StatusCode::NO_CONTENT)
}
