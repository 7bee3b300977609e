//! Handlers for `/projects` and `/flags/raw` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`    | `/projects` | Project names |
//! | `GET`    | `/projects/{p}` | `{project, flags}` |
//! | `POST`   | `/projects/{p}` | 201 `{project, status}`; 409 if it exists |
//! | `DELETE` | `/projects/{p}` | 204; removes every flag in it |
//! | `GET`    | `/projects/{p}/flags` | `?page&pageSize&sort&order&search` |
//! | `GET`    | `/projects/{p}/flags/{key}` | `ETag` is the payload digest |
//! | `POST`   | `/projects/{p}/flags/{key}` | 201 |
//! | `PUT`    | `/projects/{p}/flags/{key}` | Applied flag, or `{requiresApproval, changeRequestId}` |
//! | `DELETE` | `/projects/{p}/flags/{key}` | 204 |
//! | `POST`   | `/projects/{p}/flags/{key}/clone` | 201 |
//! | `POST`   | `/projects/{p}/flags/bulk/toggle` | `{results, errors, total}` |
//! | `POST`   | `/projects/{p}/flags/bulk/delete` | `{results, errors, total}` |
//! | `GET`    | `/flags/raw/{p}` | `{key: payload}` of enabled flags |

use std::collections::BTreeMap;

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use flaggate_core::{
  flag::Flag,
  page::{Page, Paginated},
  store::{FlagStore, GovernanceStore},
};

use super::{AppState, JsonBody, PathParams, QueryParams};
use crate::{
  actor::CurrentActor,
  error::ApiError,
  service::{
    BulkDelete, BulkOutcome, BulkToggle, CloneFlag, CreateFlag, ProjectDetail, UpdateFlag,
    UpdateOutcome,
  },
};

// ─── Reads ────────────────────────────────────────────────────────────────────

/// `GET /projects`
pub async fn projects<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<String>>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.list_projects(&actor).await?))
}

/// `GET /projects/{p}`
pub async fn project<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(project): PathParams<String>,
) -> Result<Json<ProjectDetail>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.get_project(&actor, &project).await?))
}

/// `GET /projects/{p}/flags`
pub async fn list<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(project): PathParams<String>,
  QueryParams(page): QueryParams<Page>,
) -> Result<Json<Paginated<Flag>>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.list_flags(&actor, &project, &page.normalized()).await?))
}

/// `GET /projects/{p}/flags/{key}`
pub async fn get_one<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams((project, key)): PathParams<(String, String)>,
) -> Result<Response, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  let flag = state.get_flag(&actor, &project, &key).await?;
  let etag = format!("\"{}\"", flag.payload.digest());

  let mut res = Json(flag).into_response();
  if let Ok(value) = HeaderValue::from_str(&etag) {
    res.headers_mut().insert(header::ETAG, value);
  }
  Ok(res)
}

/// `GET /flags/raw/{p}`
pub async fn raw<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(project): PathParams<String>,
) -> Result<Json<BTreeMap<String, serde_json::Value>>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.raw_flags(&actor, &project).await?))
}

// ─── Writes ───────────────────────────────────────────────────────────────────

/// `POST /projects/{p}`
pub async fn create_project<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(project): PathParams<String>,
) -> Result<impl IntoResponse, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  state.create_project(&actor, &project).await?;
  Ok((
    StatusCode::CREATED,
    Json(serde_json::json!({ "project": project, "status": "created" })),
  ))
}

/// `DELETE /projects/{p}`
pub async fn delete_project<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(project): PathParams<String>,
) -> Result<StatusCode, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  state.delete_project(&actor, &project).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// `POST /projects/{p}/flags/{key}`
pub async fn create<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams((project, key)): PathParams<(String, String)>,
  JsonBody(body): JsonBody<CreateFlag>,
) -> Result<impl IntoResponse, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  let flag = state.create_flag(&actor, &project, &key, body).await?;
  Ok((StatusCode::CREATED, Json(flag)))
}

/// `PUT /projects/{p}/flags/{key}`
pub async fn update<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams((project, key)): PathParams<(String, String)>,
  JsonBody(body): JsonBody<UpdateFlag>,
) -> Result<Json<UpdateOutcome>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.update_flag(&actor, &project, &key, body).await?))
}

/// `DELETE /projects/{p}/flags/{key}`
pub async fn delete<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams((project, key)): PathParams<(String, String)>,
) -> Result<StatusCode, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  state.delete_flag(&actor, &project, &key).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// `POST /projects/{p}/flags/{key}/clone`, body: `{"newKey":"...", "targetProject":"..."}`
pub async fn clone<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams((project, key)): PathParams<(String, String)>,
  JsonBody(body): JsonBody<CloneFlag>,
) -> Result<impl IntoResponse, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  let flag = state.clone_flag(&actor, &project, &key, body).await?;
  Ok((StatusCode::CREATED, Json(flag)))
}

// ─── Bulk ─────────────────────────────────────────────────────────────────────

/// `POST /projects/{p}/flags/bulk/toggle`, body: `{"keys":[...], "disabled":true}`
pub async fn bulk_toggle<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(project): PathParams<String>,
  JsonBody(body): JsonBody<BulkToggle>,
) -> Result<Json<BulkOutcome>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.bulk_toggle(&actor, &project, body).await?))
}

/// `POST /projects/{p}/flags/bulk/delete`, body: `{"keys":[...]}`
pub async fn bulk_delete<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(project): PathParams<String>,
  JsonBody(body): JsonBody<BulkDelete>,
) -> Result<Json<BulkOutcome>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.bulk_delete(&actor, &project, body).await?))
}
