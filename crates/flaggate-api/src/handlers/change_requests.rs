//! Handlers for `/change-requests` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/change-requests` | `?status&project&search&page&pageSize` |
//! | `GET`  | `/change-requests/count` | `{"count": n}` pending requests |
//! | `POST` | `/change-requests` | 201 |
//! | `GET`  | `/change-requests/{id}` | Request plus its reviews |
//! | `POST` | `/change-requests/{id}/review` | `{"decision":"approve\|reject\|comment"}` |
//! | `POST` | `/change-requests/{id}/apply` | Approved only |
//! | `POST` | `/change-requests/{id}/cancel` | Author or admin |

use axum::{Json, http::StatusCode, response::IntoResponse};
use flaggate_core::{
  change_request::{ChangeRequest, ChangeRequestFilter, ChangeRequestStatus},
  page::{DEFAULT_PAGE_SIZE, Page, Paginated},
  store::{FlagStore, GovernanceStore},
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{AppState, JsonBody, PathParams, QueryParams};
use crate::{
  actor::CurrentActor,
  error::ApiError,
  service::{ChangeRequestDetail, Proposal, ReviewInput},
};

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
  pub status:    Option<ChangeRequestStatus>,
  pub project:   Option<String>,
  pub search:    Option<String>,
  pub page:      Option<u32>,
  pub page_size: Option<u32>,
}

impl From<ListParams> for ChangeRequestFilter {
  fn from(p: ListParams) -> Self {
    ChangeRequestFilter {
      status:  p.status,
      project: p.project.filter(|s| !s.is_empty()),
      page:    Page {
        page: p.page.unwrap_or(1),
        page_size: p.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        search: p.search,
        ..Page::default()
      }
      .normalized(),
    }
  }
}

/// `GET /change-requests`
pub async fn list<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  QueryParams(params): QueryParams<ListParams>,
) -> Result<Json<Paginated<ChangeRequest>>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  let filter = ChangeRequestFilter::from(params);
  Ok(Json(state.list_change_requests(&actor, &filter).await?))
}

/// `GET /change-requests/count`
pub async fn count<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
) -> Result<Json<Value>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  let count = state.count_pending(&actor).await?;
  Ok(Json(json!({ "count": count })))
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

/// `POST /change-requests`
pub async fn create<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  JsonBody(body): JsonBody<Proposal>,
) -> Result<impl IntoResponse, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  let cr = state.propose(&actor, body).await?;
  Ok((StatusCode::CREATED, Json(cr)))
}

/// `GET /change-requests/{id}`
pub async fn get_one<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(id): PathParams<Uuid>,
) -> Result<Json<ChangeRequestDetail>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.get_change_request(&actor, id).await?))
}

/// `POST /change-requests/{id}/review`
pub async fn review<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(id): PathParams<Uuid>,
  JsonBody(body): JsonBody<ReviewInput>,
) -> Result<Json<ChangeRequest>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.review(&actor, id, body).await?))
}

/// `POST /change-requests/{id}/apply`
pub async fn apply<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(id): PathParams<Uuid>,
) -> Result<Json<ChangeRequest>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.apply(&actor, id).await?))
}

/// `POST /change-requests/{id}/cancel`
pub async fn cancel<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams(id): PathParams<Uuid>,
) -> Result<Json<ChangeRequest>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.cancel(&actor, id).await?))
}
