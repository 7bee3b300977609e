//! Liveness and the manual refresh trigger.

use axum::Json;
use flaggate_core::store::{FlagStore, GovernanceStore};
use serde_json::{Value, json};

use super::AppState;
use crate::{actor::CurrentActor, error::ApiError};

/// `GET /health`. Needs no actor.
pub async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

/// `POST /admin/refresh`
///
/// Runs a refresh of the evaluation runtime now, with retries. `502` if the
/// runtime stays unreachable or none is configured.
pub async fn refresh<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
) -> Result<Json<Value>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  state.refresh_now(&actor).await?;
  Ok(Json(json!({ "status": "refreshed" })))
}
