//! Extractor for the actor resolved by the server's auth layer.

use axum::{extract::FromRequestParts, http::request::Parts};
use flaggate_core::actor::Actor;

use crate::error::ApiError;

/// The [`Actor`] the request is attributed to.
///
/// The auth layer in front of the router stores it as a request extension.
/// Requests that reach a handler without one are answered `401`.
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

impl<S> FromRequestParts<S> for CurrentActor
where
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    parts
      .extensions
      .get::<Actor>()
      .cloned()
      .map(CurrentActor)
      .ok_or(ApiError::Unauthorized)
  }
}
