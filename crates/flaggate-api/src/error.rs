//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Every error body has the shape `{"error": <message>, "code": <CODE>}`.
//! `FORBIDDEN` adds `resource` and `action`; `VALIDATION_ERROR` adds
//! `details`. Internal failures are logged and answered with a generic
//! message.

use axum::{
  Json,
  extract::rejection::{JsonRejection, PathRejection, QueryRejection},
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use flaggate_core::Error;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  /// No actor could be resolved for the request.
  #[error("authentication required")]
  Unauthorized,

  #[error("{0}")]
  BadRequest(String),

  #[error(transparent)]
  Domain(#[from] Error),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Domain(e) => domain_status(e),
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      ApiError::Unauthorized => "UNAUTHORIZED",
      ApiError::BadRequest(_) => "VALIDATION_ERROR",
      ApiError::Domain(e) => e.code(),
    }
  }
}

// Extractor rejections keep the `{error, code}` body shape.

impl From<JsonRejection> for ApiError {
  fn from(e: JsonRejection) -> Self { ApiError::BadRequest(e.body_text()) }
}

impl From<QueryRejection> for ApiError {
  fn from(e: QueryRejection) -> Self { ApiError::BadRequest(e.body_text()) }
}

impl From<PathRejection> for ApiError {
  fn from(e: PathRejection) -> Self { ApiError::BadRequest(e.body_text()) }
}

fn domain_status(e: &Error) -> StatusCode {
  match e {
    Error::Validation { .. } => StatusCode::BAD_REQUEST,
    Error::Forbidden { .. } | Error::BuiltinRole(_) => StatusCode::FORBIDDEN,
    Error::NotFound { .. } => StatusCode::NOT_FOUND,
    Error::AlreadyExists { .. }
    | Error::VersionConflict { .. }
    | Error::KeyConflict { .. }
    | Error::InvalidState { .. }
    | Error::Drifted { .. } => StatusCode::CONFLICT,
    Error::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
    Error::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
    Error::Serialization(_) | Error::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let code = self.code();

    let body = match &self {
      ApiError::Domain(Error::Forbidden { resource, action }) => json!({
        "error":    self.to_string(),
        "code":     code,
        "resource": resource,
        "action":   action,
      }),
      ApiError::Domain(Error::Validation { message, details }) => json!({
        "error":   message,
        "code":    code,
        "details": details,
      }),
      ApiError::Domain(e @ (Error::Serialization(_) | Error::Backend(_))) => {
        error!(error = %e, "internal error");
        json!({ "error": "internal server error", "code": code })
      }
      _ => json!({ "error": self.to_string(), "code": code }),
    };

    let mut res = (status, Json(body)).into_response();
    if status == StatusCode::UNAUTHORIZED {
      res.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"flaggate\""),
      );
    }
    res
  }
}
