//! Error types for `flaggate-core`.
//!
//! Every variant maps to a stable machine-readable code (see [`Error::code`]).
//! Storage backends carry their domain failures as one of these variants and
//! fold everything else into [`Error::Backend`].

use thiserror::Error;
use uuid::Uuid;

use crate::{change_request::ChangeRequestStatus, flag::Version};

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed input, rejected before any store is touched.
  #[error("{message}")]
  Validation {
    message: String,
    details: Vec<String>,
  },

  #[error("permission denied: {action} on {resource}")]
  Forbidden { resource: String, action: String },

  #[error("built-in role {0} cannot be modified or deleted")]
  BuiltinRole(Uuid),

  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("{entity} already exists: {id}")]
  AlreadyExists { entity: &'static str, id: String },

  #[error("version conflict on {key}: expected {expected}, found {actual}")]
  VersionConflict {
    key:      String,
    expected: Version,
    actual:   Version,
  },

  #[error("flag key already in use: {key}")]
  KeyConflict { key: String },

  #[error("change request {id} is {status}; cannot {operation}")]
  InvalidState {
    id:        Uuid,
    status:    ChangeRequestStatus,
    operation: &'static str,
  },

  #[error("flag changed since change request {id} was proposed")]
  Drifted { id: Uuid },

  #[error("upstream unavailable: {0}")]
  UpstreamUnavailable(String),

  #[error("operation timed out: {0}")]
  Timeout(&'static str),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("backend error: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn validation(message: impl Into<String>) -> Self {
    Error::Validation {
      message: message.into(),
      details: Vec::new(),
    }
  }

  pub fn forbidden(resource: &str, action: &str) -> Self {
    Error::Forbidden {
      resource: resource.to_owned(),
      action:   action.to_owned(),
    }
  }

  pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
    Error::NotFound {
      entity,
      id: id.to_string(),
    }
  }

  pub fn already_exists(entity: &'static str, id: impl ToString) -> Self {
    Error::AlreadyExists {
      entity,
      id: id.to_string(),
    }
  }

  pub fn backend(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Error::Backend(Box::new(e))
  }

  /// Stable machine-readable code surfaced in error bodies.
  pub fn code(&self) -> &'static str {
    match self {
      Error::Validation { .. } => "VALIDATION_ERROR",
      Error::Forbidden { .. } => "FORBIDDEN",
      Error::BuiltinRole(_) => "BUILTIN_ROLE",
      Error::NotFound { .. } => "NOT_FOUND",
      Error::AlreadyExists { .. } => "CONFLICT",
      Error::VersionConflict { .. } => "VERSION_CONFLICT",
      Error::KeyConflict { .. } => "KEY_CONFLICT",
      Error::InvalidState { .. } => "INVALID_STATE",
      Error::Drifted { .. } => "DRIFTED",
      Error::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
      Error::Timeout(_) => "TIMEOUT",
      Error::Serialization(_) | Error::Backend(_) => "INTERNAL",
    }
  }

  /// `true` for the conflict family (duplicate, stale version, taken key).
  pub fn is_conflict(&self) -> bool {
    matches!(
      self,
      Error::AlreadyExists { .. }
        | Error::VersionConflict { .. }
        | Error::KeyConflict { .. }
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
