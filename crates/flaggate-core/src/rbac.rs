//! Roles, permissions and API-key tiers.
//!
//! A [`Permission`] is a `(resource, action)` pair where either side may be
//! the wildcard `"*"`. Users receive the union of their roles' permissions.
//! API keys carry a coarse [`ApiKeyTier`] instead of roles.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

pub const WILDCARD: &str = "*";

/// Resource names checked by the mutation pipeline.
pub mod resource {
  pub const FLAG: &str = "flag";
  pub const CHANGE_REQUEST: &str = "change_request";
  pub const ROLE: &str = "role";
  pub const USER: &str = "user";
  pub const API_KEY: &str = "apikey";
  pub const AUDIT: &str = "audit";
  pub const ANY: &str = super::WILDCARD;
}

/// Action names checked by the mutation pipeline.
pub mod action {
  pub const READ: &str = "read";
  pub const CREATE: &str = "create";
  pub const UPDATE: &str = "update";
  pub const DELETE: &str = "delete";
  pub const APPLY: &str = "apply";
  pub const ADMIN: &str = "admin";
}

// ─── Permission ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
  pub resource: String,
  pub action:   String,
}

impl Permission {
  pub fn new(resource: &str, action: &str) -> Self {
    Self {
      resource: resource.to_owned(),
      action:   action.to_owned(),
    }
  }

  /// Exact match, or a wildcard on either side.
  pub fn grants(&self, resource: &str, action: &str) -> bool {
    (self.resource == WILDCARD || self.resource == resource)
      && (self.action == WILDCARD || self.action == action)
  }
}

impl fmt::Display for Permission {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.resource, self.action)
  }
}

/// Whether any permission in `perms` grants `(resource, action)`.
pub fn permits<'a>(
  perms: impl IntoIterator<Item = &'a Permission>,
  resource: &str,
  action: &str,
) -> bool {
  perms.into_iter().any(|p| p.grants(resource, action))
}

// ─── Roles ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
  pub id:          Uuid,
  pub name:        String,
  pub description: Option<String>,
  pub permissions: Vec<Permission>,
  /// Seeded roles cannot be updated or deleted.
  pub builtin:     bool,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRole {
  pub name:        String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub permissions: Vec<Permission>,
}

/// Partial role update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleUpdate {
  pub name:        Option<String>,
  pub description: Option<String>,
  pub permissions: Option<Vec<Permission>>,
}

/// A user id together with its assigned roles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRoles {
  pub user_id: String,
  pub roles:   Vec<Role>,
}

/// Roles seeded by every backend on first start.
pub fn builtin_roles() -> Vec<NewRole> {
  let role = |name: &str, description: &str, perms: &[(&str, &str)]| NewRole {
    name:        name.to_owned(),
    description: Some(description.to_owned()),
    permissions: perms.iter().map(|(r, a)| Permission::new(r, a)).collect(),
  };
  vec![
    role("admin", "Full access", &[(WILDCARD, WILDCARD)]),
    role(
      "editor",
      "Edit flags and propose changes",
      &[
        (resource::FLAG, WILDCARD),
        (resource::CHANGE_REQUEST, action::CREATE),
        (resource::CHANGE_REQUEST, action::READ),
        (resource::AUDIT, action::READ),
      ],
    ),
    role("viewer", "Read-only access", &[(WILDCARD, action::READ)]),
  ]
}

// ─── API keys ────────────────────────────────────────────────────────────────

/// Coarse permission tier attached to an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyTier {
  Read,
  Write,
  Admin,
}

impl ApiKeyTier {
  pub fn as_str(self) -> &'static str {
    match self {
      ApiKeyTier::Read => "read",
      ApiKeyTier::Write => "write",
      ApiKeyTier::Admin => "admin",
    }
  }

  /// `admin` allows everything. `write` allows everything except the admin
  /// action and the account-management resources. `read` allows reads only.
  pub fn allows(self, res: &str, act: &str) -> bool {
    match self {
      ApiKeyTier::Admin => true,
      ApiKeyTier::Write => {
        act != action::ADMIN
          && !matches!(res, resource::ROLE | resource::USER | resource::API_KEY)
      }
      ApiKeyTier::Read => act == action::READ,
    }
  }
}

impl FromStr for ApiKeyTier {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "read" => Ok(ApiKeyTier::Read),
      "write" => Ok(ApiKeyTier::Write),
      "admin" => Ok(ApiKeyTier::Admin),
      other => Err(Error::validation(format!("unknown api key tier: {other:?}"))),
    }
  }
}

/// An issued API key, without its secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
  pub id:           Uuid,
  pub name:         String,
  /// Leading characters of the secret, used for lookup and display.
  pub prefix:       String,
  pub tier:         ApiKeyTier,
  pub created_by:   Option<String>,
  pub created_at:   DateTime<Utc>,
  pub expires_at:   Option<DateTime<Utc>>,
  pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.is_some_and(|at| at <= now)
  }
}

/// Input for [`ApiKeyStore::create_api_key`](crate::store::ApiKeyStore::create_api_key).
#[derive(Debug, Clone)]
pub struct NewApiKey {
  pub name:        String,
  pub prefix:      String,
  /// argon2 PHC string of the full secret.
  pub secret_hash: String,
  pub tier:        ApiKeyTier,
  pub created_by:  Option<String>,
  pub expires_at:  Option<DateTime<Utc>>,
}

/// A stored key together with its secret hash, for verification.
#[derive(Debug, Clone)]
pub struct StoredApiKey {
  pub key:         ApiKey,
  pub secret_hash: String,
}
