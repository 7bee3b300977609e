//! Request actors and their persisted snapshots.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rbac::ApiKeyTier;

/// The identity a request is attributed to.
///
/// Resolved once at the edge and passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
  User {
    id:    String,
    email: Option<String>,
    name:  Option<String>,
  },
  ApiKey {
    id:   Uuid,
    name: String,
    tier: ApiKeyTier,
  },
  /// The anonymous actor used when authentication is disabled.
  System,
}

impl Actor {
  pub fn is_api_key(&self) -> bool { matches!(self, Actor::ApiKey { .. }) }

  pub fn kind(&self) -> ActorKind {
    match self {
      Actor::User { .. } => ActorKind::User,
      Actor::ApiKey { .. } => ActorKind::ApiKey,
      Actor::System => ActorKind::System,
    }
  }

  /// Stable identifier, if the actor has one.
  pub fn id(&self) -> Option<String> {
    match self {
      Actor::User { id, .. } => Some(id.clone()),
      Actor::ApiKey { id, .. } => Some(id.to_string()),
      Actor::System => None,
    }
  }

  pub fn to_ref(&self) -> ActorRef {
    match self {
      Actor::User { id, email, name } => ActorRef {
        kind:  ActorKind::User,
        id:    Some(id.clone()),
        email: email.clone(),
        name:  name.clone(),
      },
      Actor::ApiKey { id, name, .. } => ActorRef {
        kind:  ActorKind::ApiKey,
        id:    Some(id.to_string()),
        email: None,
        name:  Some(name.clone()),
      },
      Actor::System => ActorRef::system(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
  User,
  ApiKey,
  System,
}

impl ActorKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ActorKind::User => "user",
      ActorKind::ApiKey => "apikey",
      ActorKind::System => "system",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "user" => Some(ActorKind::User),
      "apikey" => Some(ActorKind::ApiKey),
      "system" => Some(ActorKind::System),
      _ => None,
    }
  }
}

/// Snapshot of an [`Actor`] as stored on audit events and change requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorRef {
  pub kind:  ActorKind,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id:    Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name:  Option<String>,
}

impl ActorRef {
  pub fn system() -> Self {
    Self {
      kind:  ActorKind::System,
      id:    None,
      email: None,
      name:  Some("system".to_owned()),
    }
  }

  /// Display label: email, then name, then id.
  pub fn label(&self) -> &str {
    self
      .email
      .as_deref()
      .or(self.name.as_deref())
      .or(self.id.as_deref())
      .unwrap_or("unknown")
  }

  /// Whether this snapshot names the same identity as `actor`.
  pub fn is(&self, actor: &Actor) -> bool {
    self.kind == actor.kind() && self.id.is_some() && self.id == actor.id()
  }
}
