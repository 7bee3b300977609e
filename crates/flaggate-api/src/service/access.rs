//! Role management, user assignments and API keys.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use flaggate_core::{
  Error, Result,
  actor::Actor,
  audit::action as audit_action,
  rbac::{
    ApiKey, ApiKeyTier, NewApiKey, NewRole, Role, RoleUpdate, UserRoles, action, resource,
  },
  store::{ApiKeyStore, FlagStore, GovernanceStore, RoleStore},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::{FlagService, before_after};
use crate::{
  api_key,
  audit_log::{self, Target},
};

/// A user declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
  pub id:       String,
  #[serde(default)]
  pub username: Option<String>,
  #[serde(default)]
  pub email:    Option<String>,
  #[serde(default)]
  pub name:     Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
  pub id:       String,
  pub username: Option<String>,
  pub email:    Option<String>,
  pub name:     Option<String>,
  pub roles:    Vec<Role>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKey {
  pub name:       String,
  pub tier:       ApiKeyTier,
  #[serde(default)]
  pub expires_at: Option<DateTime<Utc>>,
}

/// A newly issued key. `secret` is never shown again.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedApiKey {
  #[serde(flatten)]
  pub key:    ApiKey,
  pub secret: String,
}

fn role_names(roles: &[Role]) -> Vec<&str> { roles.iter().map(|r| r.name.as_str()).collect() }

impl<F, G> FlagService<F, G>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  // ── Roles ──

  pub async fn list_roles(&self, actor: &Actor) -> Result<Vec<Role>> {
    self.require(actor, resource::ROLE, action::READ).await?;
    self.timed("list roles", self.store.list_roles()).await
  }

  pub async fn get_role(&self, actor: &Actor, id: Uuid) -> Result<Role> {
    self.require(actor, resource::ROLE, action::READ).await?;
    self.find_role(id).await
  }

  async fn find_role(&self, id: Uuid) -> Result<Role> {
    self
      .timed("get role", self.store.get_role(id))
      .await?
      .ok_or_else(|| Error::not_found("role", id))
  }

  pub async fn create_role(&self, actor: &Actor, mut input: NewRole) -> Result<Role> {
    self.require(actor, resource::ROLE, action::CREATE).await?;
    input.name = input.name.trim().to_owned();
    if input.name.is_empty() {
      return Err(Error::validation("role name is required"));
    }

    let role = self.write("create role", self.store.create_role(input)).await?;
    info!(role = %role.name, "role created");
    self.audit.log(
      actor,
      audit_action::ROLE_CREATED,
      Target::role(&role),
      before_after(None, Some(&role)),
      None,
    );
    Ok(role)
  }

  pub async fn update_role(&self, actor: &Actor, id: Uuid, mut update: RoleUpdate) -> Result<Role> {
    self.require(actor, resource::ROLE, action::UPDATE).await?;
    if let Some(name) = &mut update.name {
      *name = name.trim().to_owned();
      if name.is_empty() {
        return Err(Error::validation("role name is required"));
      }
    }

    let before = self.find_role(id).await?;
    let role = self.write("update role", self.store.update_role(id, update)).await?;
    self.permissions.invalidate(None);

    info!(role = %role.name, "role updated");
    self.audit.log(
      actor,
      audit_action::ROLE_UPDATED,
      Target::role(&role),
      before_after(Some(&before), Some(&role)),
      None,
    );
    Ok(role)
  }

  pub async fn delete_role(&self, actor: &Actor, id: Uuid) -> Result<Role> {
    self.require(actor, resource::ROLE, action::DELETE).await?;
    let role = self.write("delete role", self.store.delete_role(id)).await?;
    self.permissions.invalidate(None);

    info!(role = %role.name, "role deleted");
    self.audit.log(
      actor,
      audit_action::ROLE_DELETED,
      Target::role(&role),
      before_after(Some(&role), None),
      None,
    );
    Ok(role)
  }

  // ── Users ──

  /// Configured users plus anyone holding an assignment.
  pub async fn list_users(&self, actor: &Actor) -> Result<Vec<UserSummary>> {
    self.require(actor, resource::USER, action::READ).await?;

    let assigned = self.timed("list users", self.store.assigned_users()).await?;
    let ids: BTreeSet<String> = self
      .users
      .iter()
      .map(|u| u.id.clone())
      .chain(assigned)
      .collect();

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
      let roles = self.timed("user roles", self.store.user_roles(&id)).await?;
      let profile = self.users.iter().find(|u| u.id == id);
      out.push(UserSummary {
        username: profile.and_then(|p| p.username.clone()),
        email: profile.and_then(|p| p.email.clone()),
        name: profile.and_then(|p| p.name.clone()),
        id,
        roles,
      });
    }
    Ok(out)
  }

  /// Replace a user's role assignments.
  pub async fn set_user_roles(&self, actor: &Actor, user_id: &str, role_ids: &[Uuid]) -> Result<UserRoles> {
    self.require(actor, resource::USER, action::UPDATE).await?;
    if user_id.trim().is_empty() {
      return Err(Error::validation("user id is required"));
    }

    let before = self.timed("user roles", self.store.user_roles(user_id)).await?;
    let roles = self
      .write("set user roles", self.store.set_user_roles(user_id, role_ids))
      .await?;
    self.permissions.invalidate(Some(user_id));

    info!(user = user_id, roles = ?role_names(&roles), "user roles updated");
    self.audit.log(
      actor,
      audit_action::USER_ROLES_UPDATED,
      Target::user(user_id),
      Some(json!({ "before": role_names(&before), "after": role_names(&roles) })),
      None,
    );
    Ok(UserRoles {
      user_id: user_id.to_owned(),
      roles,
    })
  }

  // ── API keys ──

  pub async fn create_api_key(&self, actor: &Actor, input: CreateApiKey) -> Result<IssuedApiKey> {
    self.require(actor, resource::API_KEY, action::CREATE).await?;
    let name = input.name.trim().to_owned();
    if name.is_empty() {
      return Err(Error::validation("api key name is required"));
    }
    if input.expires_at.is_some_and(|at| at <= Utc::now()) {
      return Err(Error::validation("expiry must be in the future"));
    }

    let generated = api_key::generate();
    let secret_hash = api_key::hash(&generated.secret)?;
    let key = self
      .write(
        "create api key",
        self.store.create_api_key(NewApiKey {
          name,
          prefix: generated.prefix,
          secret_hash,
          tier: input.tier,
          created_by: actor.id(),
          expires_at: input.expires_at,
        }),
      )
      .await?;

    info!(api_key = %key.id, tier = key.tier.as_str(), "api key issued");
    self.audit.log(
      actor,
      audit_action::API_KEY_CREATED,
      Target::api_key(&key),
      None,
      Some(json!({ "tier": key.tier, "prefix": key.prefix })),
    );
    Ok(IssuedApiKey {
      key,
      secret: generated.secret,
    })
  }

  pub async fn list_api_keys(&self, actor: &Actor) -> Result<Vec<ApiKey>> {
    self.require(actor, resource::API_KEY, action::READ).await?;
    self.timed("list api keys", self.store.list_api_keys()).await
  }

  pub async fn delete_api_key(&self, actor: &Actor, id: Uuid) -> Result<ApiKey> {
    self.require(actor, resource::API_KEY, action::DELETE).await?;
    let key = self.write("delete api key", self.store.delete_api_key(id)).await?;

    info!(api_key = %id, "api key revoked");
    self.audit.log(
      actor,
      audit_action::API_KEY_DELETED,
      Target::api_key(&key),
      audit_log::encode("changes", &json!({ "before": key })),
      None,
    );
    Ok(key)
  }

  /// Resolve a presented secret to its actor. Unknown, malformed and expired
  /// keys all yield `None`.
  pub async fn authenticate_api_key(&self, secret: &str) -> Result<Option<Actor>> {
    let Some(prefix) = api_key::prefix_of(secret) else {
      return Ok(None);
    };
    let candidates = self
      .timed("find api keys", self.store.find_api_keys_by_prefix(prefix))
      .await?;

    let Some(found) = candidates
      .into_iter()
      .find(|c| api_key::verify(secret, &c.secret_hash))
    else {
      return Ok(None);
    };
    if found.key.is_expired(Utc::now()) {
      return Ok(None);
    }
    if let Err(e) = self.timed("touch api key", self.store.touch_api_key(found.key.id)).await {
      warn!(api_key = %found.key.id, error = %e, "failed to record api key use");
    }
    Ok(Some(Actor::ApiKey {
      id:   found.key.id,
      name: found.key.name,
      tier: found.key.tier,
    }))
  }
}
