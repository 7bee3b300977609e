//! Role-based permission checks with a short-lived per-user cache.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
  time::{Duration, Instant},
};

use flaggate_core::{
  Error, Result,
  actor::Actor,
  rbac::{self, Permission, action, resource},
  store::RoleStore,
};

type Cached = (Instant, Arc<Vec<Permission>>);

/// Decides whether an actor may perform `(resource, action)`.
///
/// * auth disabled: everything is allowed.
/// * [`Actor::System`] with auth enabled: nothing is allowed.
/// * API keys: their coarse [`ApiKeyTier`](rbac::ApiKeyTier).
/// * users: the union of their roles' permissions, wildcards included.
pub struct PermissionEvaluator<G> {
  store:        Arc<G>,
  auth_enabled: bool,
  ttl:          Duration,
  cache:        Mutex<HashMap<String, Cached>>,
}

impl<G: RoleStore> PermissionEvaluator<G> {
  pub fn new(store: Arc<G>, auth_enabled: bool, ttl: Duration) -> Self {
    Self {
      store,
      auth_enabled,
      ttl,
      cache: Mutex::new(HashMap::new()),
    }
  }

  pub fn auth_enabled(&self) -> bool { self.auth_enabled }

  pub async fn has_permission(&self, actor: &Actor, res: &str, act: &str) -> Result<bool> {
    if !self.auth_enabled {
      return Ok(true);
    }
    match actor {
      Actor::System => Ok(false),
      Actor::ApiKey { tier, .. } => Ok(tier.allows(res, act)),
      Actor::User { id, .. } => {
        let perms = self.user_permissions(id).await?;
        Ok(rbac::permits(perms.iter(), res, act))
      }
    }
  }

  /// `Forbidden { resource, action }` unless the actor holds the permission.
  pub async fn require(&self, actor: &Actor, res: &str, act: &str) -> Result<()> {
    if self.has_permission(actor, res, act).await? {
      Ok(())
    } else {
      Err(Error::forbidden(res, act))
    }
  }

  /// Holder of `*:admin`.
  pub async fn is_admin(&self, actor: &Actor) -> Result<bool> {
    self.has_permission(actor, resource::ANY, action::ADMIN).await
  }

  /// Drop one user's cached permissions, or everyone's with `None`.
  pub fn invalidate(&self, user_id: Option<&str>) {
    let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
    match user_id {
      Some(id) => {
        cache.remove(id);
      }
      None => cache.clear(),
    }
  }

  async fn user_permissions(&self, user_id: &str) -> Result<Arc<Vec<Permission>>> {
    {
      let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
      if let Some((at, perms)) = cache.get(user_id)
        && at.elapsed() < self.ttl
      {
        return Ok(perms.clone());
      }
    }

    let roles = self.store.user_roles(user_id).await.map_err(Into::<Error>::into)?;
    let perms: Arc<Vec<Permission>> = Arc::new(
      roles
        .into_iter()
        .flat_map(|r| r.permissions)
        .collect(),
    );
    let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
    cache.retain(|_, (at, _)| at.elapsed() < self.ttl);
    cache.insert(user_id.to_owned(), (Instant::now(), perms.clone()));
    Ok(perms)
  }
}
