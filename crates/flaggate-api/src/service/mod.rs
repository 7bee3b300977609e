//! The mutation orchestrator.
//!
//! [`FlagService`] is the only writer of flag state. Every operation checks
//! the actor's permission, validates input, runs reads under the configured
//! deadline, emits audit events and signals the evaluation runtime. Handlers are thin wrappers around it.

mod access;
mod audit;
mod change_requests;
mod flags;

use std::{
  future::Future,
  sync::Arc,
  time::{Duration, Instant},
};

use flaggate_core::{
  Error, Result,
  actor::Actor,
  flag::Flag,
  store::{FlagStore, GovernanceStore},
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::{
  audit_log::{self, AuditLogger},
  permissions::PermissionEvaluator,
  refresh::RefreshQueue,
};

pub use access::{CreateApiKey, IssuedApiKey, UserProfile, UserSummary};
pub use audit::EXPORT_LIMIT;
pub use change_requests::{ChangeRequestDetail, Proposal, ReviewInput};
pub use flags::{
  BulkDelete, BulkItem, BulkOutcome, BulkToggle, CloneFlag, CreateFlag, PendingApproval,
  ProjectDetail, UpdateFlag, UpdateOutcome,
};

/// Runtime knobs for [`FlagService`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
  pub auth_enabled:         bool,
  pub require_approvals:    bool,
  pub operation_timeout:    Duration,
  pub permission_cache_ttl: Duration,
  pub audit_queue_capacity: usize,
}

impl Default for ServiceSettings {
  fn default() -> Self {
    Self {
      auth_enabled:         true,
      require_approvals:    false,
      operation_timeout:    Duration::from_secs(10),
      permission_cache_ttl: Duration::from_secs(30),
      audit_queue_capacity: audit_log::DEFAULT_QUEUE_CAPACITY,
    }
  }
}

/// Orchestrates every governed operation over a flag store `F` and a
/// governance store `G`.
pub struct FlagService<F, G> {
  flags:       Arc<F>,
  store:       Arc<G>,
  permissions: PermissionEvaluator<G>,
  audit:       AuditLogger,
  refresh:     RefreshQueue,
  settings:    ServiceSettings,
  users:       Vec<UserProfile>,
}

impl<F, G> FlagService<F, G>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  /// Must be called inside a tokio runtime: the audit writer is spawned here.
  pub fn new(flags: Arc<F>, store: Arc<G>, settings: ServiceSettings) -> Self {
    let permissions = PermissionEvaluator::new(
      store.clone(),
      settings.auth_enabled,
      settings.permission_cache_ttl,
    );
    let audit = AuditLogger::spawn(store.clone(), settings.audit_queue_capacity);
    Self {
      flags,
      store,
      permissions,
      audit,
      refresh: RefreshQueue::disabled(),
      settings,
      users: Vec::new(),
    }
  }

  pub fn with_refresh(mut self, refresh: RefreshQueue) -> Self {
    self.refresh = refresh;
    self
  }

  pub fn with_audit(mut self, audit: AuditLogger) -> Self {
    self.audit = audit;
    self
  }

  /// Users known from configuration, listed even before any role is assigned.
  pub fn with_users(mut self, users: Vec<UserProfile>) -> Self {
    self.users = users;
    self
  }

  pub fn settings(&self) -> &ServiceSettings { &self.settings }

  pub fn permissions(&self) -> &PermissionEvaluator<G> { &self.permissions }

  pub fn audit_logger(&self) -> &AuditLogger { &self.audit }

  // ── Shared steps ──

  /// Run a read or permission check under the operation deadline.
  async fn timed<T, E, Fut>(&self, op: &'static str, fut: Fut) -> Result<T>
  where
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<Error>,
  {
    match tokio::time::timeout(self.settings.operation_timeout, fut).await {
      Ok(res) => res.map_err(Into::into),
      Err(_) => {
        warn!(op, "operation timed out");
        Err(Error::Timeout(op))
      }
    }
  }

  /// Await a store write to completion.
  ///
  /// Writes are not raced against the deadline: a backend keeps running a
  /// dispatched write after its future is dropped. Overruns are logged.
  async fn write<T, E, Fut>(&self, op: &'static str, fut: Fut) -> Result<T>
  where
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<Error>,
  {
    let started = Instant::now();
    let res = fut.await.map_err(Into::into);
    let elapsed = started.elapsed();
    if elapsed > self.settings.operation_timeout {
      warn!(op, elapsed_ms = elapsed.as_millis() as u64, "store write overran the operation deadline");
    }
    res
  }

  async fn require(&self, actor: &Actor, res: &str, act: &str) -> Result<()> {
    self
      .timed("permission check", self.permissions.require(actor, res, act))
      .await
  }

  async fn is_admin(&self, actor: &Actor) -> Result<bool> {
    self
      .timed("permission check", self.permissions.is_admin(actor))
      .await
  }

  /// Whether this actor's updates must go through a change request.
  async fn needs_approval(&self, actor: &Actor) -> Result<bool> {
    if !self.settings.require_approvals || actor.is_api_key() {
      return Ok(false);
    }
    Ok(!self.is_admin(actor).await?)
  }

  async fn get_existing(&self, project: &str, key: &str) -> Result<Flag> {
    self
      .timed("get flag", self.flags.get_flag(project, key))
      .await?
      .ok_or_else(|| Error::not_found("flag", key))
  }
}

/// `{before, after}` audit changes; either side may be absent.
fn before_after<T: Serialize>(before: Option<&T>, after: Option<&T>) -> Option<Value> {
  Some(json!({
    "before": before.and_then(|b| audit_log::encode("before", b)),
    "after":  after.and_then(|a| audit_log::encode("after", a)),
  }))
}

#[cfg(test)]
mod tests;
