//! Audit reads and exports, plus the manual refresh.

use flaggate_core::{
  Result,
  actor::Actor,
  audit::{AuditEvent, AuditFilter},
  page::{Page, Paginated},
  rbac::{action, resource},
  store::{AuditStore, FlagStore, GovernanceStore},
};
use tracing::info;

use super::FlagService;

/// Most events a single export returns.
pub const EXPORT_LIMIT: usize = 10_000;

impl<F, G> FlagService<F, G>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  pub async fn list_audit(&self, actor: &Actor, filter: &AuditFilter) -> Result<Paginated<AuditEvent>> {
    self.require(actor, resource::AUDIT, action::READ).await?;
    self
      .timed("list audit events", self.store.list_audit_events(filter))
      .await
  }

  /// Every event matching `filter` (its paging is ignored), up to
  /// [`EXPORT_LIMIT`], read as one snapshot so events appended meanwhile
  /// cannot shift or duplicate rows.
  pub async fn export_audit(&self, actor: &Actor, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
    self.require(actor, resource::AUDIT, action::READ).await?;
    self
      .timed("export audit events", self.store.export_audit_events(filter, EXPORT_LIMIT))
      .await
  }

  /// History of one flag, newest first unless `page` sorts otherwise.
  pub async fn flag_audit(
    &self,
    actor: &Actor,
    project: &str,
    key: &str,
    page: Page,
  ) -> Result<Paginated<AuditEvent>> {
    self.require(actor, resource::AUDIT, action::READ).await?;
    let filter = AuditFilter {
      resource_type: Some(resource::FLAG.to_owned()),
      resource_name: Some(key.to_owned()),
      project: Some(project.to_owned()),
      page,
      ..AuditFilter::default()
    };
    self
      .timed("list audit events", self.store.list_audit_events(&filter))
      .await
  }

  /// Refresh the evaluation runtime now and report the outcome.
  pub async fn refresh_now(&self, actor: &Actor) -> Result<()> {
    self.require(actor, resource::ANY, action::ADMIN).await?;
    self.refresh.refresh_now().await?;
    info!("manual refresh succeeded");
    Ok(())
  }
}
