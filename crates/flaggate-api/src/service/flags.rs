//! Flag operations: projects, reads, create, update (direct or gated),
//! delete, clone, bulk toggle/delete and the raw export.

use std::collections::BTreeMap;

use flaggate_core::{
  Error, Result,
  actor::Actor,
  audit::action as audit_action,
  change_request::{FlagSnapshot, NewChangeRequest, ProposedFlag},
  flag::{Flag, FlagUpdate, NewFlag, Payload, Version},
  page::{MAX_PAGE_SIZE, Page, Paginated},
  rbac::{action, resource},
  store::{ChangeRequestStore, FlagStore, GovernanceStore},
  validate,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use super::{FlagService, before_after};
use crate::audit_log::{self, Target};

// ─── Inputs and outcomes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlag {
  pub payload:  Payload,
  #[serde(default)]
  pub disabled: bool,
}

/// Body of `PUT /projects/{p}/flags/{key}`.
///
/// `version` is the value last read by the client; omitting it opts out of
/// the conflict check.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFlag {
  pub payload:     Payload,
  #[serde(default)]
  pub disabled:    bool,
  #[serde(default)]
  pub version:     Option<Version>,
  #[serde(default)]
  pub new_key:     Option<String>,
  #[serde(default)]
  pub change_note: Option<String>,
  /// Title for the change request when the update needs approval.
  #[serde(default)]
  pub title:       Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneFlag {
  pub new_key:        String,
  #[serde(default)]
  pub target_project: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkToggle {
  pub keys:     Vec<String>,
  pub disabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkDelete {
  pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
  pub requires_approval: bool,
  pub change_request_id: Uuid,
}

/// A project with all of its flags, ordered by key.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectDetail {
  pub project: String,
  pub flags:   Vec<Flag>,
}

/// Result of an update: applied now, or parked behind a change request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum UpdateOutcome {
  Applied(Flag),
  RequiresApproval(PendingApproval),
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkItem {
  pub key:    String,
  pub status: &'static str,
}

/// Partial result of a bulk operation. `total` counts successes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
  pub results: Vec<BulkItem>,
  pub errors:  Vec<String>,
  pub total:   usize,
}

impl BulkOutcome {
  fn ok(&mut self, key: String, status: &'static str) {
    self.results.push(BulkItem { key, status });
    self.total = self.results.len();
  }

  fn failed(&mut self, key: &str, e: &Error) {
    let message = if e.code() == "INTERNAL" {
      error!(key, error = %e, "bulk item failed");
      "internal error".to_owned()
    } else {
      e.to_string()
    };
    self.errors.push(format!("{key}: {message}"));
  }
}

// ─── Operations ──────────────────────────────────────────────────────────────

impl<F, G> FlagService<F, G>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  // ── Projects ──

  pub async fn list_projects(&self, actor: &Actor) -> Result<Vec<String>> {
    self.require(actor, resource::FLAG, action::READ).await?;
    self.timed("list projects", self.flags.list_projects()).await
  }

  pub async fn get_project(&self, actor: &Actor, project: &str) -> Result<ProjectDetail> {
    self.require(actor, resource::FLAG, action::READ).await?;
    let projects = self.timed("list projects", self.flags.list_projects()).await?;
    if !projects.iter().any(|p| p == project) {
      return Err(Error::not_found("project", project));
    }
    Ok(ProjectDetail {
      project: project.to_owned(),
      flags:   self.all_flags(project).await?,
    })
  }

  /// Declare an empty project. Fails with `AlreadyExists` if it is listed.
  pub async fn create_project(&self, actor: &Actor, project: &str) -> Result<()> {
    self.require(actor, resource::FLAG, action::CREATE).await?;
    validate::project(project)?;
    self.write("create project", self.flags.create_project(project)).await?;

    info!(project, "project created");
    self.audit.log(
      actor,
      audit_action::PROJECT_CREATED,
      Target::project(project),
      None,
      None,
    );
    self.refresh.signal(format!("created project {project}"));
    Ok(())
  }

  /// Remove a project and every flag in it. Like bulk operations this
  /// bypasses change requests, so it is refused to actors who need approval.
  pub async fn delete_project(&self, actor: &Actor, project: &str) -> Result<Vec<Flag>> {
    self.require(actor, resource::FLAG, action::DELETE).await?;
    if self.needs_approval(actor).await? {
      return Err(Error::forbidden(resource::ANY, action::ADMIN));
    }
    let removed = self.write("delete project", self.flags.delete_project(project)).await?;

    info!(project, flags = removed.len(), "project deleted");
    let keys: Vec<&str> = removed.iter().map(|f| f.key.as_str()).collect();
    self.audit.log(
      actor,
      audit_action::PROJECT_DELETED,
      Target::project(project),
      Some(json!({
        "before": audit_log::encode("before", &removed),
        "after":  null,
      })),
      Some(json!({ "flagCount": removed.len(), "keys": keys })),
    );
    self.refresh.signal(format!("deleted project {project}"));
    Ok(removed)
  }

  // ── Flags ──

  pub async fn list_flags(&self, actor: &Actor, project: &str, page: &Page) -> Result<Paginated<Flag>> {
    self.require(actor, resource::FLAG, action::READ).await?;
    self.timed("list flags", self.flags.list_flags(project, page)).await
  }

  pub async fn get_flag(&self, actor: &Actor, project: &str, key: &str) -> Result<Flag> {
    self.require(actor, resource::FLAG, action::READ).await?;
    self.get_existing(project, key).await
  }

  pub async fn create_flag(
    &self,
    actor: &Actor,
    project: &str,
    key: &str,
    input: CreateFlag,
  ) -> Result<Flag> {
    self.require(actor, resource::FLAG, action::CREATE).await?;
    validate::project(project)?;
    validate::flag_key(key)?;
    validate::payload(&input.payload)?;

    let flag = self
      .write(
        "create flag",
        self.flags.create_flag(NewFlag {
          project:  project.to_owned(),
          key:      key.to_owned(),
          payload:  input.payload,
          disabled: input.disabled,
        }),
      )
      .await?;

    info!(project, key, version = %flag.version, "flag created");
    self.audit.log(
      actor,
      audit_action::FLAG_CREATED,
      Target::flag(&flag),
      before_after(None, Some(&flag)),
      None,
    );
    self.refresh.signal(format!("created {project}/{key}"));
    Ok(flag)
  }

  /// Update a flag directly, or open a change request when the actor needs
  /// approval.
  pub async fn update_flag(
    &self,
    actor: &Actor,
    project: &str,
    key: &str,
    input: UpdateFlag,
  ) -> Result<UpdateOutcome> {
    self.require(actor, resource::FLAG, action::UPDATE).await?;
    validate::payload(&input.payload)?;
    if let Some(new_key) = &input.new_key {
      validate::flag_key(new_key)?;
    }

    let live = self.get_existing(project, key).await?;
    if let Some(expected) = input.version
      && expected != live.version
    {
      return Err(Error::VersionConflict {
        key: key.to_owned(),
        expected,
        actual: live.version,
      });
    }

    if self.needs_approval(actor).await? {
      let cr = self
        .write(
          "create change request",
          self.store.create_change_request(NewChangeRequest {
            title:       input.title.unwrap_or_else(|| format!("Update {key}")),
            description: input.change_note,
            author:      actor.to_ref(),
            project:     project.to_owned(),
            flag_key:    key.to_owned(),
            current:     Some(FlagSnapshot::from(&live)),
            proposed:    ProposedFlag {
              payload:  input.payload,
              disabled: input.disabled,
              new_key:  input.new_key,
            },
          }),
        )
        .await?;

      info!(project, key, change_request = %cr.id, "update parked for approval");
      self.audit.log(
        actor,
        audit_action::CHANGE_REQUEST_CREATED,
        Target::change_request(&cr),
        audit_log::encode("changes", &json!({ "proposed": cr.proposed })),
        Some(json!({ "flagKey": key, "baseVersion": live.version })),
      );
      return Ok(UpdateOutcome::RequiresApproval(PendingApproval {
        requires_approval: true,
        change_request_id: cr.id,
      }));
    }

    let change = self
      .write(
        "update flag",
        self.flags.update_flag(project, key, FlagUpdate {
          payload:          input.payload,
          disabled:         input.disabled,
          expected_version: input.version,
          new_key:          input.new_key.clone(),
        }),
      )
      .await?;

    info!(project, key, version = %change.after.version, "flag updated");
    self.audit.log(
      actor,
      audit_action::FLAG_UPDATED,
      Target::flag(&change.after),
      before_after(Some(&change.before), Some(&change.after)),
      Some(json!({ "changeNote": input.change_note, "newKey": input.new_key })),
    );
    self.refresh.signal(format!("updated {project}/{key}"));
    Ok(UpdateOutcome::Applied(change.after))
  }

  pub async fn delete_flag(&self, actor: &Actor, project: &str, key: &str) -> Result<Flag> {
    self.require(actor, resource::FLAG, action::DELETE).await?;
    let flag = self.write("delete flag", self.flags.delete_flag(project, key)).await?;

    info!(project, key, "flag deleted");
    self.audit.log(
      actor,
      audit_action::FLAG_DELETED,
      Target::flag(&flag),
      before_after(Some(&flag), None),
      None,
    );
    self.refresh.signal(format!("deleted {project}/{key}"));
    Ok(flag)
  }

  /// Copy a flag to a new key, in the same project unless
  /// `target_project` is given.
  pub async fn clone_flag(
    &self,
    actor: &Actor,
    project: &str,
    key: &str,
    input: CloneFlag,
  ) -> Result<Flag> {
    self.require(actor, resource::FLAG, action::CREATE).await?;
    let target_project = input.target_project.unwrap_or_else(|| project.to_owned());
    validate::project(&target_project)?;
    validate::flag_key(&input.new_key)?;

    let source = self.get_existing(project, key).await?;
    let flag = self
      .write(
        "clone flag",
        self.flags.create_flag(NewFlag {
          project:  target_project.clone(),
          key:      input.new_key.clone(),
          payload:  source.payload.clone(),
          disabled: source.disabled,
        }),
      )
      .await?;

    info!(project, key, target_project = %target_project, new_key = %input.new_key, "flag cloned");
    self.audit.log(
      actor,
      audit_action::FLAG_CLONED,
      Target::flag(&flag),
      before_after(None, Some(&flag)),
      Some(json!({
        "sourceProject": project,
        "sourceKey":     key,
        "targetProject": target_project,
        "targetKey":     input.new_key,
      })),
    );
    self.refresh.signal(format!("cloned {project}/{key}"));
    Ok(flag)
  }

  // ── Bulk ──

  /// Bulk operations bypass change requests, so actors who would need
  /// approval may not use them.
  async fn check_bulk(&self, actor: &Actor, act: &str, keys: &[String]) -> Result<()> {
    self.require(actor, resource::FLAG, act).await?;
    if keys.is_empty() {
      return Err(Error::validation("at least one key is required"));
    }
    if self.needs_approval(actor).await? {
      return Err(Error::forbidden(resource::ANY, action::ADMIN));
    }
    Ok(())
  }

  pub async fn bulk_toggle(&self, actor: &Actor, project: &str, input: BulkToggle) -> Result<BulkOutcome> {
    self.check_bulk(actor, action::UPDATE, &input.keys).await?;

    let mut outcome = BulkOutcome::default();
    for key in input.keys {
      match self.toggle_one(actor, project, &key, input.disabled).await {
        Ok(_) => outcome.ok(key, "updated"),
        Err(e) => outcome.failed(&key, &e),
      }
    }

    info!(project, updated = outcome.total, failed = outcome.errors.len(), "bulk toggle");
    if outcome.total > 0 {
      self.refresh.signal(format!("bulk toggle in {project}"));
    }
    Ok(outcome)
  }

  async fn toggle_one(&self, actor: &Actor, project: &str, key: &str, disabled: bool) -> Result<Flag> {
    let live = self.get_existing(project, key).await?;
    let change = self
      .write(
        "toggle flag",
        self.flags.update_flag(project, key, FlagUpdate::toggle(&live, disabled)),
      )
      .await?;
    self.audit.log(
      actor,
      audit_action::FLAG_TOGGLED,
      Target::flag(&change.after),
      before_after(Some(&change.before), Some(&change.after)),
      Some(json!({ "disabled": disabled })),
    );
    Ok(change.after)
  }

  pub async fn bulk_delete(&self, actor: &Actor, project: &str, input: BulkDelete) -> Result<BulkOutcome> {
    self.check_bulk(actor, action::DELETE, &input.keys).await?;

    let mut outcome = BulkOutcome::default();
    for key in input.keys {
      match self.write("delete flag", self.flags.delete_flag(project, &key)).await {
        Ok(flag) => {
          self.audit.log(
            actor,
            audit_action::FLAG_DELETED,
            Target::flag(&flag),
            before_after(Some(&flag), None),
            None,
          );
          outcome.ok(key, "deleted");
        }
        Err(e) => outcome.failed(&key, &e),
      }
    }

    info!(project, deleted = outcome.total, failed = outcome.errors.len(), "bulk delete");
    if outcome.total > 0 {
      self.refresh.signal(format!("bulk delete in {project}"));
    }
    Ok(outcome)
  }

  // ── Raw export ──

  /// `{key: payload}` for every enabled flag in `project`, as consumed by the
  /// evaluation runtime's retriever.
  pub async fn raw_flags(&self, actor: &Actor, project: &str) -> Result<BTreeMap<String, serde_json::Value>> {
    self.require(actor, resource::FLAG, action::READ).await?;

    let mut out = BTreeMap::new();
    for flag in self.all_flags(project).await?.into_iter().filter(|f| !f.disabled) {
      out.insert(flag.key, flag.payload.to_json()?);
    }
    Ok(out)
  }

  /// Every flag in `project`, ordered by key.
  async fn all_flags(&self, project: &str) -> Result<Vec<Flag>> {
    let mut out = Vec::new();
    let mut page = Page {
      page_size: MAX_PAGE_SIZE,
      ..Page::default()
    };
    loop {
      let batch = self.timed("list flags", self.flags.list_flags(project, &page)).await?;
      out.extend(batch.data);
      if page.page >= batch.total_pages {
        return Ok(out);
      }
      page.page += 1;
    }
  }
}
