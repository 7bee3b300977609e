//! Orchestrator tests over an in-memory SQLite store.

use std::{sync::Arc, time::Duration};

use flaggate_core::{
  Error,
  actor::Actor,
  audit::{AuditEvent, AuditFilter, NewAuditEvent, action as audit_action},
  change_request::{ChangeRequestStatus, ReviewDecision},
  flag::{Flag, FlagChange, FlagUpdate, NewFlag, Payload, Version},
  page::{Page, Paginated},
  rbac::{ApiKeyTier, NewRole, Permission},
  store::{AuditStore, Backend, FlagStore, RoleStore},
};
use flaggate_store_sqlite::SqliteStore;
use serde_json::json;

use super::*;
use crate::audit_log::AuditLogger;

type Service = FlagService<SqliteStore, SqliteStore>;

fn config(variation: &str) -> Payload {
  Payload::from_json(&json!({
    "variations": {"on": true, "off": false},
    "defaultRule": {"variation": variation}
  }))
  .unwrap()
}

fn user(id: &str) -> Actor {
  Actor::User {
    id:    id.into(),
    email: Some(format!("{id}@example.com")),
    name:  None,
  }
}

fn approvals() -> ServiceSettings {
  ServiceSettings {
    require_approvals: true,
    ..ServiceSettings::default()
  }
}

async fn assign(store: &SqliteStore, user_id: &str, role: &str) {
  let id = store
    .list_roles()
    .await
    .unwrap()
    .into_iter()
    .find(|r| r.name == role)
    .unwrap()
    .id;
  store.set_user_roles(user_id, &[id]).await.unwrap();
}

/// A service where `admin` holds the admin role and `ed`/`eve` are editors.
async fn service(settings: ServiceSettings) -> (Arc<SqliteStore>, Service) {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  assign(&store, "admin", "admin").await;
  assign(&store, "ed", "editor").await;
  assign(&store, "eve", "editor").await;
  let svc = FlagService::new(store.clone(), store.clone(), settings);
  (store, svc)
}

async fn seed(svc: &Service, key: &str) -> Flag {
  svc
    .create_flag(&user("admin"), "web", key, CreateFlag {
      payload:  config("off"),
      disabled: false,
    })
    .await
    .unwrap()
}

fn update(payload: Payload, version: Option<Version>) -> UpdateFlag {
  UpdateFlag {
    payload,
    disabled: false,
    version,
    new_key: None,
    change_note: Some("rollout".into()),
    title: None,
  }
}

async fn events(svc: &Service, store: &SqliteStore, action: &str) -> Vec<AuditEvent> {
  svc.audit_logger().flush().await;
  store
    .list_audit_events(&AuditFilter {
      action: Some(action.into()),
      ..AuditFilter::default()
    })
    .await
    .unwrap()
    .data
}

// ─── Direct mutations ────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_update_writes_and_audits_before_after() {
  let (store, svc) = service(ServiceSettings::default()).await;
  let flag = seed(&svc, "checkout-v2").await;

  let out = svc
    .update_flag(&user("ed"), "web", "checkout-v2", update(config("on"), Some(flag.version)))
    .await
    .unwrap();
  let UpdateOutcome::Applied(after) = out else {
    panic!("expected a direct update");
  };
  assert_eq!(after.version, Version(2));

  let audited = events(&svc, &store, audit_action::FLAG_UPDATED).await;
  assert_eq!(audited.len(), 1);
  let changes = audited[0].changes.as_ref().unwrap();
  assert_eq!(changes["before"]["payload"], flag.payload.to_json().unwrap());
  assert_eq!(changes["after"]["payload"], after.payload.to_json().unwrap());
  assert_eq!(audited[0].metadata.as_ref().unwrap()["changeNote"], "rollout");
}

#[tokio::test]
async fn stale_version_is_a_conflict() {
  let (_, svc) = service(ServiceSettings::default()).await;
  seed(&svc, "a").await;
  svc
    .update_flag(&user("ed"), "web", "a", update(config("on"), Some(Version(1))))
    .await
    .unwrap();

  let err = svc
    .update_flag(&user("ed"), "web", "a", update(config("off"), Some(Version(1))))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::VersionConflict { .. }));
}

#[tokio::test]
async fn concurrent_updates_exactly_one_wins() {
  let (_, svc) = service(ServiceSettings::default()).await;
  let svc = Arc::new(svc);
  seed(&svc, "race").await;

  let mut handles = Vec::new();
  for _ in 0..6 {
    let svc = svc.clone();
    handles.push(tokio::spawn(async move {
      svc
        .update_flag(&user("ed"), "web", "race", update(config("on"), Some(Version(1))))
        .await
    }));
  }
  let mut ok = 0;
  for h in handles {
    match h.await.unwrap() {
      Ok(_) => ok += 1,
      Err(e) => assert!(matches!(e, Error::VersionConflict { .. })),
    }
  }
  assert_eq!(ok, 1);
}

#[tokio::test]
async fn invalid_payload_is_rejected_before_the_store() {
  let (_, svc) = service(ServiceSettings::default()).await;
  let err = svc
    .create_flag(&user("admin"), "web", "bad", CreateFlag {
      payload:  Payload::from_json(&json!({"variations": {}})).unwrap(),
      disabled: false,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation { .. }));
  assert!(svc.list_projects(&user("admin")).await.unwrap().is_empty());
}

#[tokio::test]
async fn rename_onto_existing_key_conflicts() {
  let (_, svc) = service(ServiceSettings::default()).await;
  seed(&svc, "a").await;
  seed(&svc, "b").await;

  let mut u = update(config("on"), None);
  u.new_key = Some("b".into());
  let err = svc.update_flag(&user("ed"), "web", "a", u).await.unwrap_err();
  assert!(matches!(err, Error::KeyConflict { .. }));
  assert_eq!(svc.get_flag(&user("ed"), "web", "a").await.unwrap().version, Version(1));
  assert_eq!(svc.get_flag(&user("ed"), "web", "b").await.unwrap().version, Version(1));
}

#[tokio::test]
async fn viewers_cannot_write() {
  let (store, svc) = service(ServiceSettings::default()).await;
  assign(&store, "val", "viewer").await;
  seed(&svc, "a").await;

  let err = svc.delete_flag(&user("val"), "web", "a").await.unwrap_err();
  assert!(matches!(err, Error::Forbidden { ref action, .. } if action == "delete"));
  assert!(svc.get_flag(&user("val"), "web", "a").await.is_ok());
}

#[tokio::test]
async fn auth_disabled_lets_the_system_actor_do_anything() {
  let (_, svc) = service(ServiceSettings {
    auth_enabled: false,
    require_approvals: true,
    ..ServiceSettings::default()
  })
  .await;
  let flag = svc
    .create_flag(&Actor::System, "web", "open", CreateFlag {
      payload:  config("on"),
      disabled: false,
    })
    .await
    .unwrap();
  let out = svc
    .update_flag(&Actor::System, "web", "open", update(config("off"), Some(flag.version)))
    .await
    .unwrap();
  assert!(matches!(out, UpdateOutcome::Applied(_)));
}

#[tokio::test]
async fn clone_copies_into_another_project() {
  let (_, svc) = service(ServiceSettings::default()).await;
  let source = seed(&svc, "a").await;

  let clone = svc
    .clone_flag(&user("ed"), "web", "a", CloneFlag {
      new_key:        "a-copy".into(),
      target_project: Some("mobile".into()),
    })
    .await
    .unwrap();
  assert_eq!(clone.project, "mobile");
  assert_eq!(clone.payload, source.payload);

  let err = svc
    .clone_flag(&user("ed"), "web", "a", CloneFlag {
      new_key:        "a-copy".into(),
      target_project: Some("mobile".into()),
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AlreadyExists { .. }));
}

// ─── Bulk ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn bulk_toggle_continues_past_missing_keys() {
  let (_, svc) = service(ServiceSettings::default()).await;
  seed(&svc, "a").await;
  seed(&svc, "b").await;

  let out = svc
    .bulk_toggle(&user("ed"), "web", BulkToggle {
      keys:     vec!["a".into(), "b".into(), "missing".into()],
      disabled: true,
    })
    .await
    .unwrap();
  assert_eq!(out.total, 2);
  assert_eq!(out.errors.len(), 1);
  assert!(out.errors[0].contains("missing"));

  for key in ["a", "b"] {
    assert!(svc.get_flag(&user("ed"), "web", key).await.unwrap().disabled);
  }
}

#[tokio::test]
async fn bulk_delete_reports_partial_results() {
  let (_, svc) = service(ServiceSettings::default()).await;
  seed(&svc, "a").await;

  let out = svc
    .bulk_delete(&user("ed"), "web", BulkDelete {
      keys: vec!["a".into(), "ghost".into()],
    })
    .await
    .unwrap();
  assert_eq!(out.results[0].key, "a");
  assert_eq!(out.results[0].status, "deleted");
  assert!(out.errors[0].starts_with("ghost"));
}

#[tokio::test]
async fn bulk_is_refused_for_actors_needing_approval() {
  let (_, svc) = service(approvals()).await;
  seed(&svc, "a").await;
  let err = svc
    .bulk_toggle(&user("ed"), "web", BulkToggle {
      keys:     vec!["a".into()],
      disabled: true,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Forbidden { .. }));
}

// ─── Approvals ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn gated_update_then_approve_and_apply() {
  let (store, svc) = service(approvals()).await;
  let original = seed(&svc, "checkout-v2").await;

  let out = svc
    .update_flag(&user("ed"), "web", "checkout-v2", update(config("on"), Some(original.version)))
    .await
    .unwrap();
  let UpdateOutcome::RequiresApproval(pending) = out else {
    panic!("expected the update to need approval");
  };
  assert!(pending.requires_approval);
  let unchanged = svc.get_flag(&user("ed"), "web", "checkout-v2").await.unwrap();
  assert_eq!(unchanged.payload.as_bytes(), original.payload.as_bytes());
  assert_eq!(unchanged.version, original.version);

  let id = pending.change_request_id;
  let reviewed = svc
    .review(&user("admin"), id, ReviewInput {
      decision: ReviewDecision::Approve,
      comment:  Some("ship it".into()),
    })
    .await
    .unwrap();
  assert_eq!(reviewed.status, ChangeRequestStatus::Approved);

  let applied = svc.apply(&user("admin"), id).await.unwrap();
  assert_eq!(applied.status, ChangeRequestStatus::Applied);

  let live = svc.get_flag(&user("ed"), "web", "checkout-v2").await.unwrap();
  assert_eq!(live.payload, config("on"));
  assert!(live.version > original.version);

  let detail = svc.get_change_request(&user("ed"), id).await.unwrap();
  assert_eq!(detail.request.status, ChangeRequestStatus::Applied);
  assert_eq!(detail.reviews.len(), 1);

  let audited = events(&svc, &store, audit_action::CHANGE_REQUEST_APPLIED).await;
  assert_eq!(audited.len(), 1);
  assert_eq!(audited[0].metadata.as_ref().unwrap()["reviewComment"], "ship it");
}

#[tokio::test]
async fn api_keys_and_admins_bypass_approval() {
  let (_, svc) = service(approvals()).await;
  seed(&svc, "a").await;

  let out = svc
    .update_flag(&user("admin"), "web", "a", update(config("on"), None))
    .await
    .unwrap();
  assert!(matches!(out, UpdateOutcome::Applied(_)));

  let key = Actor::ApiKey {
    id:   uuid::Uuid::new_v4(),
    name: "ci".into(),
    tier: ApiKeyTier::Write,
  };
  let out = svc.update_flag(&key, "web", "a", update(config("off"), None)).await.unwrap();
  assert!(matches!(out, UpdateOutcome::Applied(_)));
}

async fn proposal(svc: &Service, author: &str, key: &str) -> uuid::Uuid {
  svc
    .propose(&user(author), Proposal {
      project:     "web".into(),
      flag_key:    key.into(),
      title:       None,
      description: None,
      payload:     config("on"),
      disabled:    false,
      new_key:     None,
    })
    .await
    .unwrap()
    .id
}

#[tokio::test]
async fn apply_requires_approved_state() {
  let (_, svc) = service(approvals()).await;
  seed(&svc, "a").await;

  let pending = proposal(&svc, "ed", "a").await;
  let err = svc.apply(&user("admin"), pending).await.unwrap_err();
  assert!(matches!(err, Error::InvalidState { status: ChangeRequestStatus::Pending, .. }));

  let rejected = proposal(&svc, "ed", "a").await;
  svc
    .review(&user("admin"), rejected, ReviewInput {
      decision: ReviewDecision::Reject,
      comment:  None,
    })
    .await
    .unwrap();
  let err = svc.apply(&user("admin"), rejected).await.unwrap_err();
  assert!(matches!(err, Error::InvalidState { status: ChangeRequestStatus::Rejected, .. }));

  let cancelled = proposal(&svc, "ed", "a").await;
  svc.cancel(&user("ed"), cancelled).await.unwrap();
  let err = svc.apply(&user("admin"), cancelled).await.unwrap_err();
  assert!(matches!(err, Error::InvalidState { status: ChangeRequestStatus::Cancelled, .. }));
}

#[tokio::test]
async fn drifted_request_is_not_applied() {
  let (_, svc) = service(approvals()).await;
  seed(&svc, "a").await;
  let id = proposal(&svc, "ed", "a").await;
  svc
    .review(&user("admin"), id, ReviewInput {
      decision: ReviewDecision::Approve,
      comment:  None,
    })
    .await
    .unwrap();

  // Someone edits the flag directly after approval.
  let moved = svc
    .update_flag(&user("admin"), "web", "a", update(config("off"), None))
    .await
    .unwrap();
  let UpdateOutcome::Applied(moved) = moved else { panic!() };

  let err = svc.apply(&user("admin"), id).await.unwrap_err();
  assert!(matches!(err, Error::Drifted { .. }));
  let live = svc.get_flag(&user("admin"), "web", "a").await.unwrap();
  assert_eq!(live.version, moved.version);
  assert_eq!(live.payload, config("off"));
  let detail = svc.get_change_request(&user("admin"), id).await.unwrap();
  assert_eq!(detail.request.status, ChangeRequestStatus::Approved);
}

#[tokio::test]
async fn create_proposal_applies_as_a_new_flag() {
  let (_, svc) = service(approvals()).await;
  let id = proposal(&svc, "ed", "brand-new").await;
  svc
    .review(&user("admin"), id, ReviewInput {
      decision: ReviewDecision::Approve,
      comment:  None,
    })
    .await
    .unwrap();
  svc.apply(&user("admin"), id).await.unwrap();
  assert_eq!(svc.get_flag(&user("ed"), "web", "brand-new").await.unwrap().version, Version(1));
}

#[tokio::test]
async fn reviewers_must_be_admins_and_not_authors() {
  let (_, svc) = service(approvals()).await;
  seed(&svc, "a").await;

  let by_editor = proposal(&svc, "ed", "a").await;
  let err = svc
    .review(&user("eve"), by_editor, ReviewInput {
      decision: ReviewDecision::Approve,
      comment:  None,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Forbidden { .. }));

  let by_admin = proposal(&svc, "admin", "a").await;
  let err = svc
    .review(&user("admin"), by_admin, ReviewInput {
      decision: ReviewDecision::Approve,
      comment:  None,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Forbidden { .. }));
}

#[tokio::test]
async fn comments_keep_the_request_pending() {
  let (_, svc) = service(approvals()).await;
  seed(&svc, "a").await;
  let id = proposal(&svc, "ed", "a").await;

  let cr = svc
    .review(&user("admin"), id, ReviewInput {
      decision: ReviewDecision::Comment,
      comment:  Some("why?".into()),
    })
    .await
    .unwrap();
  assert_eq!(cr.status, ChangeRequestStatus::Pending);
  assert_eq!(svc.count_pending(&user("ed")).await.unwrap(), 1);
}

#[tokio::test]
async fn only_author_or_admin_may_cancel() {
  let (_, svc) = service(approvals()).await;
  seed(&svc, "a").await;
  let id = proposal(&svc, "ed", "a").await;

  let err = svc.cancel(&user("eve"), id).await.unwrap_err();
  assert!(matches!(err, Error::Forbidden { .. }));
  let cr = svc.cancel(&user("admin"), id).await.unwrap();
  assert_eq!(cr.status, ChangeRequestStatus::Cancelled);
}

// ─── Access management ───────────────────────────────────────────────────────

#[tokio::test]
async fn role_changes_take_effect_immediately() {
  let (_, svc) = service(ServiceSettings::default()).await;
  let newbie = user("newbie");
  assert!(svc.list_roles(&newbie).await.is_err());

  let reader = svc
    .create_role(&user("admin"), NewRole {
      name:        "role-reader".into(),
      description: None,
      permissions: vec![Permission::new("role", "read")],
    })
    .await
    .unwrap();
  svc.set_user_roles(&user("admin"), "newbie", &[reader.id]).await.unwrap();
  assert!(svc.list_roles(&newbie).await.is_ok());

  svc.delete_role(&user("admin"), reader.id).await.unwrap();
  assert!(svc.list_roles(&newbie).await.is_err());
}

#[tokio::test]
async fn builtin_roles_are_protected() {
  let (_, svc) = service(ServiceSettings::default()).await;
  let admin = svc
    .list_roles(&user("admin"))
    .await
    .unwrap()
    .into_iter()
    .find(|r| r.name == "admin")
    .unwrap();
  let err = svc.delete_role(&user("admin"), admin.id).await.unwrap_err();
  assert!(matches!(err, Error::BuiltinRole(_)));
}

#[tokio::test]
async fn users_include_configured_profiles() {
  let (_, svc) = service(ServiceSettings::default()).await;
  let svc = svc.with_users(vec![UserProfile {
    id:       "carol".into(),
    username: Some("carol".into()),
    email:    None,
    name:     Some("Carol".into()),
  }]);

  let users = svc.list_users(&user("admin")).await.unwrap();
  let carol = users.iter().find(|u| u.id == "carol").unwrap();
  assert!(carol.roles.is_empty());
  assert_eq!(carol.name.as_deref(), Some("Carol"));
  assert!(users.iter().any(|u| u.id == "ed" && u.roles[0].name == "editor"));
}

#[tokio::test]
async fn issued_api_key_authenticates() {
  let (_, svc) = service(ServiceSettings::default()).await;
  let issued = svc
    .create_api_key(&user("admin"), CreateApiKey {
      name:       "deploy bot".into(),
      tier:       ApiKeyTier::Write,
      expires_at: None,
    })
    .await
    .unwrap();

  let actor = svc.authenticate_api_key(&issued.secret).await.unwrap().unwrap();
  assert!(matches!(actor, Actor::ApiKey { tier: ApiKeyTier::Write, .. }));
  assert!(svc.authenticate_api_key("fg_nope").await.unwrap().is_none());

  svc.delete_api_key(&user("admin"), issued.key.id).await.unwrap();
  assert!(svc.authenticate_api_key(&issued.secret).await.unwrap().is_none());
}

// ─── Projects and history ────────────────────────────────────────────────────

#[tokio::test]
async fn projects_are_created_read_and_deleted() {
  let (store, svc) = service(ServiceSettings::default()).await;
  let admin = user("admin");

  svc.create_project(&admin, "mobile").await.unwrap();
  let err = svc.create_project(&admin, "mobile").await.unwrap_err();
  assert!(matches!(err, Error::AlreadyExists { .. }));
  let err = svc.create_project(&admin, "../etc").await.unwrap_err();
  assert!(matches!(err, Error::Validation { .. }));
  assert!(svc.get_project(&admin, "mobile").await.unwrap().flags.is_empty());

  seed(&svc, "a").await;
  seed(&svc, "b").await;
  assert_eq!(svc.list_projects(&admin).await.unwrap(), ["mobile", "web"]);
  let web = svc.get_project(&user("ed"), "web").await.unwrap();
  assert_eq!(web.flags.iter().map(|f| f.key.as_str()).collect::<Vec<_>>(), ["a", "b"]);

  let removed = svc.delete_project(&user("ed"), "web").await.unwrap();
  assert_eq!(removed.len(), 2);
  let err = svc.get_project(&admin, "web").await.unwrap_err();
  assert!(matches!(err, Error::NotFound { .. }));
  let err = svc.delete_project(&admin, "web").await.unwrap_err();
  assert!(matches!(err, Error::NotFound { .. }));

  assert_eq!(events(&svc, &store, audit_action::PROJECT_CREATED).await.len(), 1);
  let deleted = events(&svc, &store, audit_action::PROJECT_DELETED).await;
  assert_eq!(deleted.len(), 1);
  assert_eq!(deleted[0].resource_type, "project");
  assert_eq!(deleted[0].metadata.as_ref().unwrap()["flagCount"], 2);
  assert_eq!(deleted[0].changes.as_ref().unwrap()["before"][0]["key"], "a");
}

#[tokio::test]
async fn project_writes_follow_permissions_and_approvals() {
  let (store, svc) = service(approvals()).await;
  assign(&store, "val", "viewer").await;
  seed(&svc, "a").await;

  let err = svc.create_project(&user("val"), "mobile").await.unwrap_err();
  assert!(matches!(err, Error::Forbidden { .. }));
  let err = svc.delete_project(&user("ed"), "web").await.unwrap_err();
  assert!(matches!(err, Error::Forbidden { .. }));
  assert_eq!(svc.get_flag(&user("ed"), "web", "a").await.unwrap().version, Version(1));

  svc.delete_project(&user("admin"), "web").await.unwrap();
  assert!(svc.list_projects(&user("admin")).await.unwrap().is_empty());
}

#[tokio::test]
async fn flag_history_covers_only_that_flag() {
  let (_, svc) = service(ServiceSettings::default()).await;
  let a = seed(&svc, "a").await;
  seed(&svc, "ab").await;
  svc
    .create_flag(&user("admin"), "api", "a", CreateFlag {
      payload:  config("off"),
      disabled: false,
    })
    .await
    .unwrap();
  svc
    .update_flag(&user("ed"), "web", "a", update(config("on"), Some(a.version)))
    .await
    .unwrap();
  svc.audit_logger().flush().await;

  let history = svc.flag_audit(&user("ed"), "web", "a", Page::default()).await.unwrap();
  assert_eq!(history.total, 2);
  assert_eq!(history.data[0].action, audit_action::FLAG_UPDATED, "newest first");
  assert_eq!(history.data[1].action, audit_action::FLAG_CREATED);
  assert!(history.data.iter().all(|e| e.project.as_deref() == Some("web")));
}

// ─── Resilience ──────────────────────────────────────────────────────────────

struct BrokenAudit;

impl Backend for BrokenAudit {
  type Error = Error;
}

impl AuditStore for BrokenAudit {
  async fn append_audit_event(&self, _: NewAuditEvent) -> flaggate_core::Result<AuditEvent> {
    Err(Error::backend(std::io::Error::other("audit table locked")))
  }

  async fn list_audit_events(&self, _: &AuditFilter) -> flaggate_core::Result<Paginated<AuditEvent>> {
    unimplemented!()
  }

  async fn export_audit_events(&self, _: &AuditFilter, _: usize) -> flaggate_core::Result<Vec<AuditEvent>> {
    unimplemented!()
  }
}

#[tokio::test]
async fn audit_failure_does_not_fail_the_mutation() {
  let (_, svc) = service(ServiceSettings::default()).await;
  let svc = svc.with_audit(AuditLogger::spawn(Arc::new(BrokenAudit), 4));

  let flag = seed(&svc, "a").await;
  let out = svc
    .update_flag(&user("ed"), "web", "a", update(config("on"), Some(flag.version)))
    .await
    .unwrap();
  assert!(matches!(out, UpdateOutcome::Applied(_)));
  svc.audit_logger().flush().await;
}

/// A flag store whose calls never complete.
struct Stalled;

impl Backend for Stalled {
  type Error = Error;
}

impl FlagStore for Stalled {
  async fn get_flag(&self, _: &str, _: &str) -> flaggate_core::Result<Option<Flag>> {
    std::future::pending().await
  }

  async fn create_flag(&self, _: NewFlag) -> flaggate_core::Result<Flag> {
    std::future::pending().await
  }

  async fn update_flag(&self, _: &str, _: &str, _: FlagUpdate) -> flaggate_core::Result<FlagChange> {
    std::future::pending().await
  }

  async fn delete_flag(&self, _: &str, _: &str) -> flaggate_core::Result<Flag> {
    std::future::pending().await
  }

  async fn list_flags(&self, _: &str, _: &Page) -> flaggate_core::Result<Paginated<Flag>> {
    std::future::pending().await
  }

  async fn list_projects(&self) -> flaggate_core::Result<Vec<String>> {
    std::future::pending().await
  }

  async fn create_project(&self, _: &str) -> flaggate_core::Result<()> {
    std::future::pending().await
  }

  async fn delete_project(&self, _: &str) -> flaggate_core::Result<Vec<Flag>> {
    std::future::pending().await
  }
}

#[tokio::test]
async fn slow_stores_time_out() {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let svc = FlagService::new(Arc::new(Stalled), store, ServiceSettings {
    auth_enabled: false,
    operation_timeout: Duration::from_millis(20),
    ..ServiceSettings::default()
  });
  let err = svc.get_flag(&Actor::System, "web", "a").await.unwrap_err();
  assert!(matches!(err, Error::Timeout(_)));
}

/// SQLite flags whose writes commit, then take `lag` to report back.
struct SlowWrites {
  inner: SqliteStore,
  lag:   Duration,
}

impl Backend for SlowWrites {
  type Error = Error;
}

impl FlagStore for SlowWrites {
  async fn get_flag(&self, project: &str, key: &str) -> flaggate_core::Result<Option<Flag>> {
    Ok(self.inner.get_flag(project, key).await?)
  }

  async fn create_flag(&self, input: NewFlag) -> flaggate_core::Result<Flag> {
    let flag = self.inner.create_flag(input).await?;
    tokio::time::sleep(self.lag).await;
    Ok(flag)
  }

  async fn update_flag(&self, project: &str, key: &str, update: FlagUpdate) -> flaggate_core::Result<FlagChange> {
    let change = self.inner.update_flag(project, key, update).await?;
    tokio::time::sleep(self.lag).await;
    Ok(change)
  }

  async fn delete_flag(&self, project: &str, key: &str) -> flaggate_core::Result<Flag> {
    let flag = self.inner.delete_flag(project, key).await?;
    tokio::time::sleep(self.lag).await;
    Ok(flag)
  }

  async fn list_flags(&self, project: &str, page: &Page) -> flaggate_core::Result<Paginated<Flag>> {
    Ok(self.inner.list_flags(project, page).await?)
  }

  async fn list_projects(&self) -> flaggate_core::Result<Vec<String>> {
    Ok(self.inner.list_projects().await?)
  }

  async fn create_project(&self, project: &str) -> flaggate_core::Result<()> {
    self.inner.create_project(project).await?;
    tokio::time::sleep(self.lag).await;
    Ok(())
  }

  async fn delete_project(&self, project: &str) -> flaggate_core::Result<Vec<Flag>> {
    let flags = self.inner.delete_project(project).await?;
    tokio::time::sleep(self.lag).await;
    Ok(flags)
  }
}

#[tokio::test]
async fn committed_writes_are_reported_and_audited_past_the_deadline() {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  assign(&store, "admin", "admin").await;
  assign(&store, "ed", "editor").await;
  let flags = Arc::new(SlowWrites {
    inner: (*store).clone(),
    lag:   Duration::from_millis(200),
  });
  let svc = FlagService::new(flags, store.clone(), ServiceSettings {
    operation_timeout: Duration::from_millis(50),
    ..ServiceSettings::default()
  });
  let admin = user("admin");

  let created = svc
    .create_flag(&admin, "web", "a", CreateFlag {
      payload:  config("off"),
      disabled: false,
    })
    .await
    .unwrap();
  let out = svc
    .update_flag(&admin, "web", "a", update(config("on"), Some(created.version)))
    .await
    .unwrap();
  assert!(matches!(out, UpdateOutcome::Applied(ref f) if f.version == Version(2)));

  let id = svc
    .propose(&user("ed"), Proposal {
      project:     "web".into(),
      flag_key:    "a".into(),
      title:       None,
      description: None,
      payload:     config("off"),
      disabled:    true,
      new_key:     None,
    })
    .await
    .unwrap()
    .id;
  svc
    .review(&admin, id, ReviewInput {
      decision: ReviewDecision::Approve,
      comment:  None,
    })
    .await
    .unwrap();
  let applied = svc.apply(&admin, id).await.unwrap();
  assert_eq!(applied.status, ChangeRequestStatus::Applied);
  assert_eq!(store.get_flag("web", "a").await.unwrap().unwrap().version, Version(3));

  svc.audit_logger().flush().await;
  for action in [
    audit_action::FLAG_CREATED,
    audit_action::FLAG_UPDATED,
    audit_action::CHANGE_REQUEST_APPLIED,
  ] {
    let logged = store
      .list_audit_events(&AuditFilter {
        action: Some(action.into()),
        ..AuditFilter::default()
      })
      .await
      .unwrap();
    assert_eq!(logged.total, 1, "{action}");
  }
}
