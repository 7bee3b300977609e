//! Storage traits implemented by backends (`flaggate-store-sqlite`,
//! `flaggate-store-file`).
//!
//! Higher layers (`flaggate-api`) depend on these abstractions, not on any
//! concrete backend. Every backend error converts into [`crate::Error`] so the
//! mutation pipeline can map domain failures (not found, version conflict,
//! invalid state) without knowing which backend produced them.
//!
//! All methods return `Send` futures so the traits can be used in
//! multi-threaded async runtimes (e.g. tokio with `axum`).

use std::future::Future;

use uuid::Uuid;

use crate::{
  actor::ActorRef,
  audit::{AuditEvent, AuditFilter, NewAuditEvent},
  change_request::{
    ChangeRequest, ChangeRequestFilter, ChangeRequestStatus, NewChangeRequest,
    NewReview, Review,
  },
  flag::{Flag, FlagChange, FlagUpdate, NewFlag},
  page::{Page, Paginated},
  rbac::{ApiKey, NewApiKey, NewRole, Role, RoleUpdate, StoredApiKey},
};

/// Shared error contract of every store trait.
pub trait Backend: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static + Into<crate::Error>;
}

// ─── Flags ───────────────────────────────────────────────────────────────────

/// Durable keyed storage for flag records with optimistic concurrency.
///
/// For one `(project, key)`, two concurrent updates presenting the same
/// `expected_version` never both succeed: exactly one observes
/// [`crate::Error::VersionConflict`].
pub trait FlagStore: Backend {
  /// Fetch a flag. Returns `None` if absent.
  fn get_flag<'a>(
    &'a self,
    project: &'a str,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<Flag>, Self::Error>> + Send + 'a;

  /// Create a flag at [`Version::INITIAL`](crate::flag::Version::INITIAL), or
  /// one past the highest version ever issued for this key if it existed
  /// before. Fails with `AlreadyExists` if present.
  fn create_flag(
    &self,
    input: NewFlag,
  ) -> impl Future<Output = Result<Flag, Self::Error>> + Send + '_;

  /// Replace payload and `disabled`, optionally renaming, and bump the
  /// version.
  ///
  /// Fails with `NotFound` if absent, `VersionConflict` if
  /// `update.expected_version` is given and stale, and `KeyConflict` if
  /// `update.new_key` names another existing flag. Nothing is written on
  /// failure.
  fn update_flag<'a>(
    &'a self,
    project: &'a str,
    key: &'a str,
    update: FlagUpdate,
  ) -> impl Future<Output = Result<FlagChange, Self::Error>> + Send + 'a;

  /// Remove a flag and return it. Fails with `NotFound` if absent.
  fn delete_flag<'a>(
    &'a self,
    project: &'a str,
    key: &'a str,
  ) -> impl Future<Output = Result<Flag, Self::Error>> + Send + 'a;

  /// List a project's flags ordered by key unless `page.sort` asks for
  /// `created_at` or `updated_at`. `page.search` filters on key substring.
  fn list_flags<'a>(
    &'a self,
    project: &'a str,
    page: &'a Page,
  ) -> impl Future<Output = Result<Paginated<Flag>, Self::Error>> + Send + 'a;

  /// Names of all projects that were created explicitly or hold at least
  /// one flag.
  fn list_projects(
    &self,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  /// Declare an empty project. Fails with `AlreadyExists` if the project is
  /// already listed.
  fn create_project<'a>(
    &'a self,
    project: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Remove a project and all of its flags in one step, returning the
  /// removed flags. Version high-water marks survive. Fails with `NotFound`
  /// if the project is not listed.
  fn delete_project<'a>(
    &'a self,
    project: &'a str,
  ) -> impl Future<Output = Result<Vec<Flag>, Self::Error>> + Send + 'a;
}

// ─── Change requests ─────────────────────────────────────────────────────────

/// Persistence for change requests. Status changes are compare-and-set: each
/// method names the status it expects and fails with `InvalidState` if the
/// stored status differs.
pub trait ChangeRequestStore: Backend {
  fn create_change_request(
    &self,
    input: NewChangeRequest,
  ) -> impl Future<Output = Result<ChangeRequest, Self::Error>> + Send + '_;

  fn get_change_request(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ChangeRequest>, Self::Error>> + Send + '_;

  /// Newest first.
  fn list_change_requests<'a>(
    &'a self,
    filter: &'a ChangeRequestFilter,
  ) -> impl Future<Output = Result<Paginated<ChangeRequest>, Self::Error>> + Send + 'a;

  fn count_pending(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Append a review and, in the same transaction, move the request from
  /// `Pending` to `next` (which may be `Pending` again for comments).
  fn record_review(
    &self,
    id: Uuid,
    review: NewReview,
    next: ChangeRequestStatus,
  ) -> impl Future<Output = Result<(ChangeRequest, Review), Self::Error>> + Send + '_;

  /// `Approved → Applied`.
  fn mark_applied(
    &self,
    id: Uuid,
    applied_by: ActorRef,
  ) -> impl Future<Output = Result<ChangeRequest, Self::Error>> + Send + '_;

  /// `Pending | Approved → Cancelled`.
  fn cancel_change_request(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<ChangeRequest, Self::Error>> + Send + '_;

  /// Review history, oldest first.
  fn list_reviews(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Vec<Review>, Self::Error>> + Send + '_;
}

// ─── Roles ───────────────────────────────────────────────────────────────────

/// Roles and user → role assignments.
pub trait RoleStore: Backend {
  fn list_roles(&self) -> impl Future<Output = Result<Vec<Role>, Self::Error>> + Send + '_;

  fn get_role(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Role>, Self::Error>> + Send + '_;

  /// Fails with `AlreadyExists` on a duplicate name.
  fn create_role(
    &self,
    input: NewRole,
  ) -> impl Future<Output = Result<Role, Self::Error>> + Send + '_;

  /// Fails with `BuiltinRole` for seeded roles and `AlreadyExists` if the new
  /// name is taken.
  fn update_role(
    &self,
    id: Uuid,
    update: RoleUpdate,
  ) -> impl Future<Output = Result<Role, Self::Error>> + Send + '_;

  /// Fails with `BuiltinRole` for seeded roles. Assignments are removed too.
  fn delete_role(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Role, Self::Error>> + Send + '_;

  /// Roles assigned to `user_id`.
  fn user_roles<'a>(
    &'a self,
    user_id: &'a str,
  ) -> impl Future<Output = Result<Vec<Role>, Self::Error>> + Send + 'a;

  /// Replace all of a user's assignments atomically. Fails with `NotFound`
  /// if any role id is unknown, leaving the old assignments in place.
  fn set_user_roles<'a>(
    &'a self,
    user_id: &'a str,
    role_ids: &'a [Uuid],
  ) -> impl Future<Output = Result<Vec<Role>, Self::Error>> + Send + 'a;

  /// Every user id with at least one assignment.
  fn assigned_users(
    &self,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;
}

// ─── API keys ────────────────────────────────────────────────────────────────

pub trait ApiKeyStore: Backend {
  fn create_api_key(
    &self,
    input: NewApiKey,
  ) -> impl Future<Output = Result<ApiKey, Self::Error>> + Send + '_;

  fn list_api_keys(&self) -> impl Future<Output = Result<Vec<ApiKey>, Self::Error>> + Send + '_;

  /// Candidates whose prefix equals `prefix`, for hash verification.
  fn find_api_keys_by_prefix<'a>(
    &'a self,
    prefix: &'a str,
  ) -> impl Future<Output = Result<Vec<StoredApiKey>, Self::Error>> + Send + 'a;

  fn touch_api_key(&self, id: Uuid) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn delete_api_key(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<ApiKey, Self::Error>> + Send + '_;
}

// ─── Audit ───────────────────────────────────────────────────────────────────

/// Append-only audit trail.
pub trait AuditStore: Backend {
  fn append_audit_event(
    &self,
    event: NewAuditEvent,
  ) -> impl Future<Output = Result<AuditEvent, Self::Error>> + Send + '_;

  fn list_audit_events<'a>(
    &'a self,
    filter: &'a AuditFilter,
  ) -> impl Future<Output = Result<Paginated<AuditEvent>, Self::Error>> + Send + 'a;

  /// Up to `limit` events matching `filter`, read in one consistent pass
  /// and ordered like [`list_audit_events`](Self::list_audit_events).
  /// `filter.page` contributes its search and sort only.
  fn export_audit_events<'a>(
    &'a self,
    filter: &'a AuditFilter,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<AuditEvent>, Self::Error>> + Send + 'a;
}

/// Everything the control plane needs besides flags.
pub trait GovernanceStore:
  ChangeRequestStore + RoleStore + ApiKeyStore + AuditStore
{
}

impl<T> GovernanceStore for T where
  T: ChangeRequestStore + RoleStore + ApiKeyStore + AuditStore
{
}
