//! Append-only audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{actor::ActorRef, page::Page};

/// Action verbs recorded by the mutation pipeline.
pub mod action {
  pub const FLAG_CREATED: &str = "flag.created";
  pub const FLAG_UPDATED: &str = "flag.updated";
  pub const FLAG_DELETED: &str = "flag.deleted";
  pub const FLAG_CLONED: &str = "flag.cloned";
  pub const FLAG_TOGGLED: &str = "flag.toggled";
  pub const CHANGE_REQUEST_CREATED: &str = "change_request.created";
  pub const CHANGE_REQUEST_REVIEWED: &str = "change_request.reviewed";
  pub const CHANGE_REQUEST_APPLIED: &str = "change_request.applied";
  pub const CHANGE_REQUEST_CANCELLED: &str = "change_request.cancelled";
  pub const ROLE_CREATED: &str = "role.created";
  pub const ROLE_UPDATED: &str = "role.updated";
  pub const ROLE_DELETED: &str = "role.deleted";
  pub const USER_ROLES_UPDATED: &str = "user.roles_updated";
  pub const API_KEY_CREATED: &str = "apikey.created";
  pub const API_KEY_DELETED: &str = "apikey.deleted";
  pub const PROJECT_CREATED: &str = "project.created";
  pub const PROJECT_DELETED: &str = "project.deleted";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
  pub id:            Uuid,
  pub timestamp:     DateTime<Utc>,
  pub actor:         ActorRef,
  pub action:        String,
  pub resource_type: String,
  pub resource_id:   Option<String>,
  pub resource_name: Option<String>,
  pub project:       Option<String>,
  /// Structured before/after, possibly partial.
  pub changes:       Option<serde_json::Value>,
  pub metadata:      Option<serde_json::Value>,
}

/// An event as handed to the audit store. The timestamp is taken when the
/// mutation is logged, not when the row is written.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
  pub timestamp:     DateTime<Utc>,
  pub actor:         ActorRef,
  pub action:        String,
  pub resource_type: String,
  pub resource_id:   Option<String>,
  pub resource_name: Option<String>,
  pub project:       Option<String>,
  pub changes:       Option<serde_json::Value>,
  pub metadata:      Option<serde_json::Value>,
}

/// Parameters for [`AuditStore::list_audit_events`](crate::store::AuditStore::list_audit_events).
///
/// `actor` matches either the actor id or email. `resource_name` is an exact
/// match. `page.search` matches the resource id, resource name and action.
/// Sortable columns are `timestamp`, `action` and `resource_type`; the
/// default is newest first.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
  pub actor:         Option<String>,
  pub action:        Option<String>,
  pub resource_type: Option<String>,
  pub resource_name: Option<String>,
  pub project:       Option<String>,
  pub from:          Option<DateTime<Utc>>,
  pub to:            Option<DateTime<Utc>>,
  pub page:          Page,
}
