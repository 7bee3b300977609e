//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`)
//! so they sort lexically. Actor snapshots, snapshots and permission lists are
//! stored as compact JSON. UUIDs are stored as hyphenated lowercase strings.

use chrono::{DateTime, SecondsFormat, Utc};
use flaggate_core::{
  actor::{ActorKind, ActorRef},
  audit::AuditEvent,
  change_request::{ChangeRequest, ChangeRequestStatus, Review, ReviewDecision},
  flag::{Flag, Payload, Version},
  rbac::{ApiKey, ApiKeyTier, Role, StoredApiKey},
};
use rusqlite::Row;
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

pub fn encode_json<T: Serialize>(value: &T) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

fn decode_json<T: DeserializeOwned>(s: &str) -> Result<T> { Ok(serde_json::from_str(s)?) }

fn decode_opt_json<T: DeserializeOwned>(s: Option<String>) -> Result<Option<T>> {
  s.as_deref().map(decode_json).transpose()
}

pub fn encode_version(v: Version) -> i64 { v.0 as i64 }

pub fn decode_version(v: i64) -> Version { Version(v as u64) }

fn decode_status(s: &str) -> Result<ChangeRequestStatus> {
  ChangeRequestStatus::parse(s)
    .ok_or_else(|| Error::Decode(format!("unknown change request status: {s:?}")))
}

fn decode_decision(s: &str) -> Result<ReviewDecision> {
  ReviewDecision::parse(s)
    .ok_or_else(|| Error::Decode(format!("unknown review decision: {s:?}")))
}

// ─── Flags ───────────────────────────────────────────────────────────────────

pub const FLAG_COLUMNS: &str =
  "id, project, key, payload, disabled, version, created_at, updated_at";

/// Undecoded `flags` row, in [`FLAG_COLUMNS`] order.
pub struct RawFlag {
  pub id:         String,
  pub project:    String,
  pub key:        String,
  pub payload:    String,
  pub disabled:   bool,
  pub version:    i64,
  pub created_at: String,
  pub updated_at: String,
}

impl RawFlag {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      project:    row.get(1)?,
      key:        row.get(2)?,
      payload:    row.get(3)?,
      disabled:   row.get(4)?,
      version:    row.get(5)?,
      created_at: row.get(6)?,
      updated_at: row.get(7)?,
    })
  }

  pub fn into_flag(self) -> Result<Flag> {
    Ok(Flag {
      id:         decode_uuid(&self.id)?,
      project:    self.project,
      key:        self.key,
      payload:    Payload::from_stored(self.payload.into_bytes()),
      disabled:   self.disabled,
      version:    decode_version(self.version),
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Roles ───────────────────────────────────────────────────────────────────

pub const ROLE_COLUMNS: &str =
  "id, name, description, permissions, builtin, created_at, updated_at";

pub fn role_from_row(row: &Row<'_>) -> rusqlite::Result<RawRole> {
  Ok(RawRole {
    id:          row.get(0)?,
    name:        row.get(1)?,
    description: row.get(2)?,
    permissions: row.get(3)?,
    builtin:     row.get(4)?,
    created_at:  row.get(5)?,
    updated_at:  row.get(6)?,
  })
}

pub struct RawRole {
  pub id:          String,
  pub name:        String,
  pub description: Option<String>,
  pub permissions: String,
  pub builtin:     bool,
  pub created_at:  String,
  pub updated_at:  String,
}

impl RawRole {
  pub fn into_role(self) -> Result<Role> {
    Ok(Role {
      id:          decode_uuid(&self.id)?,
      name:        self.name,
      description: self.description,
      permissions: decode_json(&self.permissions)?,
      builtin:     self.builtin,
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

// ─── API keys ────────────────────────────────────────────────────────────────

pub const API_KEY_COLUMNS: &str =
  "id, name, prefix, secret_hash, tier, created_by, created_at, expires_at, last_used_at";

pub struct RawApiKey {
  pub id:           String,
  pub name:         String,
  pub prefix:       String,
  pub secret_hash:  String,
  pub tier:         String,
  pub created_by:   Option<String>,
  pub created_at:   String,
  pub expires_at:   Option<String>,
  pub last_used_at: Option<String>,
}

impl RawApiKey {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      name:         row.get(1)?,
      prefix:       row.get(2)?,
      secret_hash:  row.get(3)?,
      tier:         row.get(4)?,
      created_by:   row.get(5)?,
      created_at:   row.get(6)?,
      expires_at:   row.get(7)?,
      last_used_at: row.get(8)?,
    })
  }

  pub fn into_stored(self) -> Result<StoredApiKey> {
    let tier: ApiKeyTier = self.tier.parse()?;
    Ok(StoredApiKey {
      key:         ApiKey {
        id: decode_uuid(&self.id)?,
        name: self.name,
        prefix: self.prefix,
        tier,
        created_by: self.created_by,
        created_at: decode_dt(&self.created_at)?,
        expires_at: decode_opt_dt(self.expires_at)?,
        last_used_at: decode_opt_dt(self.last_used_at)?,
      },
      secret_hash: self.secret_hash,
    })
  }
}

// ─── Change requests ─────────────────────────────────────────────────────────

pub const CHANGE_REQUEST_COLUMNS: &str = "id, title, description, status, author, project, \
   flag_key, resource_type, current_config, proposed_config, reviewer, review_decision, \
   review_comment, reviewed_at, applied_by, applied_at, created_at, updated_at";

pub struct RawChangeRequest {
  pub id:              String,
  pub title:           String,
  pub description:     Option<String>,
  pub status:          String,
  pub author:          String,
  pub project:         String,
  pub flag_key:        String,
  pub resource_type:   String,
  pub current_config:  Option<String>,
  pub proposed_config: String,
  pub reviewer:        Option<String>,
  pub review_decision: Option<String>,
  pub review_comment:  Option<String>,
  pub reviewed_at:     Option<String>,
  pub applied_by:      Option<String>,
  pub applied_at:      Option<String>,
  pub created_at:      String,
  pub updated_at:      String,
}

impl RawChangeRequest {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(0)?,
      title:           row.get(1)?,
      description:     row.get(2)?,
      status:          row.get(3)?,
      author:          row.get(4)?,
      project:         row.get(5)?,
      flag_key:        row.get(6)?,
      resource_type:   row.get(7)?,
      current_config:  row.get(8)?,
      proposed_config: row.get(9)?,
      reviewer:        row.get(10)?,
      review_decision: row.get(11)?,
      review_comment:  row.get(12)?,
      reviewed_at:     row.get(13)?,
      applied_by:      row.get(14)?,
      applied_at:      row.get(15)?,
      created_at:      row.get(16)?,
      updated_at:      row.get(17)?,
    })
  }

  pub fn into_change_request(self) -> Result<ChangeRequest> {
    Ok(ChangeRequest {
      id:              decode_uuid(&self.id)?,
      title:           self.title,
      description:     self.description,
      status:          decode_status(&self.status)?,
      author:          decode_json(&self.author)?,
      project:         self.project,
      flag_key:        self.flag_key,
      resource_type:   self.resource_type,
      current:         decode_opt_json(self.current_config)?,
      proposed:        decode_json(&self.proposed_config)?,
      reviewer:        decode_opt_json(self.reviewer)?,
      review_decision: self.review_decision.as_deref().map(decode_decision).transpose()?,
      review_comment:  self.review_comment,
      reviewed_at:     decode_opt_dt(self.reviewed_at)?,
      applied_by:      decode_opt_json(self.applied_by)?,
      applied_at:      decode_opt_dt(self.applied_at)?,
      created_at:      decode_dt(&self.created_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

pub const REVIEW_COLUMNS: &str =
  "id, change_request_id, reviewer, decision, comment, created_at";

pub struct RawReview {
  pub id:                String,
  pub change_request_id: String,
  pub reviewer:          String,
  pub decision:          String,
  pub comment:           Option<String>,
  pub created_at:        String,
}

impl RawReview {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                row.get(0)?,
      change_request_id: row.get(1)?,
      reviewer:          row.get(2)?,
      decision:          row.get(3)?,
      comment:           row.get(4)?,
      created_at:        row.get(5)?,
    })
  }

  pub fn into_review(self) -> Result<Review> {
    Ok(Review {
      id:                decode_uuid(&self.id)?,
      change_request_id: decode_uuid(&self.change_request_id)?,
      reviewer:          decode_json(&self.reviewer)?,
      decision:          decode_decision(&self.decision)?,
      comment:           self.comment,
      created_at:        decode_dt(&self.created_at)?,
    })
  }
}

// ─── Audit events ────────────────────────────────────────────────────────────

pub const AUDIT_COLUMNS: &str = "id, timestamp, actor_kind, actor_id, actor_email, actor_name, \
   action, resource_type, resource_id, resource_name, project, changes, metadata";

pub struct RawAuditEvent {
  pub id:            String,
  pub timestamp:     String,
  pub actor_kind:    String,
  pub actor_id:      Option<String>,
  pub actor_email:   Option<String>,
  pub actor_name:    Option<String>,
  pub action:        String,
  pub resource_type: String,
  pub resource_id:   Option<String>,
  pub resource_name: Option<String>,
  pub project:       Option<String>,
  pub changes:       Option<String>,
  pub metadata:      Option<String>,
}

impl RawAuditEvent {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      timestamp:     row.get(1)?,
      actor_kind:    row.get(2)?,
      actor_id:      row.get(3)?,
      actor_email:   row.get(4)?,
      actor_name:    row.get(5)?,
      action:        row.get(6)?,
      resource_type: row.get(7)?,
      resource_id:   row.get(8)?,
      resource_name: row.get(9)?,
      project:       row.get(10)?,
      changes:       row.get(11)?,
      metadata:      row.get(12)?,
    })
  }

  pub fn into_event(self) -> Result<AuditEvent> {
    let kind = ActorKind::parse(&self.actor_kind)
      .ok_or_else(|| Error::Decode(format!("unknown actor kind: {:?}", self.actor_kind)))?;
    Ok(AuditEvent {
      id:            decode_uuid(&self.id)?,
      timestamp:     decode_dt(&self.timestamp)?,
      actor:         ActorRef {
        kind,
        id: self.actor_id,
        email: self.actor_email,
        name: self.actor_name,
      },
      action:        self.action,
      resource_type: self.resource_type,
      resource_id:   self.resource_id,
      resource_name: self.resource_name,
      project:       self.project,
      changes:       decode_opt_json(self.changes)?,
      metadata:      decode_opt_json(self.metadata)?,
    })
  }
}
