//! The change-request state machine.
//!
//! ```text
//! pending ──review(approve)──▶ approved ──apply──▶ applied
//!    │  └──review(reject)───▶ rejected
//!    └──cancel──▶ cancelled ◀──cancel── approved
//! ```
//!
//! `applied`, `rejected` and `cancelled` are terminal. Transitions are pure
//! functions here; stores apply them with a compare-and-set on the status so
//! two concurrent reviewers cannot both win.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  actor::ActorRef,
  flag::{Flag, Payload, Version},
  page::Page,
};

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeRequestStatus {
  Pending,
  Approved,
  Rejected,
  Applied,
  Cancelled,
}

impl ChangeRequestStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      ChangeRequestStatus::Pending => "pending",
      ChangeRequestStatus::Approved => "approved",
      ChangeRequestStatus::Rejected => "rejected",
      ChangeRequestStatus::Applied => "applied",
      ChangeRequestStatus::Cancelled => "cancelled",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "pending" => Some(ChangeRequestStatus::Pending),
      "approved" => Some(ChangeRequestStatus::Approved),
      "rejected" => Some(ChangeRequestStatus::Rejected),
      "applied" => Some(ChangeRequestStatus::Applied),
      "cancelled" => Some(ChangeRequestStatus::Cancelled),
      _ => None,
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      ChangeRequestStatus::Applied
        | ChangeRequestStatus::Rejected
        | ChangeRequestStatus::Cancelled
    )
  }

  /// The status reached by `transition` from `self`, or `None` if the
  /// transition is not legal from here.
  pub fn after(self, transition: Transition) -> Option<Self> {
    use ChangeRequestStatus::*;
    match (self, transition) {
      (Pending, Transition::Review(ReviewDecision::Approve)) => Some(Approved),
      (Pending, Transition::Review(ReviewDecision::Reject)) => Some(Rejected),
      (Pending, Transition::Review(ReviewDecision::Comment)) => Some(Pending),
      (Approved, Transition::Apply) => Some(Applied),
      (Pending | Approved, Transition::Cancel) => Some(Cancelled),
      _ => None,
    }
  }
}

impl fmt::Display for ChangeRequestStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
  Approve,
  Reject,
  /// Leaves the request pending; only adds to the review history.
  Comment,
}

impl ReviewDecision {
  pub fn as_str(self) -> &'static str {
    match self {
      ReviewDecision::Approve => "approve",
      ReviewDecision::Reject => "reject",
      ReviewDecision::Comment => "comment",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "approve" => Some(ReviewDecision::Approve),
      "reject" => Some(ReviewDecision::Reject),
      "comment" => Some(ReviewDecision::Comment),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  Review(ReviewDecision),
  Apply,
  Cancel,
}

impl Transition {
  pub fn name(self) -> &'static str {
    match self {
      Transition::Review(_) => "review",
      Transition::Apply => "apply",
      Transition::Cancel => "cancel",
    }
  }
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

/// Live flag state captured when a change is proposed. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagSnapshot {
  pub payload:  Payload,
  pub disabled: bool,
  pub version:  Version,
}

impl From<&Flag> for FlagSnapshot {
  fn from(flag: &Flag) -> Self {
    Self {
      payload:  flag.payload.clone(),
      disabled: flag.disabled,
      version:  flag.version,
    }
  }
}

impl FlagSnapshot {
  /// Whether `flag` is still exactly the state this snapshot recorded.
  pub fn matches(&self, flag: &Flag) -> bool {
    self.version == flag.version
      && self.disabled == flag.disabled
      && self.payload.digest() == flag.payload.digest()
  }
}

/// The configuration a change request wants to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedFlag {
  pub payload:  Payload,
  #[serde(default)]
  pub disabled: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub new_key:  Option<String>,
}

// ─── Change request ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
  pub id:              Uuid,
  pub title:           String,
  pub description:     Option<String>,
  pub status:          ChangeRequestStatus,
  pub author:          ActorRef,
  pub project:         String,
  pub flag_key:        String,
  pub resource_type:   String,
  /// `None` when the request proposes creating a flag.
  pub current:         Option<FlagSnapshot>,
  pub proposed:        ProposedFlag,
  pub reviewer:        Option<ActorRef>,
  pub review_decision: Option<ReviewDecision>,
  pub review_comment:  Option<String>,
  pub reviewed_at:     Option<DateTime<Utc>>,
  pub applied_by:      Option<ActorRef>,
  pub applied_at:      Option<DateTime<Utc>>,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

impl ChangeRequest {
  /// The status `transition` leads to, or `InvalidState`.
  pub fn next_status(&self, transition: Transition) -> Result<ChangeRequestStatus> {
    self
      .status
      .after(transition)
      .ok_or(Error::InvalidState {
        id:        self.id,
        status:    self.status,
        operation: transition.name(),
      })
  }

  /// Compare the captured snapshot with the live flag.
  ///
  /// Drift is any of: the flag vanished, a flag appeared where none existed,
  /// or the version, payload or disabled bit moved.
  pub fn check_drift(&self, live: Option<&Flag>) -> Result<()> {
    let unchanged = match (&self.current, live) {
      (Some(snapshot), Some(flag)) => snapshot.matches(flag),
      (None, None) => true,
      _ => false,
    };
    if unchanged {
      Ok(())
    } else {
      Err(Error::Drifted { id: self.id })
    }
  }

  /// Key the flag will have once applied.
  pub fn target_key(&self) -> &str {
    self.proposed.new_key.as_deref().unwrap_or(&self.flag_key)
  }
}

/// Input for [`ChangeRequestStore::create_change_request`](crate::store::ChangeRequestStore::create_change_request).
#[derive(Debug, Clone)]
pub struct NewChangeRequest {
  pub title:       String,
  pub description: Option<String>,
  pub author:      ActorRef,
  pub project:     String,
  pub flag_key:    String,
  pub current:     Option<FlagSnapshot>,
  pub proposed:    ProposedFlag,
}

/// One entry in a change request's review history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
  pub id:                Uuid,
  pub change_request_id: Uuid,
  pub reviewer:          ActorRef,
  pub decision:          ReviewDecision,
  pub comment:           Option<String>,
  pub created_at:        DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReview {
  pub reviewer: ActorRef,
  pub decision: ReviewDecision,
  pub comment:  Option<String>,
}

/// Parameters for [`ChangeRequestStore::list_change_requests`](crate::store::ChangeRequestStore::list_change_requests).
#[derive(Debug, Clone, Default)]
pub struct ChangeRequestFilter {
  pub status:  Option<ChangeRequestStatus>,
  pub project: Option<String>,
  pub page:    Page,
}
