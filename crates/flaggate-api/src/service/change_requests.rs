//! Change-request operations: propose, review, apply, cancel and reads.

use flaggate_core::{
  Error, Result,
  actor::Actor,
  audit::action as audit_action,
  change_request::{
    ChangeRequest, ChangeRequestFilter, FlagSnapshot, NewChangeRequest, NewReview,
    ProposedFlag, Review, ReviewDecision, Transition,
  },
  flag::{FlagUpdate, NewFlag, Payload},
  page::Paginated,
  rbac::{action, resource},
  store::{ChangeRequestStore, FlagStore, GovernanceStore},
  validate,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::{FlagService, before_after};
use crate::audit_log::{self, Target};

/// Body of `POST /change-requests`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
  pub project:     String,
  pub flag_key:    String,
  #[serde(default)]
  pub title:       Option<String>,
  #[serde(default)]
  pub description: Option<String>,
  pub payload:     Payload,
  #[serde(default)]
  pub disabled:    bool,
  #[serde(default)]
  pub new_key:     Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewInput {
  pub decision: ReviewDecision,
  #[serde(default)]
  pub comment:  Option<String>,
}

/// A change request together with its review history.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRequestDetail {
  #[serde(flatten)]
  pub request: ChangeRequest,
  pub reviews: Vec<Review>,
}

impl<F, G> FlagService<F, G>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  async fn require_change_request(&self, id: Uuid) -> Result<ChangeRequest> {
    self
      .timed("get change request", self.store.get_change_request(id))
      .await?
      .ok_or_else(|| Error::not_found("change request", id))
  }

  /// Open a change request against the live flag, or against nothing when
  /// the flag does not exist yet.
  pub async fn propose(&self, actor: &Actor, input: Proposal) -> Result<ChangeRequest> {
    self.require(actor, resource::CHANGE_REQUEST, action::CREATE).await?;
    validate::project(&input.project)?;
    validate::flag_key(&input.flag_key)?;
    validate::payload(&input.payload)?;
    if let Some(new_key) = &input.new_key {
      validate::flag_key(new_key)?;
    }

    let live = self
      .timed("get flag", self.flags.get_flag(&input.project, &input.flag_key))
      .await?;
    let title = input
      .title
      .filter(|t| !t.trim().is_empty())
      .unwrap_or_else(|| {
        let verb = if live.is_some() { "Update" } else { "Create" };
        format!("{verb} {}", input.flag_key)
      });

    let cr = self
      .write(
        "create change request",
        self.store.create_change_request(NewChangeRequest {
          title,
          description: input.description,
          author: actor.to_ref(),
          project: input.project,
          flag_key: input.flag_key,
          current: live.as_ref().map(FlagSnapshot::from),
          proposed: ProposedFlag {
            payload:  input.payload,
            disabled: input.disabled,
            new_key:  input.new_key,
          },
        }),
      )
      .await?;

    info!(change_request = %cr.id, project = %cr.project, key = %cr.flag_key, "change request opened");
    self.audit.log(
      actor,
      audit_action::CHANGE_REQUEST_CREATED,
      Target::change_request(&cr),
      audit_log::encode("changes", &json!({ "current": cr.current, "proposed": cr.proposed })),
      Some(json!({ "flagKey": cr.flag_key })),
    );
    Ok(cr)
  }

  pub async fn list_change_requests(
    &self,
    actor: &Actor,
    filter: &ChangeRequestFilter,
  ) -> Result<Paginated<ChangeRequest>> {
    self.require(actor, resource::CHANGE_REQUEST, action::READ).await?;
    self
      .timed("list change requests", self.store.list_change_requests(filter))
      .await
  }

  pub async fn count_pending(&self, actor: &Actor) -> Result<u64> {
    self.require(actor, resource::CHANGE_REQUEST, action::READ).await?;
    self.timed("count change requests", self.store.count_pending()).await
  }

  pub async fn get_change_request(&self, actor: &Actor, id: Uuid) -> Result<ChangeRequestDetail> {
    self.require(actor, resource::CHANGE_REQUEST, action::READ).await?;
    let request = self.require_change_request(id).await?;
    let reviews = self.timed("list reviews", self.store.list_reviews(id)).await?;
    Ok(ChangeRequestDetail { request, reviews })
  }

  /// Approve, reject or comment. Admins only, and never on one's own request.
  pub async fn review(&self, actor: &Actor, id: Uuid, input: ReviewInput) -> Result<ChangeRequest> {
    if !self.is_admin(actor).await? {
      return Err(Error::forbidden(resource::ANY, action::ADMIN));
    }
    let cr = self.require_change_request(id).await?;
    if cr.author.is(actor) {
      return Err(Error::forbidden(resource::CHANGE_REQUEST, "review"));
    }
    let next = cr.next_status(Transition::Review(input.decision))?;

    let (cr, review) = self
      .write(
        "record review",
        self.store.record_review(
          id,
          NewReview {
            reviewer: actor.to_ref(),
            decision: input.decision,
            comment:  input.comment,
          },
          next,
        ),
      )
      .await?;

    info!(change_request = %id, decision = review.decision.as_str(), status = %cr.status, "change request reviewed");
    self.audit.log(
      actor,
      audit_action::CHANGE_REQUEST_REVIEWED,
      Target::change_request(&cr),
      None,
      Some(json!({
        "decision": review.decision,
        "comment":  review.comment,
        "status":   cr.status,
      })),
    );
    Ok(cr)
  }

  /// Write an approved proposal to the flag store.
  ///
  /// Fails with `Drifted`, writing nothing, if the live flag no longer
  /// matches the snapshot taken at proposal time. The write itself is
  /// version-checked against that snapshot, so an edit that lands after the
  /// drift check is reported the same way.
  pub async fn apply(&self, actor: &Actor, id: Uuid) -> Result<ChangeRequest> {
    self.require(actor, resource::CHANGE_REQUEST, action::APPLY).await?;
    let cr = self.require_change_request(id).await?;
    cr.next_status(Transition::Apply)?;

    let live = self
      .timed("get flag", self.flags.get_flag(&cr.project, &cr.flag_key))
      .await?;
    cr.check_drift(live.as_ref())?;

    let drifted = |e: Error| match e {
      Error::VersionConflict { .. } | Error::NotFound { .. } | Error::AlreadyExists { .. } => {
        Error::Drifted { id }
      }
      other => other,
    };
    let (before, after) = match &cr.current {
      Some(snapshot) => {
        let change = self
          .write(
            "apply change request",
            self.flags.update_flag(&cr.project, &cr.flag_key, FlagUpdate {
              payload:          cr.proposed.payload.clone(),
              disabled:         cr.proposed.disabled,
              expected_version: Some(snapshot.version),
              new_key:          cr.proposed.new_key.clone(),
            }),
          )
          .await
          .map_err(drifted)?;
        (Some(change.before), change.after)
      }
      None => {
        let flag = self
          .write(
            "apply change request",
            self.flags.create_flag(NewFlag {
              project:  cr.project.clone(),
              key:      cr.target_key().to_owned(),
              payload:  cr.proposed.payload.clone(),
              disabled: cr.proposed.disabled,
            }),
          )
          .await
          .map_err(drifted)?;
        (None, flag)
      }
    };

    // A cancel racing between the write above and this transition leaves the
    // flag written and the request cancelled; the caller sees InvalidState.
    let applied = self
      .write("mark change request applied", self.store.mark_applied(id, actor.to_ref()))
      .await
      .inspect_err(|e| warn!(change_request = %id, error = %e, "flag written but request not marked applied"))?;

    info!(change_request = %id, project = %after.project, key = %after.key, version = %after.version, "change request applied");
    self.audit.log(
      actor,
      audit_action::CHANGE_REQUEST_APPLIED,
      Target::change_request(&applied),
      before_after(before.as_ref(), Some(&after)),
      Some(json!({
        "changeRequestId": id,
        "author":          applied.author,
        "reviewer":        applied.reviewer,
        "reviewComment":   applied.review_comment,
        "version":         after.version,
      })),
    );
    self.refresh.signal(format!("applied change request {id}"));
    Ok(applied)
  }

  /// Withdraw a pending or approved request. Author or admin only.
  pub async fn cancel(&self, actor: &Actor, id: Uuid) -> Result<ChangeRequest> {
    let cr = self.require_change_request(id).await?;
    if !cr.author.is(actor) && !self.is_admin(actor).await? {
      return Err(Error::forbidden(resource::CHANGE_REQUEST, "cancel"));
    }
    cr.next_status(Transition::Cancel)?;

    let cr = self
      .write("cancel change request", self.store.cancel_change_request(id))
      .await?;
    info!(change_request = %id, "change request cancelled");
    self.audit.log(
      actor,
      audit_action::CHANGE_REQUEST_CANCELLED,
      Target::change_request(&cr),
      None,
      None,
    );
    Ok(cr)
  }
}
