//! Best-effort audit trail.
//!
//! [`AuditLogger::log`] never waits on storage and never fails: events go
//! through a bounded queue to a single writer task. A full queue, a closed
//! queue or a store failure drops the event with a warning.

use std::sync::Arc;

use chrono::Utc;
use flaggate_core::{
  actor::Actor,
  audit::NewAuditEvent,
  change_request::ChangeRequest,
  flag::Flag,
  rbac::{ApiKey, Role, resource},
  store::AuditStore,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

enum Command {
  Write(Box<NewAuditEvent>),
  Flush(oneshot::Sender<()>),
}

/// What an audit event is about.
#[derive(Debug, Clone)]
pub struct Target {
  pub resource_type: &'static str,
  pub resource_id:   Option<String>,
  pub resource_name: Option<String>,
  pub project:       Option<String>,
}

impl Target {
  pub fn flag(flag: &Flag) -> Self {
    Self {
      resource_type: resource::FLAG,
      resource_id:   Some(flag.id.to_string()),
      resource_name: Some(flag.key.clone()),
      project:       Some(flag.project.clone()),
    }
  }

  pub fn project(name: &str) -> Self {
    Self {
      resource_type: "project",
      resource_id:   Some(name.to_owned()),
      resource_name: Some(name.to_owned()),
      project:       Some(name.to_owned()),
    }
  }

  pub fn change_request(cr: &ChangeRequest) -> Self {
    Self {
      resource_type: resource::CHANGE_REQUEST,
      resource_id:   Some(cr.id.to_string()),
      resource_name: Some(cr.title.clone()),
      project:       Some(cr.project.clone()),
    }
  }

  pub fn role(role: &Role) -> Self {
    Self {
      resource_type: resource::ROLE,
      resource_id:   Some(role.id.to_string()),
      resource_name: Some(role.name.clone()),
      project:       None,
    }
  }

  pub fn user(user_id: &str) -> Self {
    Self {
      resource_type: resource::USER,
      resource_id:   Some(user_id.to_owned()),
      resource_name: None,
      project:       None,
    }
  }

  pub fn api_key(key: &ApiKey) -> Self {
    Self {
      resource_type: resource::API_KEY,
      resource_id:   Some(key.id.to_string()),
      resource_name: Some(key.name.clone()),
      project:       None,
    }
  }
}

/// Serialise an audit field, dropping it with a warning on failure.
pub fn encode<T: Serialize>(field: &'static str, value: &T) -> Option<serde_json::Value> {
  match serde_json::to_value(value) {
    Ok(v) => Some(v),
    Err(e) => {
      warn!(field, error = %e, "dropping unserialisable audit field");
      None
    }
  }
}

/// Handle to the audit writer. Cheap to clone.
#[derive(Clone)]
pub struct AuditLogger {
  tx: mpsc::Sender<Command>,
}

impl AuditLogger {
  /// Start the writer task on the current runtime.
  pub fn spawn<A>(store: Arc<A>, capacity: usize) -> Self
  where
    A: AuditStore + 'static,
  {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
      while let Some(cmd) = rx.recv().await {
        match cmd {
          Command::Write(event) => {
            let action = event.action.clone();
            if let Err(e) = store.append_audit_event(*event).await {
              let e: flaggate_core::Error = e.into();
              warn!(%action, error = %e, "failed to write audit event");
            }
          }
          Command::Flush(done) => {
            let _ = done.send(());
          }
        }
      }
    });
    Self { tx }
  }

  pub fn log(
    &self,
    actor: &Actor,
    action: &str,
    target: Target,
    changes: Option<serde_json::Value>,
    metadata: Option<serde_json::Value>,
  ) {
    let event = NewAuditEvent {
      timestamp: Utc::now(),
      actor: actor.to_ref(),
      action: action.to_owned(),
      resource_type: target.resource_type.to_owned(),
      resource_id: target.resource_id,
      resource_name: target.resource_name,
      project: target.project,
      changes,
      metadata,
    };
    if let Err(e) = self.tx.try_send(Command::Write(Box::new(event))) {
      let reason = match e {
        mpsc::error::TrySendError::Full(_) => "queue full",
        mpsc::error::TrySendError::Closed(_) => "writer stopped",
      };
      warn!(action, reason, "dropping audit event");
    }
  }

  /// Wait until every event logged before this call has been written (or
  /// dropped).
  pub async fn flush(&self) {
    let (done, wait) = oneshot::channel();
    if self.tx.send(Command::Flush(done)).await.is_ok() {
      let _ = wait.await;
    }
  }
}
