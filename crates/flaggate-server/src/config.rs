//! Runtime configuration, deserialised from `config.toml` layered with
//! `FLAGGATE_*` environment variables.
//!
//! Every field has a default, so an empty file (or none at all) yields a
//! server on `127.0.0.1:8080` with a SQLite database in the working
//! directory.

use std::{path::PathBuf, time::Duration};

use flaggate_api::{ServiceSettings, refresh::RefreshSettings, service::UserProfile};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                      String,
  pub port:                      u16,
  pub auth_enabled:              bool,
  pub require_approvals:         bool,
  pub operation_timeout_ms:      u64,
  pub permission_cache_ttl_secs: u64,
  pub storage:                   StorageConfig,
  pub refresh:                   RefreshConfig,
  pub audit:                     AuditConfig,
  pub users:                     Vec<UserConfig>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                      "127.0.0.1".to_owned(),
      port:                      8080,
      auth_enabled:              true,
      require_approvals:         false,
      operation_timeout_ms:      10_000,
      permission_cache_ttl_secs: 30,
      storage:                   StorageConfig::default(),
      refresh:                   RefreshConfig::default(),
      audit:                     AuditConfig::default(),
      users:                     Vec::new(),
    }
  }
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn service_settings(&self) -> ServiceSettings {
    ServiceSettings {
      auth_enabled:         self.auth_enabled,
      require_approvals:    self.require_approvals,
      operation_timeout:    Duration::from_millis(self.operation_timeout_ms),
      permission_cache_ttl: Duration::from_secs(self.permission_cache_ttl_secs),
      audit_queue_capacity: self.audit.queue_capacity,
    }
  }

  /// Profiles shown by `GET /users`; password hashes stay here.
  pub fn user_profiles(&self) -> Vec<UserProfile> {
    self
      .users
      .iter()
      .map(|u| UserProfile {
        id:       u.id.clone(),
        username: u.username.clone(),
        email:    u.email.clone(),
        name:     u.name.clone(),
      })
      .collect()
  }
}

// ── Storage ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  #[default]
  Sqlite,
  /// Flags as JSON files; governance data still lives in SQLite.
  File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  pub backend:       BackendKind,
  pub database_path: PathBuf,
  pub flags_dir:     PathBuf,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      backend:       BackendKind::Sqlite,
      database_path: PathBuf::from("flaggate.db"),
      flags_dir:     PathBuf::from("flags"),
    }
  }
}

// ── Refresh ──

/// Where to notify the evaluation runtime. Refresh is off without a `url`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
  pub url:            Option<String>,
  pub bearer_token:   Option<String>,
  pub queue_capacity: usize,
  pub max_attempts:   u32,
  pub backoff_ms:     u64,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    let defaults = RefreshSettings::default();
    Self {
      url:            None,
      bearer_token:   None,
      queue_capacity: defaults.capacity,
      max_attempts:   defaults.max_attempts,
      backoff_ms:     defaults.backoff.as_millis() as u64,
    }
  }
}

impl RefreshConfig {
  pub fn settings(&self) -> RefreshSettings {
    RefreshSettings {
      capacity:     self.queue_capacity,
      max_attempts: self.max_attempts,
      backoff:      Duration::from_millis(self.backoff_ms),
    }
  }
}

// ── Audit ──

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
  pub queue_capacity: usize,
}

impl Default for AuditConfig {
  fn default() -> Self {
    Self {
      queue_capacity: flaggate_api::audit_log::DEFAULT_QUEUE_CAPACITY,
    }
  }
}

// ── Users ──

/// A user allowed to sign in with HTTP Basic auth.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
  pub id:            String,
  /// Login name; the `id` is used when absent.
  #[serde(default)]
  pub username:      Option<String>,
  #[serde(default)]
  pub email:         Option<String>,
  #[serde(default)]
  pub name:          Option<String>,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
  /// Granted the built-in admin role at startup.
  #[serde(default)]
  pub admin:         bool,
}

impl UserConfig {
  pub fn login(&self) -> &str { self.username.as_deref().unwrap_or(&self.id) }
}
