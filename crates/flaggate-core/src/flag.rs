//! The versioned flag record.
//!
//! A flag's configuration is carried as an opaque [`Payload`]: the store and
//! the mutation pipeline never look inside it. Interpretation is confined to
//! [`crate::validate`].

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::Result;

// ─── Version ─────────────────────────────────────────────────────────────────

/// Store-assigned optimistic-concurrency token.
///
/// Starts at 1 on create and advances by one on every update. Clients treat
/// it as opaque and echo it back on update.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
  pub const INITIAL: Version = Version(1);

  pub fn next(self) -> Version { Version(self.0 + 1) }

  /// The version to issue after `high_water`, the highest version ever
  /// issued for a key (which outlives deletes).
  pub fn following(high_water: Option<Version>) -> Version {
    high_water.map_or(Version::INITIAL, Version::next)
  }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

// ─── Payload ─────────────────────────────────────────────────────────────────

/// Opaque flag configuration: compact JSON bytes.
///
/// Ingress goes through [`Payload::from_json`] or [`Payload::parse`], which
/// normalise to compact JSON so that storage round-trips are byte-stable.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Bytes);

impl Payload {
  pub fn from_json(value: &serde_json::Value) -> Result<Self> {
    Ok(Self(Bytes::from(serde_json::to_vec(value)?)))
  }

  /// Parse and normalise arbitrary JSON text.
  pub fn parse(raw: &[u8]) -> Result<Self> {
    let value: serde_json::Value = serde_json::from_slice(raw)?;
    Self::from_json(&value)
  }

  /// Wrap bytes that were produced by this type earlier (e.g. read back from
  /// a store column). No normalisation is applied.
  pub fn from_stored(raw: impl Into<Bytes>) -> Self { Self(raw.into()) }

  pub fn as_bytes(&self) -> &[u8] { &self.0 }

  pub fn to_json(&self) -> Result<serde_json::Value> {
    Ok(serde_json::from_slice(&self.0)?)
  }

  /// Hex SHA-256 of the payload bytes.
  pub fn digest(&self) -> String { hex::encode(Sha256::digest(&self.0)) }
}

impl fmt::Debug for Payload {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Payload({})", String::from_utf8_lossy(&self.0))
  }
}

impl Serialize for Payload {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let value = self.to_json().map_err(serde::ser::Error::custom)?;
    value.serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for Payload {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Payload::from_json(&value).map_err(serde::de::Error::custom)
  }
}

// ─── Flag ────────────────────────────────────────────────────────────────────

/// A flag as persisted by a [`FlagStore`](crate::store::FlagStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
  pub id:         Uuid,
  pub project:    String,
  pub key:        String,
  pub payload:    Payload,
  pub disabled:   bool,
  pub version:    Version,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Input for [`FlagStore::create_flag`](crate::store::FlagStore::create_flag).
#[derive(Debug, Clone)]
pub struct NewFlag {
  pub project:  String,
  pub key:      String,
  pub payload:  Payload,
  pub disabled: bool,
}

/// Input for [`FlagStore::update_flag`](crate::store::FlagStore::update_flag).
///
/// `expected_version: None` opts out of the version check (last write wins).
/// `new_key` renames the flag within its project.
#[derive(Debug, Clone)]
pub struct FlagUpdate {
  pub payload:          Payload,
  pub disabled:         bool,
  pub expected_version: Option<Version>,
  pub new_key:          Option<String>,
}

impl FlagUpdate {
  /// An update that only flips `disabled`, keeping the payload.
  pub fn toggle(flag: &Flag, disabled: bool) -> Self {
    Self {
      payload: flag.payload.clone(),
      disabled,
      expected_version: Some(flag.version),
      new_key: None,
    }
  }
}

/// The record before and after a successful update.
#[derive(Debug, Clone)]
pub struct FlagChange {
  pub before: Flag,
  pub after:  Flag,
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn payload_is_normalised_to_compact_json() {
    let p = Payload::parse(br#"{ "b": 1,   "a": [true, false] }"#).unwrap();
    assert_eq!(p.as_bytes(), br#"{"a":[true,false],"b":1}"#);
  }

  #[test]
  fn payload_rejects_invalid_json() {
    assert!(Payload::parse(b"{not json").is_err());
  }

  #[test]
  fn payload_serialises_as_inline_json() {
    let p = Payload::from_json(&json!({"variations": {"on": true}})).unwrap();
    let out = serde_json::to_value(&p).unwrap();
    assert_eq!(out, json!({"variations": {"on": true}}));
  }

  #[test]
  fn digest_tracks_content() {
    let a = Payload::from_json(&json!({"x": 1})).unwrap();
    let b = Payload::from_json(&json!({"x": 1})).unwrap();
    let c = Payload::from_json(&json!({"x": 2})).unwrap();
    assert_eq!(a.digest(), b.digest());
    assert_ne!(a.digest(), c.digest());
    assert_eq!(a.digest().len(), 64);
  }

  #[test]
  fn version_advances_by_one() {
    assert_eq!(Version::INITIAL.next(), Version(2));
    assert!(Version(3) > Version(2));
  }
}
