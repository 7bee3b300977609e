//! Input validation: identifier syntax and the flag payload schema.
//!
//! This is the only place that looks inside a [`Payload`]. The store and the
//! mutation pipeline treat payloads as opaque bytes.

use serde_json::{Map, Value};

use crate::{Error, Result, flag::Payload};

const MAX_KEY_LEN: usize = 128;
const MAX_PROJECT_LEN: usize = 64;

fn valid_identifier(s: &str, max: usize) -> bool {
  let mut chars = s.chars();
  let Some(first) = chars.next() else {
    return false;
  };
  s.len() <= max
    && first.is_ascii_alphanumeric()
    && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Flag keys: alphanumeric first character, then alphanumerics or `._-`,
/// at most 128 characters.
pub fn flag_key(key: &str) -> Result<()> {
  if key.is_empty() {
    return Err(Error::validation("flag key is required"));
  }
  if !valid_identifier(key, MAX_KEY_LEN) {
    return Err(Error::validation(format!(
      "invalid flag key {key:?}: must start with a letter or digit and contain only letters, digits, '.', '_' or '-' (max {MAX_KEY_LEN} chars)"
    )));
  }
  Ok(())
}

/// Project names follow the flag-key rules with a 64 character limit.
pub fn project(name: &str) -> Result<()> {
  if name.is_empty() {
    return Err(Error::validation("project name is required"));
  }
  if !valid_identifier(name, MAX_PROJECT_LEN) {
    return Err(Error::validation(format!(
      "invalid project name {name:?}: must start with a letter or digit and contain only letters, digits, '.', '_' or '-' (max {MAX_PROJECT_LEN} chars)"
    )));
  }
  Ok(())
}

// ─── Payload schema ──────────────────────────────────────────────────────────

/// Check a flag payload against the configuration schema.
///
/// The payload must be a JSON object with a non-empty `variations` object and
/// a `defaultRule`. Rules may name a `variation` or a `percentage` split;
/// both must reference declared variations and splits must sum to 100.
/// All problems are collected into the error's `details`.
pub fn payload(payload: &Payload) -> Result<()> {
  let value = payload.to_json()?;
  let Value::Object(config) = value else {
    return Err(Error::validation("flag payload must be a JSON object"));
  };

  let mut problems = Vec::new();

  let empty = Map::new();
  let variations = match config.get("variations") {
    Some(Value::Object(v)) if !v.is_empty() => v,
    Some(Value::Object(_)) | None => {
      problems.push("at least one variation is required".to_owned());
      &empty
    }
    Some(_) => {
      problems.push("variations must be an object".to_owned());
      &empty
    }
  };

  match config.get("defaultRule") {
    Some(Value::Object(rule)) => check_rule(rule, variations, "defaultRule", &mut problems),
    Some(_) => problems.push("defaultRule must be an object".to_owned()),
    None => problems.push("defaultRule is required".to_owned()),
  }

  match config.get("targeting") {
    Some(Value::Array(rules)) => {
      for (i, rule) in rules.iter().enumerate() {
        let label = format!("targeting rule #{}", i + 1);
        let Value::Object(rule) = rule else {
          problems.push(format!("{label} must be an object"));
          continue;
        };
        let has_query = rule
          .get("query")
          .and_then(Value::as_str)
          .is_some_and(|q| !q.trim().is_empty());
        if !has_query {
          problems.push(format!("{label} must have a query"));
        }
        check_rule(rule, variations, &label, &mut problems);
      }
    }
    Some(Value::Null) | None => {}
    Some(_) => problems.push("targeting must be an array".to_owned()),
  }

  if problems.is_empty() {
    Ok(())
  } else {
    Err(Error::Validation {
      message: "invalid flag configuration".to_owned(),
      details: problems,
    })
  }
}

fn check_rule(
  rule: &Map<String, Value>,
  variations: &Map<String, Value>,
  label: &str,
  problems: &mut Vec<String>,
) {
  if let Some(name) = rule.get("variation").and_then(Value::as_str)
    && !name.is_empty()
    && !variations.contains_key(name)
  {
    problems.push(format!("{label} references unknown variation {name:?}"));
  }

  let Some(Value::Object(split)) = rule.get("percentage") else {
    return;
  };
  if split.is_empty() {
    return;
  }
  let mut total = 0.0;
  for (name, pct) in split {
    if !variations.contains_key(name) {
      problems.push(format!("{label} percentage references unknown variation {name:?}"));
    }
    match pct.as_f64() {
      Some(p) if p < 0.0 => {
        problems.push(format!("{label} percentage for {name:?} cannot be negative"));
      }
      Some(p) => total += p,
      None => problems.push(format!("{label} percentage for {name:?} must be a number")),
    }
  }
  if !(99.9..=100.1).contains(&total) {
    problems.push(format!("{label} percentage splits must sum to 100 (got {total:.2})"));
  }
}
