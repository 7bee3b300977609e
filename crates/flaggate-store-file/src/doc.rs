//! The on-disk project document and its atomic persistence.

use std::{
  collections::BTreeMap,
  io::{ErrorKind, Write as _},
  path::Path,
};

use flaggate_core::flag::{Flag, Version};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::Result;

/// Everything stored for one project.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDoc {
  #[serde(default)]
  pub flags:         BTreeMap<String, Flag>,
  /// Highest version ever issued per key; outlives deletes.
  #[serde(default)]
  pub last_versions: BTreeMap<String, Version>,
  /// Created explicitly, so listed even while empty.
  #[serde(default)]
  pub declared:      bool,
}

impl ProjectDoc {
  pub fn is_listed(&self) -> bool { self.declared || !self.flags.is_empty() }

  pub fn high_water(&self, key: &str) -> Option<Version> {
    self.last_versions.get(key).copied()
  }

  pub fn record_version(&mut self, key: &str, v: Version) {
    let slot = self.last_versions.entry(key.to_owned()).or_insert(v);
    if *slot < v {
      *slot = v;
    }
  }
}

/// Read a project document; a missing file is an empty project.
pub fn load(path: &Path) -> Result<ProjectDoc> {
  match std::fs::read(path) {
    Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(ProjectDoc::default()),
    Err(e) => Err(e.into()),
  }
}

/// Write `doc` to a temp file beside `path`, fsync it, then rename it over
/// `path`.
pub fn persist(path: &Path, doc: &ProjectDoc) -> Result<()> {
  let dir = path.parent().unwrap_or_else(|| Path::new("."));
  let mut tmp = NamedTempFile::new_in(dir)?;
  serde_json::to_writer_pretty(&mut tmp, doc)?;
  tmp.write_all(b"\n")?;
  tmp.as_file().sync_all()?;
  tmp.persist(path)?;
  Ok(())
}
