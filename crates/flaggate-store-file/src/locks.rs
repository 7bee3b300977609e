//! Per-project exclusive locks.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

/// Registry of per-project locks, shared by every [`FileStore`](crate::FileStore)
/// that should serialise against the others.
///
/// Cloning shares the registry. Stores built with separate registries do not
/// coordinate, which is what tests want and what production must avoid for a
/// shared directory.
#[derive(Clone, Default)]
pub struct ProjectLocks {
  inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ProjectLocks {
  pub fn new() -> Self { Self::default() }

  /// The lock guarding `project`, created on first use.
  pub fn get(&self, project: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    map.entry(project.to_owned()).or_default().clone()
  }
}
