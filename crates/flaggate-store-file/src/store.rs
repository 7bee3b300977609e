//! [`FileStore`]: flags kept as one JSON document per project.

use std::{
  cmp::Ordering,
  path::{Path, PathBuf},
};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use flaggate_core::{
  flag::{Flag, FlagChange, FlagUpdate, NewFlag, Version},
  page::{Page, Paginated, SortOrder},
  store::{Backend, FlagStore},
  validate,
};

use crate::{
  Error, Result,
  doc::{self, ProjectDoc},
  locks::ProjectLocks,
};

type CoreError = flaggate_core::Error;

/// A [`FlagStore`] over a directory of project documents.
///
/// Cloning shares the lock registry. Two stores pointed at the same
/// directory must share one [`ProjectLocks`] (see [`FileStore::with_locks`]).
#[derive(Clone)]
pub struct FileStore {
  dir:   PathBuf,
  locks: ProjectLocks,
}

impl FileStore {
  /// Open (or create) a store rooted at `dir` with its own lock registry.
  pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
    Self::with_locks(dir, ProjectLocks::new()).await
  }

  pub async fn with_locks(dir: impl AsRef<Path>, locks: ProjectLocks) -> Result<Self> {
    let dir = dir.as_ref().to_path_buf();
    tokio::fs::create_dir_all(&dir).await?;
    Ok(Self { dir, locks })
  }

  pub fn dir(&self) -> &Path { &self.dir }

  fn path_for(&self, project: &str) -> PathBuf { self.dir.join(format!("{project}.json")) }

  /// Run `f` against the project's document under its exclusive lock.
  ///
  /// `f` returns its result plus whether the document changed; changed
  /// documents are persisted before the lock is released. The guard travels
  /// into the blocking task, so a caller that stops waiting does not release
  /// the lock before the write finishes.
  async fn with_project<T, F>(&self, project: &str, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut ProjectDoc) -> Result<(T, bool)> + Send + 'static,
  {
    validate::project(project)?;
    let path = self.path_for(project);
    let guard = self.locks.get(project).lock_owned().await;

    tokio::task::spawn_blocking(move || {
      let _guard = guard;
      let mut doc = doc::load(&path)?;
      let (value, dirty) = f(&mut doc)?;
      if dirty {
        doc::persist(&path, &doc)?;
        debug!(path = %path.display(), "persisted project document");
      }
      Ok(value)
    })
    .await?
  }
}

fn compare(a: &Flag, b: &Flag, sort: &str, order: SortOrder) -> Ordering {
  let primary = match sort {
    "created_at" => a.created_at.cmp(&b.created_at),
    "updated_at" => a.updated_at.cmp(&b.updated_at),
    _ => a.key.cmp(&b.key),
  };
  let primary = match order {
    SortOrder::Asc => primary,
    SortOrder::Desc => primary.reverse(),
  };
  primary.then_with(|| a.key.cmp(&b.key))
}

impl Backend for FileStore {
  type Error = Error;
}

impl FlagStore for FileStore {
  async fn get_flag(&self, project: &str, key: &str) -> Result<Option<Flag>> {
    let key = key.to_owned();
    self
      .with_project(project, move |doc| Ok((doc.flags.get(&key).cloned(), false)))
      .await
  }

  async fn create_flag(&self, input: NewFlag) -> Result<Flag> {
    let project = input.project.clone();
    let now = Utc::now();

    self
      .with_project(&project, move |doc| {
        if doc.flags.contains_key(&input.key) {
          return Err(CoreError::already_exists("flag", &input.key).into());
        }
        let version = Version::following(doc.high_water(&input.key));
        let flag = Flag {
          id: Uuid::new_v4(),
          project: input.project,
          key: input.key.clone(),
          payload: input.payload,
          disabled: input.disabled,
          version,
          created_at: now,
          updated_at: now,
        };
        doc.record_version(&input.key, version);
        doc.flags.insert(input.key, flag.clone());
        Ok((flag, true))
      })
      .await
  }

  async fn update_flag(&self, project: &str, key: &str, update: FlagUpdate) -> Result<FlagChange> {
    let key = key.to_owned();
    let now = Utc::now();

    self
      .with_project(project, move |doc| {
        let before = doc
          .flags
          .get(&key)
          .cloned()
          .ok_or_else(|| CoreError::not_found("flag", &key))?;

        if let Some(expected) = update.expected_version
          && expected != before.version
        {
          return Err(
            CoreError::VersionConflict {
              key,
              expected,
              actual: before.version,
            }
            .into(),
          );
        }

        let target = match update.new_key {
          Some(new_key) if new_key != key => {
            if doc.flags.contains_key(&new_key) {
              return Err(CoreError::KeyConflict { key: new_key }.into());
            }
            new_key
          }
          _ => key.clone(),
        };

        let floor = doc
          .high_water(&target)
          .map_or(before.version, |v| v.max(before.version));
        let version = Version::following(Some(floor));

        let after = Flag {
          key: target.clone(),
          payload: update.payload,
          disabled: update.disabled,
          version,
          updated_at: now,
          ..before.clone()
        };
        doc.flags.remove(&key);
        doc.flags.insert(target.clone(), after.clone());
        doc.record_version(&target, version);
        Ok((FlagChange { before, after }, true))
      })
      .await
  }

  async fn delete_flag(&self, project: &str, key: &str) -> Result<Flag> {
    let key = key.to_owned();
    self
      .with_project(project, move |doc| {
        let flag = doc
          .flags
          .remove(&key)
          .ok_or_else(|| CoreError::not_found("flag", &key))?;
        Ok((flag, true))
      })
      .await
  }

  async fn list_flags(&self, project: &str, page: &Page) -> Result<Paginated<Flag>> {
    let page = page.clone().normalized();

    self
      .with_project(project, move |doc| {
        let mut flags: Vec<Flag> = doc
          .flags
          .values()
          .filter(|f| page.search.as_deref().is_none_or(|s| f.key.contains(s)))
          .cloned()
          .collect();
        let sort = page.sort_or(&["key", "created_at", "updated_at"], "key");
        flags.sort_by(|a, b| compare(a, b, sort, page.order));
        Ok((Paginated::from_vec(flags, &page), false))
      })
      .await
  }

  async fn list_projects(&self) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(&self.dir).await?;
    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        && validate::project(stem).is_ok()
      {
        candidates.push(stem.to_owned());
      }
    }

    let mut projects = Vec::new();
    for project in candidates {
      let listed = self
        .with_project(&project, |doc| Ok((doc.is_listed(), false)))
        .await?;
      if listed {
        projects.push(project);
      }
    }
    projects.sort();
    Ok(projects)
  }

  async fn create_project(&self, project: &str) -> Result<()> {
    let name = project.to_owned();
    self
      .with_project(project, move |doc| {
        if doc.is_listed() {
          return Err(CoreError::already_exists("project", &name).into());
        }
        doc.declared = true;
        Ok(((), true))
      })
      .await
  }

  /// Empties the document rather than removing it, so version high-water
  /// marks survive.
  async fn delete_project(&self, project: &str) -> Result<Vec<Flag>> {
    let name = project.to_owned();
    self
      .with_project(project, move |doc| {
        if !doc.is_listed() {
          return Err(CoreError::not_found("project", &name).into());
        }
        doc.declared = false;
        let removed = std::mem::take(&mut doc.flags).into_values().collect();
        Ok((removed, true))
      })
      .await
  }
}
