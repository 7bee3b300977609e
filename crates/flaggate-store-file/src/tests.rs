//! Tests for `FileStore` against a temporary directory.

use flaggate_core::{
  Error as CoreError,
  flag::{FlagUpdate, NewFlag, Payload, Version},
  page::{Page, SortOrder},
  store::FlagStore,
};
use serde_json::json;
use tempfile::TempDir;

use crate::{FileStore, ProjectLocks, doc::ProjectDoc};

async fn store() -> (TempDir, FileStore) {
  let dir = tempfile::tempdir().expect("temp dir");
  let s = FileStore::open(dir.path()).await.expect("file store");
  (dir, s)
}

fn payload(v: serde_json::Value) -> Payload { Payload::from_json(&v).unwrap() }

fn new_flag(project: &str, key: &str) -> NewFlag {
  NewFlag {
    project:  project.into(),
    key:      key.into(),
    payload:  payload(json!({"variations": {"on": true}, "defaultRule": {"variation": "on"}})),
    disabled: false,
  }
}

fn update(v: serde_json::Value, expected: Option<Version>) -> FlagUpdate {
  FlagUpdate {
    payload:          payload(v),
    disabled:         false,
    expected_version: expected,
    new_key:          None,
  }
}

fn core(e: crate::Error) -> CoreError { e.into() }

fn read_doc(s: &FileStore, project: &str) -> ProjectDoc {
  let raw = std::fs::read(s.dir().join(format!("{project}.json"))).unwrap();
  serde_json::from_slice(&raw).expect("project file is complete JSON")
}

#[tokio::test]
async fn create_get_and_persist() {
  let (_dir, s) = store().await;
  let created = s.create_flag(new_flag("web", "checkout")).await.unwrap();
  assert_eq!(created.version, Version::INITIAL);

  assert_eq!(s.get_flag("web", "checkout").await.unwrap().unwrap(), created);
  assert!(s.get_flag("web", "missing").await.unwrap().is_none());

  let doc = read_doc(&s, "web");
  assert_eq!(doc.flags["checkout"], created);
  assert_eq!(doc.last_versions["checkout"], Version(1));
}

#[tokio::test]
async fn reopened_store_sees_previous_writes() {
  let (dir, s) = store().await;
  s.create_flag(new_flag("web", "a")).await.unwrap();
  drop(s);

  let again = FileStore::open(dir.path()).await.unwrap();
  assert!(again.get_flag("web", "a").await.unwrap().is_some());
}

#[tokio::test]
async fn duplicate_create_is_already_exists() {
  let (_dir, s) = store().await;
  s.create_flag(new_flag("web", "a")).await.unwrap();
  let err = core(s.create_flag(new_flag("web", "a")).await.unwrap_err());
  assert!(matches!(err, CoreError::AlreadyExists { .. }));
}

#[tokio::test]
async fn stale_version_is_rejected_and_nothing_written() {
  let (_dir, s) = store().await;
  s.create_flag(new_flag("web", "a")).await.unwrap();
  s.update_flag("web", "a", update(json!({"x": 1}), Some(Version(1))))
    .await
    .unwrap();

  let err = core(
    s.update_flag("web", "a", update(json!({"x": 2}), Some(Version(1))))
      .await
      .unwrap_err(),
  );
  assert!(matches!(
    err,
    CoreError::VersionConflict { expected: Version(1), actual: Version(2), .. }
  ));
  let doc = read_doc(&s, "web");
  assert_eq!(doc.flags["a"].payload.as_bytes(), br#"{"x":1}"#);
}

#[tokio::test]
async fn concurrent_updates_through_shared_locks_exactly_one_wins() {
  let dir = tempfile::tempdir().unwrap();
  let locks = ProjectLocks::new();
  let first = FileStore::with_locks(dir.path(), locks.clone()).await.unwrap();
  let second = FileStore::with_locks(dir.path(), locks).await.unwrap();
  first.create_flag(new_flag("web", "race")).await.unwrap();

  let mut handles = Vec::new();
  for i in 0..8 {
    let s = if i % 2 == 0 { first.clone() } else { second.clone() };
    handles.push(tokio::spawn(async move {
      s.update_flag("web", "race", update(json!({"writer": i}), Some(Version(1))))
        .await
    }));
  }

  let mut ok = 0;
  for h in handles {
    match h.await.unwrap() {
      Ok(_) => ok += 1,
      Err(e) => assert!(matches!(core(e), CoreError::VersionConflict { .. })),
    }
  }
  assert_eq!(ok, 1);
  assert_eq!(read_doc(&first, "web").flags["race"].version, Version(2));
}

#[tokio::test]
async fn rename_onto_existing_key_leaves_both_untouched() {
  let (_dir, s) = store().await;
  s.create_flag(new_flag("web", "a")).await.unwrap();
  s.create_flag(new_flag("web", "b")).await.unwrap();

  let mut u = update(json!({"renamed": true}), Some(Version(1)));
  u.new_key = Some("b".into());
  let err = core(s.update_flag("web", "a", u).await.unwrap_err());
  assert!(matches!(err, CoreError::KeyConflict { .. }));

  let doc = read_doc(&s, "web");
  assert_eq!(doc.flags["a"].version, Version(1));
  assert_eq!(doc.flags["b"].version, Version(1));
}

#[tokio::test]
async fn rename_moves_the_flag() {
  let (_dir, s) = store().await;
  let original = s.create_flag(new_flag("web", "old")).await.unwrap();

  let mut u = update(json!({"x": 1}), None);
  u.new_key = Some("new".into());
  let change = s.update_flag("web", "old", u).await.unwrap();
  assert_eq!(change.after.id, original.id);
  assert!(s.get_flag("web", "old").await.unwrap().is_none());
  assert_eq!(s.get_flag("web", "new").await.unwrap().unwrap().version, Version(2));
}

#[tokio::test]
async fn recreated_key_continues_its_version_sequence() {
  let (_dir, s) = store().await;
  s.create_flag(new_flag("web", "a")).await.unwrap();
  s.update_flag("web", "a", update(json!({"x": 1}), None)).await.unwrap();
  s.update_flag("web", "a", update(json!({"x": 2}), None)).await.unwrap();

  let deleted = s.delete_flag("web", "a").await.unwrap();
  assert_eq!(deleted.version, Version(3));
  let err = core(s.delete_flag("web", "a").await.unwrap_err());
  assert!(matches!(err, CoreError::NotFound { .. }));

  let again = s.create_flag(new_flag("web", "a")).await.unwrap();
  assert_eq!(again.version, Version(4));
}

#[tokio::test]
async fn aborted_update_still_leaves_a_complete_document() {
  let (_dir, s) = store().await;
  s.create_flag(new_flag("web", "a")).await.unwrap();

  let writer = s.clone();
  let handle = tokio::spawn(async move {
    writer
      .update_flag("web", "a", update(json!({"big": "x".repeat(64 * 1024)}), None))
      .await
  });
  tokio::task::yield_now().await;
  handle.abort();

  // Waits for any write that already reached the blocking task.
  let flag = s.get_flag("web", "a").await.unwrap().unwrap();
  let doc = read_doc(&s, "web");
  assert_eq!(doc.flags["a"], flag);
  assert!(flag.version == Version(1) || flag.version == Version(2));
}

#[tokio::test]
async fn list_flags_sorts_searches_and_pages() {
  let (_dir, s) = store().await;
  for key in ["delta", "alpha", "charlie", "bravo", "alphabet"] {
    s.create_flag(new_flag("web", key)).await.unwrap();
  }

  let page = s.list_flags("web", &Page::default()).await.unwrap();
  let keys: Vec<_> = page.data.iter().map(|f| f.key.as_str()).collect();
  assert_eq!(keys, ["alpha", "alphabet", "bravo", "charlie", "delta"]);

  let page = Page {
    order: SortOrder::Desc,
    page_size: 2,
    page: 2,
    ..Page::default()
  };
  let out = s.list_flags("web", &page).await.unwrap();
  let keys: Vec<_> = out.data.iter().map(|f| f.key.as_str()).collect();
  assert_eq!(keys, ["bravo", "alphabet"]);
  assert_eq!(out.total, 5);
  assert_eq!(out.total_pages, 3);

  let page = Page {
    search: Some("alpha".into()),
    ..Page::default()
  };
  assert_eq!(s.list_flags("web", &page).await.unwrap().total, 2);
}

#[tokio::test]
async fn list_projects_skips_empty_documents() {
  let (_dir, s) = store().await;
  s.create_flag(new_flag("web", "a")).await.unwrap();
  s.create_flag(new_flag("api", "a")).await.unwrap();
  s.create_flag(new_flag("gone", "a")).await.unwrap();
  s.delete_flag("gone", "a").await.unwrap();

  assert_eq!(s.list_projects().await.unwrap(), ["api", "web"]);
}

#[tokio::test]
async fn declared_projects_are_listed_until_deleted() {
  let (_dir, s) = store().await;
  s.create_project("empty").await.unwrap();
  s.create_flag(new_flag("web", "a")).await.unwrap();
  assert_eq!(s.list_projects().await.unwrap(), ["empty", "web"]);

  let err = core(s.create_project("web").await.unwrap_err());
  assert!(matches!(err, CoreError::AlreadyExists { .. }));

  let removed = s.delete_project("web").await.unwrap();
  assert_eq!(removed.len(), 1);
  s.delete_project("empty").await.unwrap();
  assert!(s.list_projects().await.unwrap().is_empty());

  let err = core(s.delete_project("web").await.unwrap_err());
  assert!(matches!(err, CoreError::NotFound { .. }));

  let again = s.create_flag(new_flag("web", "a")).await.unwrap();
  assert_eq!(again.version, Version(2));
}

#[tokio::test]
async fn project_names_cannot_escape_the_directory() {
  let (_dir, s) = store().await;
  let err = core(s.get_flag("../etc", "a").await.unwrap_err());
  assert!(matches!(err, CoreError::Validation { .. }));
}
