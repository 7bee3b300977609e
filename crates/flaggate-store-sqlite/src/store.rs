//! [`SqliteStore`]: the SQLite implementation of the flaggate store traits.

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _, Transaction, TransactionBehavior};
use uuid::Uuid;

use flaggate_core::{
  actor::ActorRef,
  audit::{AuditEvent, AuditFilter, NewAuditEvent},
  change_request::{
    ChangeRequest, ChangeRequestFilter, ChangeRequestStatus, NewChangeRequest,
    NewReview, Review, ReviewDecision, Transition,
  },
  flag::{Flag, FlagChange, FlagUpdate, NewFlag, Version},
  page::{Page, Paginated},
  rbac::{self, ApiKey, NewApiKey, NewRole, Role, RoleUpdate, StoredApiKey},
  store::{ApiKeyStore, AuditStore, Backend, ChangeRequestStore, FlagStore, RoleStore},
};

use crate::{
  Error, Result,
  encode::{
    API_KEY_COLUMNS, AUDIT_COLUMNS, CHANGE_REQUEST_COLUMNS, FLAG_COLUMNS, RawApiKey,
    RawAuditEvent, RawChangeRequest, RawFlag, RawReview, REVIEW_COLUMNS, ROLE_COLUMNS,
    decode_version, encode_dt, encode_json, encode_uuid, encode_version, role_from_row,
  },
  schema::SCHEMA,
};

type CoreError = flaggate_core::Error;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A flaggate store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. All access
/// is serialised on the connection's thread; writes use `BEGIN IMMEDIATE`
/// so a read-check-write sequence cannot interleave with another writer.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Create tables and seed the built-in roles (by name, so restarts keep
  /// their ids).
  async fn init_schema(&self) -> Result<()> {
    let now = encode_dt(Utc::now());
    let seeds = rbac::builtin_roles()
      .into_iter()
      .map(|r| -> Result<_> { Ok((r.name, r.description, encode_json(&r.permissions)?)) })
      .collect::<Result<Vec<_>>>()?;

    self
      .conn
      .call(move |conn| {
        conn.execute_batch(SCHEMA)?;
        for (name, description, permissions) in seeds {
          conn.execute(
            "INSERT OR IGNORE INTO roles
               (id, name, description, permissions, builtin, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
            rusqlite::params![encode_uuid(Uuid::new_v4()), name, description, permissions, now],
          )?;
        }
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `f` on the connection thread without a transaction.
  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
  {
    self.conn.call(move |conn| Ok(f(conn))).await?
  }

  /// Run `f` inside an immediate transaction. Any error rolls back.
  async fn write<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
  {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&tx) {
          Ok(value) => {
            tx.commit()?;
            Ok(Ok(value))
          }
          Err(e) => Ok(Err(e)),
        }
      })
      .await?
  }
}

// ─── Audit queries ───────────────────────────────────────────────────────────

const AUDIT_WHERE: &str = "(?1 IS NULL OR actor_id = ?1 OR actor_email = ?1)
    AND (?2 IS NULL OR action = ?2)
    AND (?3 IS NULL OR resource_type = ?3)
    AND (?4 IS NULL OR resource_name = ?4)
    AND (?5 IS NULL OR project = ?5)
    AND (?6 IS NULL OR timestamp >= ?6)
    AND (?7 IS NULL OR timestamp <= ?7)
    AND (?8 IS NULL OR resource_id LIKE ?8 ESCAPE '\\'
         OR resource_name LIKE ?8 ESCAPE '\\'
         OR action LIKE ?8 ESCAPE '\\')";

/// An [`AuditFilter`] bound for the connection thread.
struct AuditQuery {
  actor:         Option<String>,
  action:        Option<String>,
  resource_type: Option<String>,
  resource_name: Option<String>,
  project:       Option<String>,
  from:          Option<String>,
  to:            Option<String>,
  search:        Option<String>,
  order_by:      String,
}

impl AuditQuery {
  fn new(filter: &AuditFilter, page: &Page) -> Self {
    let order_by = match page.sort.as_deref() {
      None => "timestamp DESC".to_owned(),
      Some(_) => format!(
        "{} {}",
        page.sort_or(&["timestamp", "action", "resource_type"], "timestamp"),
        page.order.as_sql()
      ),
    };
    Self {
      actor: filter.actor.clone(),
      action: filter.action.clone(),
      resource_type: filter.resource_type.clone(),
      resource_name: filter.resource_name.clone(),
      project: filter.project.clone(),
      from: filter.from.map(encode_dt),
      to: filter.to.map(encode_dt),
      search: contains_pattern(page.search.as_deref()),
      order_by,
    }
  }

  fn count(&self, conn: &Connection) -> Result<u64> {
    let total: i64 = conn.query_row(
      &format!("SELECT COUNT(*) FROM audit_events WHERE {AUDIT_WHERE}"),
      rusqlite::params![
        self.actor,
        self.action,
        self.resource_type,
        self.resource_name,
        self.project,
        self.from,
        self.to,
        self.search,
      ],
      |r| r.get(0),
    )?;
    Ok(total as u64)
  }

  fn select(&self, conn: &Connection, limit: i64, offset: i64) -> Result<Vec<AuditEvent>> {
    let mut stmt = conn.prepare(&format!(
      "SELECT {AUDIT_COLUMNS} FROM audit_events WHERE {AUDIT_WHERE}
        ORDER BY {}, id LIMIT ?9 OFFSET ?10",
      self.order_by,
    ))?;
    let rows = stmt
      .query_map(
        rusqlite::params![
          self.actor,
          self.action,
          self.resource_type,
          self.resource_name,
          self.project,
          self.from,
          self.to,
          self.search,
          limit,
          offset,
        ],
        RawAuditEvent::from_row,
      )?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(RawAuditEvent::into_event).collect()
  }
}

// ─── Row helpers (run on the connection thread) ──────────────────────────────

fn select_flag(conn: &Connection, project: &str, key: &str) -> Result<Option<RawFlag>> {
  Ok(
    conn
      .query_row(
        &format!("SELECT {FLAG_COLUMNS} FROM flags WHERE project = ?1 AND key = ?2"),
        rusqlite::params![project, key],
        RawFlag::from_row,
      )
      .optional()?,
  )
}

fn high_water(conn: &Connection, project: &str, key: &str) -> Result<Option<Version>> {
  let v: Option<i64> = conn
    .query_row(
      "SELECT last_version FROM flag_versions WHERE project = ?1 AND key = ?2",
      rusqlite::params![project, key],
      |r| r.get(0),
    )
    .optional()?;
  Ok(v.map(decode_version))
}

fn record_high_water(conn: &Connection, project: &str, key: &str, v: Version) -> Result<()> {
  conn.execute(
    "INSERT INTO flag_versions (project, key, last_version) VALUES (?1, ?2, ?3)
     ON CONFLICT (project, key) DO UPDATE SET last_version = MAX(last_version, excluded.last_version)",
    rusqlite::params![project, key, encode_version(v)],
  )?;
  Ok(())
}

fn project_listed(conn: &Connection, project: &str) -> Result<bool> {
  Ok(conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM projects WHERE name = ?1)
         OR EXISTS (SELECT 1 FROM flags WHERE project = ?1)",
    [project],
    |r| r.get(0),
  )?)
}

/// `%term%` with `LIKE` metacharacters escaped; pair with `ESCAPE '\'`.
fn contains_pattern(term: Option<&str>) -> Option<String> {
  term.map(|t| {
    let mut out = String::with_capacity(t.len() + 2);
    out.push('%');
    for c in t.chars() {
      if matches!(c, '%' | '_' | '\\') {
        out.push('\\');
      }
      out.push(c);
    }
    out.push('%');
    out
  })
}

fn select_change_request(conn: &Connection, id: &str) -> Result<Option<ChangeRequest>> {
  conn
    .query_row(
      &format!("SELECT {CHANGE_REQUEST_COLUMNS} FROM change_requests WHERE id = ?1"),
      rusqlite::params![id],
      RawChangeRequest::from_row,
    )
    .optional()?
    .map(RawChangeRequest::into_change_request)
    .transpose()
}

fn require_change_request(conn: &Connection, id: Uuid) -> Result<ChangeRequest> {
  select_change_request(conn, &encode_uuid(id))?
    .ok_or_else(|| CoreError::not_found("change request", id).into())
}

fn select_role(conn: &Connection, id: &str) -> Result<Option<Role>> {
  conn
    .query_row(
      &format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?1"),
      rusqlite::params![id],
      role_from_row,
    )
    .optional()?
    .map(|r| r.into_role())
    .transpose()
}

fn role_name_taken(conn: &Connection, name: &str, except: Option<&str>) -> Result<bool> {
  let found: Option<String> = conn
    .query_row(
      "SELECT id FROM roles WHERE name = ?1",
      rusqlite::params![name],
      |r| r.get(0),
    )
    .optional()?;
  Ok(found.is_some_and(|id| Some(id.as_str()) != except))
}

fn select_user_roles(conn: &Connection, user_id: &str) -> Result<Vec<Role>> {
  let mut stmt = conn.prepare(
    "SELECT r.id, r.name, r.description, r.permissions, r.builtin, r.created_at, r.updated_at
       FROM roles r JOIN user_roles ur ON ur.role_id = r.id
      WHERE ur.user_id = ?1
      ORDER BY r.name",
  )?;
  let rows = stmt
    .query_map(rusqlite::params![user_id], role_from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(|r| r.into_role()).collect()
}

// ─── Flags ───────────────────────────────────────────────────────────────────

impl Backend for SqliteStore {
  type Error = Error;
}

impl FlagStore for SqliteStore {
  async fn get_flag(&self, project: &str, key: &str) -> Result<Option<Flag>> {
    let project = project.to_owned();
    let key = key.to_owned();
    self
      .read(move |conn| select_flag(conn, &project, &key)?.map(RawFlag::into_flag).transpose())
      .await
  }

  async fn create_flag(&self, input: NewFlag) -> Result<Flag> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    self
      .write(move |tx| {
        if select_flag(tx, &input.project, &input.key)?.is_some() {
          return Err(CoreError::already_exists("flag", &input.key).into());
        }
        let version = Version::following(high_water(tx, &input.project, &input.key)?);
        let payload = String::from_utf8_lossy(input.payload.as_bytes()).into_owned();
        tx.execute(
          &format!("INSERT INTO flags ({FLAG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)"),
          rusqlite::params![
            encode_uuid(id),
            input.project,
            input.key,
            payload,
            input.disabled,
            encode_version(version),
            encode_dt(now),
          ],
        )?;
        record_high_water(tx, &input.project, &input.key, version)?;

        Ok(Flag {
          id,
          project: input.project,
          key: input.key,
          payload: input.payload,
          disabled: input.disabled,
          version,
          created_at: now,
          updated_at: now,
        })
      })
      .await
  }

  async fn update_flag(&self, project: &str, key: &str, update: FlagUpdate) -> Result<FlagChange> {
    let project = project.to_owned();
    let key = key.to_owned();
    let now = Utc::now();

    self
      .write(move |tx| {
        let before = select_flag(tx, &project, &key)?
          .ok_or_else(|| CoreError::not_found("flag", &key))?
          .into_flag()?;

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
            if select_flag(tx, &project, &new_key)?.is_some() {
              return Err(CoreError::KeyConflict { key: new_key }.into());
            }
            new_key
          }
          _ => key.clone(),
        };

        let floor = high_water(tx, &project, &target)?.map_or(before.version, |v| v.max(before.version));
        let version = Version::following(Some(floor));
        let payload = String::from_utf8_lossy(update.payload.as_bytes()).into_owned();

        let changed = tx.execute(
          "UPDATE flags SET key = ?1, payload = ?2, disabled = ?3, version = ?4, updated_at = ?5
            WHERE id = ?6 AND version = ?7",
          rusqlite::params![
            target,
            payload,
            update.disabled,
            encode_version(version),
            encode_dt(now),
            encode_uuid(before.id),
            encode_version(before.version),
          ],
        )?;
        if changed != 1 {
          return Err(
            CoreError::VersionConflict {
              key,
              expected: before.version,
              actual: before.version,
            }
            .into(),
          );
        }
        record_high_water(tx, &project, &target, version)?;

        let after = Flag {
          key: target,
          payload: update.payload,
          disabled: update.disabled,
          version,
          updated_at: now,
          ..before.clone()
        };
        Ok(FlagChange { before, after })
      })
      .await
  }

  async fn delete_flag(&self, project: &str, key: &str) -> Result<Flag> {
    let project = project.to_owned();
    let key = key.to_owned();

    self
      .write(move |tx| {
        let flag = select_flag(tx, &project, &key)?
          .ok_or_else(|| CoreError::not_found("flag", &key))?
          .into_flag()?;
        tx.execute(
          "DELETE FROM flags WHERE id = ?1",
          rusqlite::params![encode_uuid(flag.id)],
        )?;
        Ok(flag)
      })
      .await
  }

  async fn list_flags(&self, project: &str, page: &Page) -> Result<Paginated<Flag>> {
    let project = project.to_owned();
    let page = page.clone().normalized();

    self
      .read(move |conn| {
        let search = contains_pattern(page.search.as_deref());
        let total: i64 = conn.query_row(
          "SELECT COUNT(*) FROM flags
            WHERE project = ?1 AND (?2 IS NULL OR key LIKE ?2 ESCAPE '\\')",
          rusqlite::params![project, search],
          |r| r.get(0),
        )?;

        let sort = page.sort_or(&["key", "created_at", "updated_at"], "key");
        let sql = format!(
          "SELECT {FLAG_COLUMNS} FROM flags
            WHERE project = ?1 AND (?2 IS NULL OR key LIKE ?2 ESCAPE '\\')
            ORDER BY {sort} {order}, key ASC
            LIMIT ?3 OFFSET ?4",
          order = page.order.as_sql(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![project, search, page.limit() as i64, page.offset() as i64],
            RawFlag::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let flags = rows.into_iter().map(RawFlag::into_flag).collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(flags, total as u64, &page))
      })
      .await
  }

  async fn list_projects(&self) -> Result<Vec<String>> {
    self
      .read(|conn| {
        let mut stmt = conn.prepare(
          "SELECT name FROM projects UNION SELECT project FROM flags ORDER BY 1",
        )?;
        let projects = stmt
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(projects)
      })
      .await
  }

  async fn create_project(&self, project: &str) -> Result<()> {
    let project = project.to_owned();
    let now = encode_dt(Utc::now());

    self
      .write(move |tx| {
        if project_listed(tx, &project)? {
          return Err(CoreError::already_exists("project", &project).into());
        }
        tx.execute(
          "INSERT INTO projects (name, created_at) VALUES (?1, ?2)",
          rusqlite::params![project, now],
        )?;
        Ok(())
      })
      .await
  }

  async fn delete_project(&self, project: &str) -> Result<Vec<Flag>> {
    let project = project.to_owned();

    self
      .write(move |tx| {
        if !project_listed(tx, &project)? {
          return Err(CoreError::not_found("project", &project).into());
        }
        let mut stmt = tx.prepare(&format!(
          "SELECT {FLAG_COLUMNS} FROM flags WHERE project = ?1 ORDER BY key"
        ))?;
        let rows = stmt
          .query_map([&project], RawFlag::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let flags = rows.into_iter().map(RawFlag::into_flag).collect::<Result<Vec<_>>>()?;

        tx.execute("DELETE FROM flags WHERE project = ?1", [&project])?;
        tx.execute("DELETE FROM projects WHERE name = ?1", [&project])?;
        Ok(flags)
      })
      .await
  }
}

// ─── Change requests ─────────────────────────────────────────────────────────

impl ChangeRequestStore for SqliteStore {
  async fn create_change_request(&self, input: NewChangeRequest) -> Result<ChangeRequest> {
    let now = Utc::now();
    let cr = ChangeRequest {
      id:              Uuid::new_v4(),
      title:           input.title,
      description:     input.description,
      status:          ChangeRequestStatus::Pending,
      author:          input.author,
      project:         input.project,
      flag_key:        input.flag_key,
      resource_type:   rbac::resource::FLAG.to_owned(),
      current:         input.current,
      proposed:        input.proposed,
      reviewer:        None,
      review_decision: None,
      review_comment:  None,
      reviewed_at:     None,
      applied_by:      None,
      applied_at:      None,
      created_at:      now,
      updated_at:      now,
    };

    let id_str       = encode_uuid(cr.id);
    let author_str   = encode_json(&cr.author)?;
    let current_str  = cr.current.as_ref().map(encode_json).transpose()?;
    let proposed_str = encode_json(&cr.proposed)?;
    let now_str      = encode_dt(now);
    let row          = (
      cr.title.clone(),
      cr.description.clone(),
      cr.project.clone(),
      cr.flag_key.clone(),
      cr.resource_type.clone(),
    );

    self
      .write(move |tx| {
        let (title, description, project, flag_key, resource_type) = row;
        tx.execute(
          "INSERT INTO change_requests
             (id, title, description, status, author, project, flag_key, resource_type,
              current_config, proposed_config, created_at, updated_at)
           VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
          rusqlite::params![
            id_str,
            title,
            description,
            author_str,
            project,
            flag_key,
            resource_type,
            current_str,
            proposed_str,
            now_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(cr)
  }

  async fn get_change_request(&self, id: Uuid) -> Result<Option<ChangeRequest>> {
    self
      .read(move |conn| select_change_request(conn, &encode_uuid(id)))
      .await
  }

  async fn list_change_requests(
    &self,
    filter: &ChangeRequestFilter,
  ) -> Result<Paginated<ChangeRequest>> {
    let status = filter.status.map(|s| s.as_str().to_owned());
    let project = filter.project.clone();
    let page = filter.page.clone().normalized();

    self
      .read(move |conn| {
        let search = contains_pattern(page.search.as_deref());
        let where_clause = "(?1 IS NULL OR status = ?1)
            AND (?2 IS NULL OR project = ?2)
            AND (?3 IS NULL OR title LIKE ?3 ESCAPE '\\' OR flag_key LIKE ?3 ESCAPE '\\')";

        let total: i64 = conn.query_row(
          &format!("SELECT COUNT(*) FROM change_requests WHERE {where_clause}"),
          rusqlite::params![status, project, search],
          |r| r.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
          "SELECT {CHANGE_REQUEST_COLUMNS} FROM change_requests WHERE {where_clause}
            ORDER BY created_at DESC, id LIMIT ?4 OFFSET ?5"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![status, project, search, page.limit() as i64, page.offset() as i64],
            RawChangeRequest::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let data = rows
          .into_iter()
          .map(RawChangeRequest::into_change_request)
          .collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(data, total as u64, &page))
      })
      .await
  }

  async fn count_pending(&self) -> Result<u64> {
    self
      .read(|conn| {
        let n: i64 = conn.query_row(
          "SELECT COUNT(*) FROM change_requests WHERE status = 'pending'",
          [],
          |r| r.get(0),
        )?;
        Ok(n as u64)
      })
      .await
  }

  async fn record_review(
    &self,
    id: Uuid,
    review: NewReview,
    next: ChangeRequestStatus,
  ) -> Result<(ChangeRequest, Review)> {
    let now = Utc::now();
    let reviewer_str = encode_json(&review.reviewer)?;

    self
      .write(move |tx| {
        let cr = require_change_request(tx, id)?;
        if cr.status != ChangeRequestStatus::Pending {
          return Err(
            CoreError::InvalidState {
              id,
              status: cr.status,
              operation: Transition::Review(review.decision).name(),
            }
            .into(),
          );
        }

        let entry = Review {
          id:                Uuid::new_v4(),
          change_request_id: id,
          reviewer:          review.reviewer,
          decision:          review.decision,
          comment:           review.comment,
          created_at:        now,
        };
        tx.execute(
          &format!("INSERT INTO change_request_reviews ({REVIEW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
          rusqlite::params![
            encode_uuid(entry.id),
            encode_uuid(id),
            reviewer_str,
            entry.decision.as_str(),
            entry.comment,
            encode_dt(now),
          ],
        )?;

        if entry.decision != ReviewDecision::Comment {
          tx.execute(
            "UPDATE change_requests
                SET status = ?1, reviewer = ?2, review_decision = ?3, review_comment = ?4,
                    reviewed_at = ?5, updated_at = ?5
              WHERE id = ?6 AND status = 'pending'",
            rusqlite::params![
              next.as_str(),
              reviewer_str,
              entry.decision.as_str(),
              entry.comment,
              encode_dt(now),
              encode_uuid(id),
            ],
          )?;
        }

        let cr = require_change_request(tx, id)?;
        Ok((cr, entry))
      })
      .await
  }

  async fn mark_applied(&self, id: Uuid, applied_by: ActorRef) -> Result<ChangeRequest> {
    let now = encode_dt(Utc::now());
    let applied_by = encode_json(&applied_by)?;

    self
      .write(move |tx| {
        let cr = require_change_request(tx, id)?;
        cr.next_status(Transition::Apply)?;
        tx.execute(
          "UPDATE change_requests
              SET status = 'applied', applied_by = ?1, applied_at = ?2, updated_at = ?2
            WHERE id = ?3 AND status = 'approved'",
          rusqlite::params![applied_by, now, encode_uuid(id)],
        )?;
        require_change_request(tx, id)
      })
      .await
  }

  async fn cancel_change_request(&self, id: Uuid) -> Result<ChangeRequest> {
    let now = encode_dt(Utc::now());

    self
      .write(move |tx| {
        let cr = require_change_request(tx, id)?;
        cr.next_status(Transition::Cancel)?;
        tx.execute(
          "UPDATE change_requests SET status = 'cancelled', updated_at = ?1
            WHERE id = ?2 AND status IN ('pending', 'approved')",
          rusqlite::params![now, encode_uuid(id)],
        )?;
        require_change_request(tx, id)
      })
      .await
  }

  async fn list_reviews(&self, id: Uuid) -> Result<Vec<Review>> {
    self
      .read(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {REVIEW_COLUMNS} FROM change_request_reviews
            WHERE change_request_id = ?1 ORDER BY created_at, id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![encode_uuid(id)], RawReview::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawReview::into_review).collect()
      })
      .await
  }
}

// ─── Roles ───────────────────────────────────────────────────────────────────

impl RoleStore for SqliteStore {
  async fn list_roles(&self) -> Result<Vec<Role>> {
    self
      .read(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ROLE_COLUMNS} FROM roles ORDER BY builtin DESC, name"
        ))?;
        let rows = stmt
          .query_map([], role_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|r| r.into_role()).collect()
      })
      .await
  }

  async fn get_role(&self, id: Uuid) -> Result<Option<Role>> {
    self.read(move |conn| select_role(conn, &encode_uuid(id))).await
  }

  async fn create_role(&self, input: NewRole) -> Result<Role> {
    let now = Utc::now();
    let role = Role {
      id:          Uuid::new_v4(),
      name:        input.name,
      description: input.description,
      permissions: input.permissions,
      builtin:     false,
      created_at:  now,
      updated_at:  now,
    };
    let permissions = encode_json(&role.permissions)?;
    let (id, name, description) = (encode_uuid(role.id), role.name.clone(), role.description.clone());

    self
      .write(move |tx| {
        if role_name_taken(tx, &name, None)? {
          return Err(CoreError::already_exists("role", &name).into());
        }
        tx.execute(
          &format!("INSERT INTO roles ({ROLE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)"),
          rusqlite::params![id, name, description, permissions, encode_dt(now)],
        )?;
        Ok(())
      })
      .await?;
    Ok(role)
  }

  async fn update_role(&self, id: Uuid, update: RoleUpdate) -> Result<Role> {
    let now = Utc::now();
    let permissions = update.permissions.as_ref().map(encode_json).transpose()?;

    self
      .write(move |tx| {
        let id_str = encode_uuid(id);
        let role = select_role(tx, &id_str)?.ok_or_else(|| CoreError::not_found("role", id))?;
        if role.builtin {
          return Err(CoreError::BuiltinRole(id).into());
        }
        if let Some(name) = &update.name
          && role_name_taken(tx, name, Some(&id_str))?
        {
          return Err(CoreError::already_exists("role", name).into());
        }
        tx.execute(
          "UPDATE roles SET name = COALESCE(?1, name), description = COALESCE(?2, description),
                  permissions = COALESCE(?3, permissions), updated_at = ?4
            WHERE id = ?5",
          rusqlite::params![update.name, update.description, permissions, encode_dt(now), id_str],
        )?;
        select_role(tx, &id_str)?.ok_or_else(|| CoreError::not_found("role", id).into())
      })
      .await
  }

  async fn delete_role(&self, id: Uuid) -> Result<Role> {
    self
      .write(move |tx| {
        let id_str = encode_uuid(id);
        let role = select_role(tx, &id_str)?.ok_or_else(|| CoreError::not_found("role", id))?;
        if role.builtin {
          return Err(CoreError::BuiltinRole(id).into());
        }
        tx.execute("DELETE FROM user_roles WHERE role_id = ?1", rusqlite::params![id_str])?;
        tx.execute("DELETE FROM roles WHERE id = ?1", rusqlite::params![id_str])?;
        Ok(role)
      })
      .await
  }

  async fn user_roles(&self, user_id: &str) -> Result<Vec<Role>> {
    let user_id = user_id.to_owned();
    self.read(move |conn| select_user_roles(conn, &user_id)).await
  }

  async fn set_user_roles(&self, user_id: &str, role_ids: &[Uuid]) -> Result<Vec<Role>> {
    let user_id = user_id.to_owned();
    let role_ids = role_ids.to_vec();

    self
      .write(move |tx| {
        for id in &role_ids {
          if select_role(tx, &encode_uuid(*id))?.is_none() {
            return Err(CoreError::not_found("role", id).into());
          }
        }
        tx.execute("DELETE FROM user_roles WHERE user_id = ?1", rusqlite::params![user_id])?;
        for id in &role_ids {
          tx.execute(
            "INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
            rusqlite::params![user_id, encode_uuid(*id)],
          )?;
        }
        select_user_roles(tx, &user_id)
      })
      .await
  }

  async fn assigned_users(&self) -> Result<Vec<String>> {
    self
      .read(|conn| {
        let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM user_roles ORDER BY user_id")?;
        let users = stmt
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(users)
      })
      .await
  }
}

// ─── API keys ────────────────────────────────────────────────────────────────

impl ApiKeyStore for SqliteStore {
  async fn create_api_key(&self, input: NewApiKey) -> Result<ApiKey> {
    let key = ApiKey {
      id:           Uuid::new_v4(),
      name:         input.name,
      prefix:       input.prefix,
      tier:         input.tier,
      created_by:   input.created_by,
      created_at:   Utc::now(),
      expires_at:   input.expires_at,
      last_used_at: None,
    };
    let row = (
      encode_uuid(key.id),
      key.name.clone(),
      key.prefix.clone(),
      input.secret_hash,
      key.tier.as_str(),
      key.created_by.clone(),
      encode_dt(key.created_at),
      key.expires_at.map(encode_dt),
    );

    self
      .write(move |tx| {
        let (id, name, prefix, secret_hash, tier, created_by, created_at, expires_at) = row;
        tx.execute(
          &format!("INSERT INTO api_keys ({API_KEY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)"),
          rusqlite::params![id, name, prefix, secret_hash, tier, created_by, created_at, expires_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(key)
  }

  async fn list_api_keys(&self) -> Result<Vec<ApiKey>> {
    self
      .read(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {API_KEY_COLUMNS} FROM api_keys ORDER BY created_at DESC"
        ))?;
        let rows = stmt
          .query_map([], RawApiKey::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
          .into_iter()
          .map(|r| r.into_stored().map(|s| s.key))
          .collect()
      })
      .await
  }

  async fn find_api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<StoredApiKey>> {
    let prefix = prefix.to_owned();
    self
      .read(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE prefix = ?1"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![prefix], RawApiKey::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawApiKey::into_stored).collect()
      })
      .await
  }

  async fn touch_api_key(&self, id: Uuid) -> Result<()> {
    let now = encode_dt(Utc::now());
    self
      .write(move |tx| {
        tx.execute(
          "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
          rusqlite::params![now, encode_uuid(id)],
        )?;
        Ok(())
      })
      .await
  }

  async fn delete_api_key(&self, id: Uuid) -> Result<ApiKey> {
    self
      .write(move |tx| {
        let id_str = encode_uuid(id);
        let key = tx
          .query_row(
            &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = ?1"),
            rusqlite::params![id_str],
            RawApiKey::from_row,
          )
          .optional()?
          .ok_or_else(|| CoreError::not_found("api key", id))?
          .into_stored()?
          .key;
        tx.execute("DELETE FROM api_keys WHERE id = ?1", rusqlite::params![id_str])?;
        Ok(key)
      })
      .await
  }
}

// ─── Audit ───────────────────────────────────────────────────────────────────

impl AuditStore for SqliteStore {
  async fn append_audit_event(&self, event: NewAuditEvent) -> Result<AuditEvent> {
    let stored = AuditEvent {
      id:            Uuid::new_v4(),
      timestamp:     event.timestamp,
      actor:         event.actor,
      action:        event.action,
      resource_type: event.resource_type,
      resource_id:   event.resource_id,
      resource_name: event.resource_name,
      project:       event.project,
      changes:       event.changes,
      metadata:      event.metadata,
    };
    let changes  = stored.changes.as_ref().map(encode_json).transpose()?;
    let metadata = stored.metadata.as_ref().map(encode_json).transpose()?;
    let row      = stored.clone();

    self
      .write(move |tx| {
        tx.execute(
          &format!(
            "INSERT INTO audit_events ({AUDIT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
          ),
          rusqlite::params![
            encode_uuid(row.id),
            encode_dt(row.timestamp),
            row.actor.kind.as_str(),
            row.actor.id,
            row.actor.email,
            row.actor.name,
            row.action,
            row.resource_type,
            row.resource_id,
            row.resource_name,
            row.project,
            changes,
            metadata,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(stored)
  }

  async fn list_audit_events(&self, filter: &AuditFilter) -> Result<Paginated<AuditEvent>> {
    let page = filter.page.clone().normalized();
    let query = AuditQuery::new(filter, &page);

    self
      .read(move |conn| {
        let total = query.count(conn)?;
        let events = query.select(conn, page.limit() as i64, page.offset() as i64)?;
        Ok(Paginated::new(events, total, &page))
      })
      .await
  }

  async fn export_audit_events(&self, filter: &AuditFilter, limit: usize) -> Result<Vec<AuditEvent>> {
    let page = filter.page.clone().normalized();
    let query = AuditQuery::new(filter, &page);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    self.read(move |conn| query.select(conn, limit, 0)).await
  }
}
