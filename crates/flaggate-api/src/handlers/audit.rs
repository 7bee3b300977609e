//! Handlers for `/audit` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET` | `/audit` | `?actor&action&resourceType&resourceName&project&from&to&search&sort&order&page&pageSize` |
//! | `GET` | `/audit/export` | Same filters plus `format=csv\|json`; newest first, capped |
//! | `GET` | `/projects/{project}/flags/{key}/audit` | One flag's history; paging params only |

use axum::{
  Json,
  http::header,
  response::{IntoResponse, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};
use flaggate_core::{
  audit::{AuditEvent, AuditFilter},
  page::{DEFAULT_PAGE_SIZE, Page, Paginated, SortOrder},
  store::{FlagStore, GovernanceStore},
};
use serde::Deserialize;

use super::{AppState, PathParams, QueryParams};
use crate::{actor::CurrentActor, error::ApiError};

// ─── Query ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditParams {
  pub actor:         Option<String>,
  pub action:        Option<String>,
  pub resource_type: Option<String>,
  pub resource_name: Option<String>,
  pub project:       Option<String>,
  pub from:          Option<DateTime<Utc>>,
  pub to:            Option<DateTime<Utc>>,
  pub search:        Option<String>,
  pub sort:          Option<String>,
  pub order:         Option<SortOrder>,
  pub page:          Option<u32>,
  pub page_size:     Option<u32>,
  /// Export only.
  pub format:        Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> { s.filter(|s| !s.trim().is_empty()) }

impl AuditParams {
  fn filter(self) -> AuditFilter {
    AuditFilter {
      actor:         non_empty(self.actor),
      action:        non_empty(self.action),
      resource_type: non_empty(self.resource_type),
      resource_name: non_empty(self.resource_name),
      project:       non_empty(self.project),
      from:          self.from,
      to:            self.to,
      page:          Page {
        page:      self.page.unwrap_or(1),
        page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        sort:      self.sort,
        order:     self.order.unwrap_or(SortOrder::Desc),
        search:    self.search,
      }
      .normalized(),
    }
  }
}

// ─── Handlers ─────────────────────────────────────────────────────────────────

/// `GET /audit`
pub async fn list<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  QueryParams(params): QueryParams<AuditParams>,
) -> Result<Json<Paginated<AuditEvent>>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  Ok(Json(state.list_audit(&actor, &params.filter()).await?))
}

/// `GET /projects/{project}/flags/{key}/audit`
pub async fn flag_history<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  PathParams((project, key)): PathParams<(String, String)>,
  QueryParams(params): QueryParams<AuditParams>,
) -> Result<Json<Paginated<AuditEvent>>, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  let page = params.filter().page;
  Ok(Json(state.flag_audit(&actor, &project, &key, page).await?))
}

/// `GET /audit/export?format=csv|json`
pub async fn export<F, G>(
  state: AppState<F, G>,
  CurrentActor(actor): CurrentActor,
  QueryParams(mut params): QueryParams<AuditParams>,
) -> Result<Response, ApiError>
where
  F: FlagStore + 'static,
  G: GovernanceStore + 'static,
{
  let format = params.format.take().unwrap_or_else(|| "csv".to_owned());
  if format != "csv" && format != "json" {
    return Err(ApiError::BadRequest(format!("unsupported export format: {format}")));
  }

  let events = state.export_audit(&actor, &params.filter()).await?;
  let res = if format == "csv" {
    (
      [
        (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
        (header::CONTENT_DISPOSITION, "attachment; filename=audit-events.csv"),
      ],
      to_csv(&events),
    )
      .into_response()
  } else {
    (
      [(header::CONTENT_DISPOSITION, "attachment; filename=audit-events.json")],
      Json(events),
    )
      .into_response()
  };
  Ok(res)
}

// ─── CSV ──────────────────────────────────────────────────────────────────────

const CSV_HEADER: [&str; 8] = [
  "Timestamp",
  "Actor",
  "Actor Type",
  "Action",
  "Resource Type",
  "Resource ID",
  "Resource Name",
  "Project",
];

/// RFC 4180 field: quoted when it holds a comma, quote or line break.
fn csv_field(out: &mut String, value: &str) {
  if value.contains([',', '"', '\n', '\r']) {
    out.push('"');
    out.push_str(&value.replace('"', "\"\""));
    out.push('"');
  } else {
    out.push_str(value);
  }
}

fn csv_row<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
  for (i, field) in fields.into_iter().enumerate() {
    if i > 0 {
      out.push(',');
    }
    csv_field(out, field);
  }
  out.push_str("\r\n");
}

pub fn to_csv(events: &[AuditEvent]) -> String {
  let mut out = String::new();
  csv_row(&mut out, CSV_HEADER);
  for e in events {
    let timestamp = e.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
    csv_row(&mut out, [
      timestamp.as_str(),
      e.actor.label(),
      e.actor.kind.as_str(),
      e.action.as_str(),
      e.resource_type.as_str(),
      e.resource_id.as_deref().unwrap_or(""),
      e.resource_name.as_deref().unwrap_or(""),
      e.project.as_deref().unwrap_or(""),
    ]);
  }
  out
}
