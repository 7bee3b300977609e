//! Router tests: requests go through `api_router` with the actor injected as
//! a request extension, the way the server's auth layer does it.

use std::sync::Arc;

use axum::{
  body::Body,
  http::{Request, StatusCode, header},
  response::Response,
};
use flaggate_core::{actor::Actor, store::RoleStore};
use flaggate_store_sqlite::SqliteStore;
use serde_json::{Value, json};
use tower::ServiceExt as _;

use super::*;

const CONFIG: &str = r#"{"variations":{"on":true,"off":false},"defaultRule":{"variation":"off"}}"#;

fn user(id: &str) -> Actor {
  Actor::User {
    id:    id.into(),
    email: None,
    name:  None,
  }
}

async fn app(require_approvals: bool) -> Router {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let roles = store.list_roles().await.unwrap();
  for (user_id, role) in [("admin", "admin"), ("ed", "editor"), ("val", "viewer")] {
    let id = roles.iter().find(|r| r.name == role).unwrap().id;
    store.set_user_roles(user_id, &[id]).await.unwrap();
  }
  let service = FlagService::new(store.clone(), store, ServiceSettings {
    require_approvals,
    ..ServiceSettings::default()
  });
  api_router(Arc::new(service))
}

async fn oneshot_raw(
  app: &Router,
  actor: Option<&Actor>,
  method: &str,
  uri: &str,
  body: Option<Value>,
) -> Response {
  let mut builder = Request::builder().method(method).uri(uri);
  if let Some(actor) = actor {
    builder = builder.extension(actor.clone());
  }
  let req = match body {
    Some(v) => builder
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(v.to_string()))
      .unwrap(),
    None => builder.body(Body::empty()).unwrap(),
  };
  app.clone().oneshot(req).await.unwrap()
}

async fn json_of(res: Response) -> Value {
  let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
  if bytes.is_empty() {
    return Value::Null;
  }
  serde_json::from_slice(&bytes).unwrap()
}

async fn call(
  app: &Router,
  actor: &Actor,
  method: &str,
  uri: &str,
  body: Option<Value>,
) -> (StatusCode, Value) {
  let res = oneshot_raw(app, Some(actor), method, uri, body).await;
  let status = res.status();
  (status, json_of(res).await)
}

fn config() -> Value { serde_json::from_str(CONFIG).unwrap() }

async fn seed(app: &Router, key: &str) {
  let (status, _) = call(
    app,
    &user("admin"),
    "POST",
    &format!("/projects/web/flags/{key}"),
    Some(json!({ "payload": config() })),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
}

// ─── Edge ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_needs_no_actor() {
  let app = app(false).await;
  let res = oneshot_raw(&app, None, "GET", "/health", None).await;
  assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_actor_is_401() {
  let app = app(false).await;
  let res = oneshot_raw(&app, None, "GET", "/projects", None).await;
  assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
  assert_eq!(json_of(res).await["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn malformed_body_uses_error_shape() {
  let app = app(false).await;
  let req = Request::builder()
    .method("POST")
    .uri("/projects/web/flags/a")
    .extension(user("admin"))
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from("{not json"))
    .unwrap();
  let res = app.oneshot(req).await.unwrap();
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);
  assert_eq!(json_of(res).await["code"], "VALIDATION_ERROR");
}

// ─── Flags ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_get_with_etag() {
  let app = app(false).await;
  let (status, created) = call(
    &app,
    &user("ed"),
    "POST",
    "/projects/web/flags/checkout-v2",
    Some(json!({ "payload": config() })),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(created["version"], 1);
  assert_eq!(created["payload"], config());

  let res = oneshot_raw(&app, Some(&user("val")), "GET", "/projects/web/flags/checkout-v2", None).await;
  assert_eq!(res.status(), StatusCode::OK);
  let etag = res.headers()[header::ETAG].to_str().unwrap().to_owned();
  let digest = flaggate_core::flag::Payload::parse(CONFIG.as_bytes()).unwrap().digest();
  assert_eq!(etag, format!("\"{digest}\""));

  let (_, projects) = call(&app, &user("val"), "GET", "/projects", None).await;
  assert_eq!(projects, json!(["web"]));
}

#[tokio::test]
async fn invalid_configuration_is_400_with_details() {
  let app = app(false).await;
  let (status, body) = call(
    &app,
    &user("ed"),
    "POST",
    "/projects/web/flags/broken",
    Some(json!({ "payload": { "variations": {} } })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["code"], "VALIDATION_ERROR");
  assert!(body["details"].is_array());
}

#[tokio::test]
async fn stale_version_is_409() {
  let app = app(false).await;
  seed(&app, "a").await;
  let update = json!({ "payload": config(), "disabled": true, "version": 1 });

  let (status, body) =
    call(&app, &user("ed"), "PUT", "/projects/web/flags/a", Some(update.clone())).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["version"], 2);

  let (status, body) = call(&app, &user("ed"), "PUT", "/projects/web/flags/a", Some(update)).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["code"], "VERSION_CONFLICT");
}

#[tokio::test]
async fn forbidden_body_names_resource_and_action() {
  let app = app(false).await;
  seed(&app, "a").await;
  let (status, body) = call(&app, &user("val"), "DELETE", "/projects/web/flags/a", None).await;
  assert_eq!(status, StatusCode::FORBIDDEN);
  assert_eq!(body["code"], "FORBIDDEN");
  assert_eq!(body["resource"], "flag");
  assert_eq!(body["action"], "delete");
}

#[tokio::test]
async fn delete_is_204_then_404() {
  let app = app(false).await;
  seed(&app, "a").await;
  let (status, _) = call(&app, &user("ed"), "DELETE", "/projects/web/flags/a", None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  let (status, body) = call(&app, &user("ed"), "GET", "/projects/web/flags/a", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn clone_into_taken_key_is_409() {
  let app = app(false).await;
  seed(&app, "a").await;
  seed(&app, "b").await;
  let (status, body) = call(
    &app,
    &user("ed"),
    "POST",
    "/projects/web/flags/a/clone",
    Some(json!({ "newKey": "b" })),
  )
  .await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn bulk_toggle_reports_partial_results() {
  let app = app(false).await;
  seed(&app, "a").await;
  seed(&app, "b").await;

  let (status, body) = call(
    &app,
    &user("ed"),
    "POST",
    "/projects/web/flags/bulk/toggle",
    Some(json!({ "keys": ["a", "b", "missing"], "disabled": true })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["total"], 2);
  assert_eq!(body["results"].as_array().unwrap().len(), 2);
  assert_eq!(body["results"][0], json!({ "key": "a", "status": "updated" }));
  let errors = body["errors"].as_array().unwrap();
  assert_eq!(errors.len(), 1);
  assert!(errors[0].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn raw_export_skips_disabled_flags() {
  let app = app(false).await;
  seed(&app, "on").await;
  seed(&app, "off").await;
  call(
    &app,
    &user("ed"),
    "PUT",
    "/projects/web/flags/off",
    Some(json!({ "payload": config(), "disabled": true })),
  )
  .await;

  let (status, body) = call(&app, &user("val"), "GET", "/flags/raw/web", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "on": config() }));
}

// ─── Approvals ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn gated_update_round_trip() {
  let app = app(true).await;
  seed(&app, "checkout-v2").await;
  let proposed = json!({
    "variations": {"on": true, "off": false},
    "defaultRule": {"variation": "on"}
  });

  let (status, body) = call(
    &app,
    &user("ed"),
    "PUT",
    "/projects/web/flags/checkout-v2",
    Some(json!({ "payload": proposed, "version": 1 })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["requiresApproval"], true);
  let id = body["changeRequestId"].as_str().unwrap().to_owned();

  let (_, live) = call(&app, &user("ed"), "GET", "/projects/web/flags/checkout-v2", None).await;
  assert_eq!(live["payload"], config());
  assert_eq!(live["version"], 1);

  let (_, count) = call(&app, &user("ed"), "GET", "/change-requests/count", None).await;
  assert_eq!(count["count"], 1);

  let (status, body) = call(
    &app,
    &user("admin"),
    "POST",
    &format!("/change-requests/{id}/review"),
    Some(json!({ "decision": "approve" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "approved");

  let (status, body) =
    call(&app, &user("admin"), "POST", &format!("/change-requests/{id}/apply"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "applied");

  let (_, live) = call(&app, &user("ed"), "GET", "/projects/web/flags/checkout-v2", None).await;
  assert_eq!(live["payload"], proposed);
  assert_eq!(live["version"], 2);

  let (status, body) =
    call(&app, &user("admin"), "POST", &format!("/change-requests/{id}/apply"), None).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["code"], "INVALID_STATE");
}

#[tokio::test]
async fn change_requests_filter_by_status() {
  let app = app(true).await;
  seed(&app, "a").await;
  call(
    &app,
    &user("ed"),
    "POST",
    "/change-requests",
    Some(json!({ "project": "web", "flagKey": "a", "payload": config(), "disabled": true })),
  )
  .await;

  let (status, body) =
    call(&app, &user("ed"), "GET", "/change-requests?status=pending", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["total"], 1);
  assert_eq!(body["data"][0]["title"], "Update a");

  let (_, body) = call(&app, &user("ed"), "GET", "/change-requests?status=applied", None).await;
  assert_eq!(body["total"], 0);

  let (status, _) = call(&app, &user("ed"), "GET", "/change-requests?status=bogus", None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ─── Access ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn builtin_role_delete_is_refused() {
  let app = app(false).await;
  let (_, roles) = call(&app, &user("admin"), "GET", "/roles", None).await;
  let viewer = roles
    .as_array()
    .unwrap()
    .iter()
    .find(|r| r["name"] == "viewer")
    .unwrap()["id"]
    .as_str()
    .unwrap()
    .to_owned();

  let (status, body) = call(&app, &user("admin"), "DELETE", &format!("/roles/{viewer}"), None).await;
  assert_eq!(status, StatusCode::FORBIDDEN);
  assert_eq!(body["code"], "BUILTIN_ROLE");
}

#[tokio::test]
async fn api_key_secret_is_shown_once() {
  let app = app(false).await;
  let (status, issued) = call(
    &app,
    &user("admin"),
    "POST",
    "/api-keys",
    Some(json!({ "name": "ci", "tier": "read" })),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  assert!(issued["secret"].as_str().unwrap().starts_with("fg_"));

  let (_, keys) = call(&app, &user("admin"), "GET", "/api-keys", None).await;
  assert_eq!(keys.as_array().unwrap().len(), 1);
  assert!(keys[0].get("secret").is_none());

  let id = issued["id"].as_str().unwrap();
  let (status, _) = call(&app, &user("admin"), "DELETE", &format!("/api-keys/{id}"), None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn project_routes() {
  let app = app(false).await;
  let admin = user("admin");

  let (status, body) = call(&app, &admin, "POST", "/projects/mobile", None).await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(body, json!({ "project": "mobile", "status": "created" }));
  let (status, body) = call(&app, &admin, "POST", "/projects/mobile", None).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["code"], "CONFLICT");

  seed(&app, "a").await;
  let (status, body) = call(&app, &user("val"), "GET", "/projects/web", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["project"], "web");
  assert_eq!(body["flags"][0]["key"], "a");

  let (status, _) = call(&app, &user("val"), "DELETE", "/projects/web", None).await;
  assert_eq!(status, StatusCode::FORBIDDEN);
  let (status, _) = call(&app, &admin, "DELETE", "/projects/web", None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  let (status, _) = call(&app, &admin, "GET", "/projects/web/flags/a", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  let (status, _) = call(&app, &admin, "GET", "/projects/web", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  let (_, body) = call(&app, &admin, "GET", "/projects", None).await;
  assert_eq!(body, json!(["mobile"]));
}

// ─── Audit and admin ──────────────────────────────────────────────────────────

#[tokio::test]
async fn flag_audit_history_route() {
  let app = app(false).await;
  seed(&app, "a").await;
  seed(&app, "b").await;

  let mut history = Value::Null;
  for _ in 0..50 {
    let (status, body) = call(&app, &user("ed"), "GET", "/projects/web/flags/a/audit", None).await;
    assert_eq!(status, StatusCode::OK);
    if body["total"] == 1 {
      history = body;
      break;
    }
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
  }
  assert_eq!(history["data"][0]["action"], "flag.created");
  assert_eq!(history["data"][0]["resourceName"], "a");
}

#[tokio::test]
async fn audit_export_as_csv() {
  let app = app(false).await;
  seed(&app, "a").await;

  // Writes are queued; poll until the event lands.
  let mut listed = Value::Null;
  for _ in 0..50 {
    let (_, body) = call(&app, &user("admin"), "GET", "/audit?action=flag.created", None).await;
    if body["total"] == 1 {
      listed = body;
      break;
    }
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
  }
  assert_eq!(listed["data"][0]["resourceName"], "a");

  let res = oneshot_raw(&app, Some(&user("admin")), "GET", "/audit/export?format=csv", None).await;
  assert_eq!(res.status(), StatusCode::OK);
  assert_eq!(
    res.headers()[header::CONTENT_DISPOSITION],
    "attachment; filename=audit-events.csv"
  );
  let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
  let csv = String::from_utf8(bytes.to_vec()).unwrap();
  assert!(csv.starts_with("Timestamp,Actor,Actor Type,Action"));
  assert!(csv.contains(",flag.created,flag,"));

  let (status, _) = call(&app, &user("admin"), "GET", "/audit/export?format=xml", None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn manual_refresh_without_target_is_502() {
  let app = app(false).await;
  let (status, body) = call(&app, &user("admin"), "POST", "/admin/refresh", None).await;
  assert_eq!(status, StatusCode::BAD_GATEWAY);
  assert_eq!(body["code"], "UPSTREAM_UNAVAILABLE");

  let (status, _) = call(&app, &user("ed"), "POST", "/admin/refresh", None).await;
  assert_eq!(status, StatusCode::FORBIDDEN);
}
