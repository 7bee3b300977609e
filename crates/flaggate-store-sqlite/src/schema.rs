//! SQL schema for the flaggate SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS flags (
    id          TEXT PRIMARY KEY,
    project     TEXT NOT NULL,
    key         TEXT NOT NULL,
    payload     TEXT NOT NULL,      -- compact JSON, opaque to the store
    disabled    INTEGER NOT NULL DEFAULT 0,
    version     INTEGER NOT NULL,
    created_at  TEXT NOT NULL,      -- RFC 3339 UTC, microseconds
    updated_at  TEXT NOT NULL,
    UNIQUE (project, key)
);

-- Projects declared explicitly. A project that holds flags is listed even
-- without a row here.
CREATE TABLE IF NOT EXISTS projects (
    name        TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL
);

-- Highest version ever issued per key. Survives deletes so a re-created
-- key never reuses a version.
CREATE TABLE IF NOT EXISTS flag_versions (
    project      TEXT NOT NULL,
    key          TEXT NOT NULL,
    last_version INTEGER NOT NULL,
    PRIMARY KEY (project, key)
);

CREATE TABLE IF NOT EXISTS roles (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    description TEXT,
    permissions TEXT NOT NULL DEFAULT '[]',   -- JSON [{resource, action}]
    builtin     INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_roles (
    user_id TEXT NOT NULL,
    role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, role_id)
);

CREATE TABLE IF NOT EXISTS api_keys (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    prefix       TEXT NOT NULL,
    secret_hash  TEXT NOT NULL,    -- argon2 PHC string
    tier         TEXT NOT NULL,    -- 'read' | 'write' | 'admin'
    created_by   TEXT,
    created_at   TEXT NOT NULL,
    expires_at   TEXT,
    last_used_at TEXT
);

CREATE TABLE IF NOT EXISTS change_requests (
    id              TEXT PRIMARY KEY,
    title           TEXT NOT NULL,
    description     TEXT,
    status          TEXT NOT NULL,   -- 'pending' | 'approved' | 'rejected' | 'applied' | 'cancelled'
    author          TEXT NOT NULL,   -- JSON ActorRef
    project         TEXT NOT NULL,
    flag_key        TEXT NOT NULL,
    resource_type   TEXT NOT NULL DEFAULT 'flag',
    current_config  TEXT,            -- JSON FlagSnapshot; never updated
    proposed_config TEXT NOT NULL,   -- JSON ProposedFlag
    reviewer        TEXT,
    review_decision TEXT,
    review_comment  TEXT,
    reviewed_at     TEXT,
    applied_by      TEXT,
    applied_at      TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS change_request_reviews (
    id                TEXT PRIMARY KEY,
    change_request_id TEXT NOT NULL REFERENCES change_requests(id),
    reviewer          TEXT NOT NULL,
    decision          TEXT NOT NULL,
    comment           TEXT,
    created_at        TEXT NOT NULL
);

-- Strictly append-only.
CREATE TABLE IF NOT EXISTS audit_events (
    id            TEXT PRIMARY KEY,
    timestamp     TEXT NOT NULL,
    actor_kind    TEXT NOT NULL,
    actor_id      TEXT,
    actor_email   TEXT,
    actor_name    TEXT,
    action        TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id   TEXT,
    resource_name TEXT,
    project       TEXT,
    changes       TEXT,
    metadata      TEXT
);

CREATE INDEX IF NOT EXISTS change_requests_status_idx ON change_requests(status);
CREATE INDEX IF NOT EXISTS reviews_request_idx        ON change_request_reviews(change_request_id);
CREATE INDEX IF NOT EXISTS api_keys_prefix_idx        ON api_keys(prefix);
CREATE INDEX IF NOT EXISTS audit_timestamp_idx        ON audit_events(timestamp);
CREATE INDEX IF NOT EXISTS audit_resource_idx         ON audit_events(resource_type, resource_id);

PRAGMA user_version = 1;
";
