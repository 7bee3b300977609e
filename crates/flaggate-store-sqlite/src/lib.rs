//! SQLite backend for the flaggate control plane.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Implements every store trait in
//! [`flaggate_core::store`]; each mutation runs in one `BEGIN IMMEDIATE`
//! transaction.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
