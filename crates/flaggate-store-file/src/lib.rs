//! Flat-file backend for the flaggate flag store.
//!
//! Each project lives in one JSON document, `{dir}/{project}.json`. Every
//! operation runs as a single read → modify → write critical section under
//! that project's exclusive lock; writes land in a temp file in the same
//! directory and are renamed over the original, so readers only ever see a
//! complete document.
//!
//! Only [`flaggate_core::store::FlagStore`] is implemented. Deployments on
//! this backend keep change requests, roles and audit events in a
//! `flaggate-store-sqlite` database.

mod doc;
mod locks;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use locks::ProjectLocks;
pub use store::FileStore;

#[cfg(test)]
mod tests;
