//! Core types and trait definitions for the flaggate control plane.
//!
//! This crate is deliberately free of HTTP and database dependencies. It owns
//! the versioned flag record, the actor and role model, the change-request
//! state machine, and the storage traits every backend implements.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod actor;
pub mod audit;
pub mod change_request;
pub mod error;
pub mod flag;
pub mod page;
pub mod rbac;
pub mod store;
pub mod validate;

pub use error::{Error, Result};
