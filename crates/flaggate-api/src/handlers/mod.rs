//! axum handlers. Each one resolves the [`CurrentActor`](crate::actor::CurrentActor),
//! calls into [`FlagService`](crate::service::FlagService) and shapes the
//! response.

pub mod admin;
pub mod api_keys;
pub mod audit;
pub mod change_requests;
pub mod flags;
pub mod roles;

use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, Path, Query, State};

use crate::{error::ApiError, service::FlagService};

/// Shared handler state.
pub type AppState<F, G> = State<Arc<FlagService<F, G>>>;

/// `axum::Json` with `{error, code}` rejections.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// `axum::extract::Query` with `{error, code}` rejections.
#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);

/// `axum::extract::Path` with `{error, code}` rejections.
#[derive(Debug, FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct PathParams<T>(pub T);
