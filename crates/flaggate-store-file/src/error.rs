//! Error type for `flaggate-store-file`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A domain failure (not found, conflict, ...).
  #[error(transparent)]
  Core(#[from] flaggate_core::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("failed to replace project file: {0}")]
  Persist(#[from] tempfile::PersistError),

  #[error("file worker failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for flaggate_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Core(inner) => inner,
      other => flaggate_core::Error::backend(other),
    }
  }
}
