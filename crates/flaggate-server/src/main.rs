//! flaggate server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) plus `FLAGGATE_*`
//! environment variables, opens the configured stores and serves the JSON
//! API over HTTP.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for a `[[users]]` entry:
//!
//! ```text
//! cargo run -p flaggate-server -- --hash-password
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use flaggate_api::{
  FlagService,
  refresh::{HttpRefreshTarget, RefreshQueue},
};
use flaggate_core::store::FlagStore;
use flaggate_server::{ServerConfig, config::BackendKind};
use flaggate_store_file::FileStore;
use flaggate_store_sqlite::SqliteStore;
use rand_core::OsRng;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "flaggate feature-flag control plane")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("FLAGGATE").separator("__"))
    .build()
    .context("failed to read config file")?;
  let cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  if !cfg.auth_enabled {
    tracing::warn!("authentication is disabled; every request runs as the system actor");
  }

  let db_path = expand_tilde(&cfg.storage.database_path);
  let governance = Arc::new(
    SqliteStore::open(&db_path)
      .await
      .with_context(|| format!("failed to open database at {db_path:?}"))?,
  );

  flaggate_server::bootstrap_admins(governance.as_ref(), &cfg.users)
    .await
    .context("failed to grant configured admin roles")?;

  match cfg.storage.backend {
    BackendKind::Sqlite => serve(governance.clone(), governance, cfg).await,
    BackendKind::File => {
      let dir = expand_tilde(&cfg.storage.flags_dir);
      let flags = FileStore::open(&dir)
        .await
        .with_context(|| format!("failed to open flag directory {dir:?}"))?;
      serve(Arc::new(flags), governance, cfg).await
    }
  }
}

async fn serve<F>(flags: Arc<F>, governance: Arc<SqliteStore>, cfg: ServerConfig) -> anyhow::Result<()>
where
  F: FlagStore + 'static,
{
  let mut service = FlagService::new(flags, governance, cfg.service_settings())
    .with_users(cfg.user_profiles());

  if let Some(url) = &cfg.refresh.url {
    let target = HttpRefreshTarget::new(url, cfg.refresh.bearer_token.clone())
      .context("failed to build refresh client")?;
    tracing::info!(endpoint = target.endpoint(), "refresh notifications enabled");
    service = service.with_refresh(RefreshQueue::spawn(target, cfg.refresh.settings()));
  }

  let service = Arc::new(service);
  let app = flaggate_server::router(service.clone(), cfg.users.clone());
  let address = cfg.address();

  tracing::info!(
    backend = ?cfg.storage.backend,
    approvals = cfg.require_approvals,
    "Listening on http://{address}"
  );
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  service.audit_logger().flush().await;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::warn!(error = %e, "failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  tracing::info!("shutting down");
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  let stdin = io::stdin();
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  stdin.lock().read_line(&mut line)?;
  Ok(
    line
      .trim_end_matches('\n')
      .trim_end_matches('\r')
      .to_string(),
  )
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
