//! subcast server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! SQLite subscription registry, and accepts events over HTTP. Results are
//! published to the configured webhook.
//!
//! Any setting can be overridden from the environment, e.g.
//! `SUBCAST__PORT=9000` or `SUBCAST__TOPICS__INBOUND=events/inbound`.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use chrono::Utc;
use clap::Parser;
use subcast_core::{Dispatcher, projection::ProjectionEngine};
use subcast_server::{AppState, HttpTransport, ServerConfig};
use subcast_store_sqlite::SqliteRegistry;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "GraphQL subscription dispatcher")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("SUBCAST")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;
  server_cfg.check().context("invalid configuration")?;

  // Expand `~` in store path.
  let store_path = expand_tilde(&server_cfg.store_path);

  let registry = SqliteRegistry::open(&store_path)
    .await
    .with_context(|| format!("failed to open registry at {store_path:?}"))?;

  let transport = HttpTransport::new(server_cfg.publish_url.clone())
    .context("failed to build publish client")?;

  let engine = ProjectionEngine::new(server_cfg.fields());

  let dispatcher = Dispatcher::builder(registry.clone(), transport, engine)
    .events(server_cfg.events())
    .topics(server_cfg.topics.clone())
    .retry_policy(server_cfg.retry_policy())
    .context_value(server_cfg.context.clone())
    .ttl(server_cfg.ttl())
    .build()
    .context("failed to build dispatcher")?;

  tokio::spawn(purge_expired(registry, server_cfg.purge_interval()));

  let state = AppState { dispatcher: Arc::new(dispatcher) };
  let app = subcast_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!(publish_url = %server_cfg.publish_url, "Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Periodically drop records past their ttl. Lookups already skip them.
async fn purge_expired(registry: SqliteRegistry, every: std::time::Duration) {
  let mut interval = tokio::time::interval(every);
  loop {
    interval.tick().await;
    match registry.purge_expired(Utc::now()).await {
      Ok(0) => {}
      Ok(removed) => tracing::info!(removed, "purged expired subscriptions"),
      Err(error) => tracing::warn!(%error, "purge failed"),
    }
  }
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
