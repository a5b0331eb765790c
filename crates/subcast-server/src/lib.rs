//! HTTP ingress for the subscription dispatcher.
//!
//! Exposes an axum [`Router`] that feeds `(topic, payload)` events into a
//! [`Dispatcher`], plus the [`HttpTransport`] used to publish results.

pub mod error;
pub mod events;
pub mod transport;

pub use error::{Error, Result};
pub use transport::HttpTransport;

use std::{collections::HashSet, path::PathBuf, sync::Arc, time::Duration};

use axum::{
  Json, Router,
  extract::State,
  routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use subcast_core::{
  Dispatcher,
  engine::Engine,
  outcome::Outcome,
  registry::Registry,
  retry::{DEFAULT_POLICY_MAX, RetryPolicy},
  topics::Topics,
  transport::Transport,
};
use tower_http::trace::TraceLayer;

use events::EventTemplate;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `SUBCAST__*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                String,
  pub port:                u16,
  pub store_path:          PathBuf,
  /// Webhook that accepts `{topic, payload, qos}` publishes.
  pub publish_url:         String,
  pub topics:              Topics,
  pub ttl_secs:            u64,
  pub retry_max:           u32,
  pub purge_interval_secs: u64,
  /// Default execution context, merged under each subscription's own.
  pub context:             Map<String, Value>,
  pub events:              Vec<EventTemplate>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                "127.0.0.1".to_owned(),
      port:                8080,
      store_path:          PathBuf::from("subcast.db"),
      publish_url:         "http://127.0.0.1:8081/publish".to_owned(),
      topics:              Topics::default(),
      ttl_secs:            12 * 60 * 60,
      retry_max:           DEFAULT_POLICY_MAX,
      purge_interval_secs: 300,
      context:             Map::new(),
      events:              Vec::new(),
    }
  }
}

impl ServerConfig {
  pub fn ttl(&self) -> Duration { Duration::from_secs(self.ttl_secs) }

  pub fn purge_interval(&self) -> Duration { Duration::from_secs(self.purge_interval_secs.max(1)) }

  pub fn retry_policy(&self) -> RetryPolicy { RetryPolicy::max(self.retry_max) }

  /// Root field names the projection engine should accept.
  pub fn fields(&self) -> impl Iterator<Item = &str> { self.events.iter().map(|e| e.name.as_str()) }

  pub fn events(&self) -> subcast_core::events::Events { events::events(&self.events) }

  /// Reject settings the dispatcher cannot run with.
  pub fn check(&self) -> Result<()> {
    if self.events.is_empty() {
      return Err(Error::Config("no [[events]] configured".into()));
    }
    let mut seen = HashSet::new();
    for event in &self.events {
      if event.name.is_empty() {
        return Err(Error::Config("event with an empty name".into()));
      }
      if !seen.insert(event.name.as_str()) {
        return Err(Error::Config(format!("event {:?} is configured twice", event.name)));
      }
    }
    if !self.publish_url.starts_with("http://") && !self.publish_url.starts_with("https://") {
      return Err(Error::Config(format!("publish_url {:?} is not an http(s) url", self.publish_url)));
    }
    Ok(())
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<R, T, G> {
  pub dispatcher: Arc<Dispatcher<R, T, G>>,
}

impl<R, T, G> Clone for AppState<R, T, G> {
  fn clone(&self) -> Self { Self { dispatcher: Arc::clone(&self.dispatcher) } }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Body of `POST /events`.
#[derive(Debug, Deserialize)]
pub struct EventRequest {
  pub topic:   String,
  #[serde(default)]
  pub payload: Value,
}

/// Build an axum [`Router`] for the ingress server.
pub fn router<R, T, G>(state: AppState<R, T, G>) -> Router
where
  R: Registry + 'static,
  T: Transport + 'static,
  G: Engine + 'static,
{
  Router::new()
    .route("/events", post(post_event::<R, T, G>))
    .route("/health", get(health))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn post_event<R, T, G>(
  State(state): State<AppState<R, T, G>>,
  Json(request): Json<EventRequest>,
) -> Result<Json<Outcome>>
where
  R: Registry + 'static,
  T: Transport + 'static,
  G: Engine + 'static,
{
  let outcome = state
    .dispatcher
    .handle(&request.topic, request.payload)
    .await?;
  Ok(Json(outcome))
}

async fn health() -> &'static str { "ok" }

// ─── Integration tests ────────────────────────────────────────────────────────
