//! Error types for `subcast-core`.
//!
//! Every failure that leaves the dispatcher is wrapped exactly once in
//! [`Error::Scoped`], which carries an [`ErrorContext`] naming the phase that
//! failed and the identifiers involved. Callers branch on
//! [`ErrorContext::scope`] rather than on message text.

use std::{fmt, time::Duration};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::{engine::GraphqlError, retry::Retryable, transport::PublishError};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ─── Scope ───────────────────────────────────────────────────────────────────

/// The dispatcher phase a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scope {
  #[serde(rename = "handle")]
  Handle,
  #[serde(rename = "onSubscribe")]
  OnSubscribe,
  #[serde(rename = "onSubscribe.insert")]
  OnSubscribeInsert,
  #[serde(rename = "onInbound.fetchTopics")]
  OnInboundFetchTopics,
  #[serde(rename = "onInbound.execute")]
  OnInboundExecute,
  #[serde(rename = "onDisconnect")]
  OnDisconnect,
  #[serde(rename = "publish")]
  Publish,
}

impl Scope {
  pub fn as_str(self) -> &'static str {
    match self {
      Scope::Handle => "handle",
      Scope::OnSubscribe => "onSubscribe",
      Scope::OnSubscribeInsert => "onSubscribe.insert",
      Scope::OnInboundFetchTopics => "onInbound.fetchTopics",
      Scope::OnInboundExecute => "onInbound.execute",
      Scope::OnDisconnect => "onDisconnect",
      Scope::Publish => "publish",
    }
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// Structured context attached to a reported failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
  pub scope:           Scope,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub client_id:       Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub topic:           Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source:          Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub context_value:   Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub variable_values: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payload:         Option<Value>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub errors:          Vec<GraphqlError>,
}

impl ErrorContext {
  pub fn new(scope: Scope) -> Self {
    Self {
      scope,
      client_id: None,
      topic: None,
      source: None,
      context_value: None,
      variable_values: None,
      payload: None,
      errors: Vec::new(),
    }
  }

  pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
    self.client_id = Some(client_id.into());
    self
  }

  pub fn topic(mut self, topic: impl Into<String>) -> Self {
    self.topic = Some(topic.into());
    self
  }

  pub fn source(mut self, source: impl Into<String>) -> Self {
    self.source = Some(source.into());
    self
  }

  pub fn context_value(mut self, value: Value) -> Self {
    self.context_value = Some(value);
    self
  }

  pub fn variable_values(mut self, value: Value) -> Self {
    self.variable_values = Some(value);
    self
  }

  pub fn payload(mut self, payload: Value) -> Self {
    self.payload = Some(payload);
    self
  }

  pub fn errors(mut self, errors: Vec<GraphqlError>) -> Self {
    self.errors = errors;
    self
  }
}

impl fmt::Display for ErrorContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.scope)?;
    if let Some(client_id) = &self.client_id {
      write!(f, " [clientId={client_id}]")?;
    }
    if let Some(topic) = &self.topic {
      write!(f, " [topic={topic}]")?;
    }
    Ok(())
  }
}

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
  #[error("no source provided")]
  MissingSource,

  #[error("invalid source: {}", summarize(errors))]
  InvalidSource { errors: Vec<GraphqlError> },

  #[error("no event policy registered for {0:?}")]
  UnknownEvent(String),

  #[error("subscription {0:?} has no stored document and no local query")]
  MissingDocument(String),

  #[error("registry error: {source}")]
  Registry {
    #[source]
    source:      BoxError,
    retryable:   bool,
    retry_delay: Option<Duration>,
  },

  #[error(transparent)]
  Publish(#[from] PublishError),

  #[error("hook error: {0}")]
  Hook(String),

  #[error("configuration error: {0}")]
  Config(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("{context}: {source}")]
  Scoped {
    context: Box<ErrorContext>,
    #[source]
    source:  Box<Error>,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  /// Wrap a registry backend error, keeping its retry hints.
  pub fn registry<E>(error: E) -> Self
  where
    E: std::error::Error + Retryable + Send + Sync + 'static,
  {
    Error::Registry {
      retryable:   error.retryable().unwrap_or(false),
      retry_delay: error.retry_delay(),
      source:      Box::new(error),
    }
  }

  /// Attach `context` unless the error already carries one.
  pub fn scoped(self, context: ErrorContext) -> Self {
    match self {
      scoped @ Error::Scoped { .. } => scoped,
      other => Error::Scoped {
        context: Box::new(context),
        source:  Box::new(other),
      },
    }
  }

  pub fn context(&self) -> Option<&ErrorContext> {
    match self {
      Error::Scoped { context, .. } => Some(context),
      _ => None,
    }
  }

  pub fn scope(&self) -> Option<Scope> { self.context().map(|c| c.scope) }

  /// The underlying error with any context stripped.
  pub fn root(&self) -> &Error {
    match self {
      Error::Scoped { source, .. } => source.root(),
      other => other,
    }
  }
}

impl Retryable for Error {
  fn retryable(&self) -> Option<bool> {
    match self {
      Error::Registry { retryable, .. } => Some(*retryable),
      Error::Publish(e) => e.retryable(),
      Error::Scoped { source, .. } => source.retryable(),
      _ => None,
    }
  }

  fn retry_delay(&self) -> Option<Duration> {
    match self {
      Error::Registry { retry_delay, .. } => *retry_delay,
      Error::Publish(e) => e.retry_delay(),
      Error::Scoped { source, .. } => source.retry_delay(),
      _ => None,
    }
  }
}

fn summarize(errors: &[GraphqlError]) -> String {
  errors
    .iter()
    .map(|e| e.message.as_str())
    .collect::<Vec<_>>()
    .join("; ")
}
