//! The GraphQL engine contract.
//!
//! The dispatcher never looks inside a schema. It asks an [`Engine`] to run
//! the standard document validation and to execute a stored document against
//! an inbound payload; everything else about GraphQL is the engine's concern.

use std::{fmt, future::Future};

use async_graphql_parser::Pos;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;

// ─── Errors and results ──────────────────────────────────────────────────────

/// A GraphQL-shaped error: a message plus source locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlError {
  pub message:   String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub locations: Vec<Pos>,
}

impl GraphqlError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into(), locations: Vec::new() }
  }

  pub fn at(mut self, pos: Pos) -> Self {
    self.locations.push(pos);
    self
  }
}

impl fmt::Display for GraphqlError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message)?;
    if let Some(pos) = self.locations.first() {
      write!(f, " at {pos}")?;
    }
    Ok(())
  }
}

impl From<async_graphql_parser::Error> for GraphqlError {
  fn from(error: async_graphql_parser::Error) -> Self {
    Self {
      message:   error.to_string(),
      locations: error.positions().collect(),
    }
  }
}

/// The `{data, errors}` envelope produced by an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
  #[serde(default)]
  pub data:   Value,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<GraphqlError>,
}

impl ExecutionResult {
  pub fn data(data: Value) -> Self { Self { data, errors: Vec::new() } }

  pub fn error(error: GraphqlError) -> Self { Self { data: Value::Null, errors: vec![error] } }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Arguments for [`Engine::execute`].
#[derive(Debug, Clone, Copy)]
pub struct ExecuteRequest<'a> {
  pub document:        &'a Document,
  pub root_value:      &'a Value,
  pub context_value:   &'a Value,
  pub variable_values: &'a Value,
}

/// Abstraction over a GraphQL parse / validate / execute engine.
pub trait Engine: Send + Sync {
  /// Parse `source`. The default uses the `async-graphql` parser.
  fn parse(&self, source: &str) -> Result<Document, GraphqlError> { Document::parse(source) }

  /// Run the engine's standard validation rules against its schema.
  fn validate(&self, document: &Document) -> Vec<GraphqlError>;

  /// Execute `request.document` with `request.root_value` as the root.
  fn execute<'a>(
    &'a self,
    request: ExecuteRequest<'a>,
  ) -> impl Future<Output = ExecutionResult> + Send + 'a;
}
