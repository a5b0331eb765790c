//! Subscription document validation and execution.
//!
//! On top of the engine's standard rules a subscription document must select
//! exactly one root field, and that field may not come from a fragment. The
//! root field's name becomes the dispatch key.
//!
//! Local queries are named executors that bypass parsing and validation
//! entirely; they are looked up by the subscription's `source`.

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use async_graphql_parser::types::{ExecutableDocument, Selection};
use futures::future::BoxFuture;
use serde_json::Value;

use crate::{
  Error, Result,
  document::Document,
  engine::{Engine, ExecuteRequest, ExecutionResult, GraphqlError},
};

pub const ROOT_FRAGMENT: &str = "Subscriptions do not support fragments on the root field.";

// ─── Local queries ───────────────────────────────────────────────────────────

/// Input handed to a local query executor.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRequest {
  pub root_value:      Value,
  pub context_value:   Value,
  pub variable_values: Value,
}

pub type LocalQuery = Arc<dyn Fn(LocalRequest) -> BoxFuture<'static, ExecutionResult> + Send + Sync>;

// ─── Validator ───────────────────────────────────────────────────────────────

/// A document that passed validation, with its dispatch name.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
  pub document: Document,
  pub name:     String,
}

/// Arguments for [`Validator::execute`].
#[derive(Debug, Clone, Copy)]
pub struct ExecuteArgs<'a> {
  pub name:            &'a str,
  pub document:        Option<&'a Document>,
  pub root_value:      &'a Value,
  pub context_value:   &'a Value,
  pub variable_values: &'a Value,
}

pub struct Validator<G> {
  engine: G,
  local:  HashMap<String, LocalQuery>,
}

impl<G: Engine> Validator<G> {
  pub fn new(engine: G) -> Self { Self { engine, local: HashMap::new() } }

  pub fn engine(&self) -> &G { &self.engine }

  /// Register `executor` under `name`.
  pub fn add_local_query<F, Fut>(&mut self, name: impl Into<String>, executor: F)
  where
    F: Fn(LocalRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionResult> + Send + 'static,
  {
    let executor: LocalQuery = Arc::new(move |request| Box::pin(executor(request)));
    self.local.insert(name.into(), executor);
  }

  pub fn is_local(&self, source: &str) -> bool { self.local.contains_key(source) }

  /// Parse and validate `source`.
  ///
  /// Returns every validation error rather than stopping at the first.
  pub fn validate(&self, source: &str) -> Result<Validated, Vec<GraphqlError>> {
    let document = self.engine.parse(source).map_err(|e| vec![e])?;

    let mut errors = self.engine.validate(&document);
    errors.extend(single_root_field(document.ast()));
    if !errors.is_empty() {
      return Err(errors);
    }

    let name = root_field_name(document.ast())
      .ok_or_else(|| vec![GraphqlError::new("Subscription must have only one field.")])?;

    Ok(Validated { document, name })
  }

  /// Execute a stored subscription, preferring a local query when there is
  /// no document.
  pub async fn execute(&self, args: ExecuteArgs<'_>) -> Result<ExecutionResult> {
    if let Some(document) = args.document {
      let request = ExecuteRequest {
        document,
        root_value: args.root_value,
        context_value: args.context_value,
        variable_values: args.variable_values,
      };
      return Ok(self.engine.execute(request).await);
    }

    let executor = self
      .local
      .get(args.name)
      .ok_or_else(|| Error::MissingDocument(args.name.to_owned()))?;

    Ok(
      executor(LocalRequest {
        root_value:      args.root_value.clone(),
        context_value:   args.context_value.clone(),
        variable_values: args.variable_values.clone(),
      })
      .await,
    )
  }
}

impl<G> fmt::Debug for Validator<G> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Validator")
      .field("local", &self.local.keys().collect::<Vec<_>>())
      .finish_non_exhaustive()
  }
}

// ─── Rule ────────────────────────────────────────────────────────────────────

/// Report root fragments and every root field after the first.
pub fn single_root_field(document: &ExecutableDocument) -> Vec<GraphqlError> {
  let mut errors = Vec::new();

  for (name, operation) in document.operations.iter() {
    let mut fields = 0usize;

    for selection in &operation.node.selection_set.node.items {
      match &selection.node {
        Selection::Field(_) => {
          fields += 1;
          if fields > 1 {
            let message = match name {
              Some(name) => format!("Subscription \"{name}\" must have only one field."),
              None => "Subscription must have only one field.".to_owned(),
            };
            errors.push(GraphqlError::new(message).at(selection.pos));
          }
        }
        Selection::FragmentSpread(_) | Selection::InlineFragment(_) => {
          errors.push(GraphqlError::new(ROOT_FRAGMENT).at(selection.pos));
        }
      }
    }
  }

  // Named operations come out of a hash map.
  errors.sort_by_key(|e| e.locations.first().copied());
  errors
}

/// Name of the first root field of the first operation in source order.
fn root_field_name(document: &ExecutableDocument) -> Option<String> {
  let (_, operation) = document.operations.iter().min_by_key(|(_, op)| op.pos)?;

  operation
    .node
    .selection_set
    .node
    .items
    .iter()
    .find_map(|selection| match &selection.node {
      Selection::Field(field) => Some(field.node.name.node.to_string()),
      _ => None,
    })
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::projection::ProjectionEngine;

  fn validator() -> Validator<ProjectionEngine> {
    Validator::new(ProjectionEngine::new(["onMessage", "onPresence"]))
  }

  #[test]
  fn single_field_subscription_is_valid() {
    let validated = validator()
      .validate("subscription { onMessage { text } }")
      .unwrap();
    assert_eq!(validated.name, "onMessage");
  }

  #[test]
  fn alias_does_not_change_the_dispatch_name() {
    let validated = validator()
      .validate("subscription Feed { latest: onMessage { text } }")
      .unwrap();
    assert_eq!(validated.name, "onMessage");
  }

  #[test]
  fn two_root_fields_on_named_operation() {
    let errors = validator()
      .validate("subscription Feed { onMessage { text } onPresence { status } }")
      .unwrap_err();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "Subscription \"Feed\" must have only one field.");
    assert_eq!(errors[0].locations.len(), 1);
  }

  #[test]
  fn two_root_fields_on_anonymous_operation() {
    let errors = validator()
      .validate("subscription { onMessage { text } onPresence { status } }")
      .unwrap_err();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "Subscription must have only one field.");
  }

  #[test]
  fn one_error_per_extra_field() {
    let errors = validator()
      .validate("subscription { onMessage { text } a: onMessage { text } b: onPresence { status } }")
      .unwrap_err();
    assert_eq!(errors.len(), 2);
  }

  #[test]
  fn root_fragments_are_rejected() {
    let source = "
      subscription {
        ...feed
        ... on Subscription { onPresence { status } }
      }
      fragment feed on Subscription { onMessage { text } }
    ";
    let errors = validator().validate(source).unwrap_err();

    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.message == ROOT_FRAGMENT));
  }

  #[test]
  fn engine_errors_are_reported_alongside_rule_errors() {
    let errors = validator()
      .validate("subscription { unknown { text } onMessage { text } }")
      .unwrap_err();

    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|e| e.message.contains("unknown")));
    assert!(errors.iter().any(|e| e.message.contains("must have only one field")));
  }

  #[test]
  fn parse_errors_are_reported_not_thrown() {
    let errors = validator().validate("subscription {").unwrap_err();
    assert_eq!(errors.len(), 1);
  }

  #[tokio::test]
  async fn execute_prefers_the_stored_document() {
    let v = validator();
    let validated = v.validate("subscription { onMessage { text } }").unwrap();
    let root = json!({ "text": "hi", "extra": true });

    let result = v
      .execute(ExecuteArgs {
        name:            "onMessage",
        document:        Some(&validated.document),
        root_value:      &root,
        context_value:   &json!({}),
        variable_values: &json!({}),
      })
      .await
      .unwrap();

    assert_eq!(result.data, json!({ "onMessage": { "text": "hi" } }));
  }

  #[tokio::test]
  async fn execute_falls_back_to_local_queries() {
    let mut v = validator();
    v.add_local_query("ticker", |request: LocalRequest| async move {
      ExecutionResult::data(json!({ "price": request.root_value["price"] }))
    });
    assert!(v.is_local("ticker"));

    let root = json!({ "price": 42 });
    let args = ExecuteArgs {
      name:            "ticker",
      document:        None,
      root_value:      &root,
      context_value:   &json!({}),
      variable_values: &json!({}),
    };
    assert_eq!(v.execute(args).await.unwrap().data, json!({ "price": 42 }));

    let missing = ExecuteArgs { name: "nope", ..args };
    assert!(matches!(v.execute(missing).await, Err(Error::MissingDocument(_))));
  }
}
