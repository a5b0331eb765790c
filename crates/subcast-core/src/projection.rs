//! A minimal [`Engine`] that projects fields out of the inbound payload.
//!
//! Each known root subscription field resolves to the root value itself, and
//! nested selections pick object keys by name. Arguments and directives are
//! ignored. This is enough to run the dispatcher end to end without a schema
//! library; richer deployments plug in their own [`Engine`].

use std::{collections::HashSet, future::Future};

use async_graphql_parser::{
  Pos,
  types::{ExecutableDocument, OperationType, Selection, SelectionSet},
};
use serde_json::{Map, Value};

use crate::{
  document::Document,
  engine::{Engine, ExecuteRequest, ExecutionResult, GraphqlError},
};

const TYPENAME: &str = "__typename";

#[derive(Debug, Clone, Default)]
pub struct ProjectionEngine {
  fields: HashSet<String>,
}

impl ProjectionEngine {
  /// An engine whose `Subscription` type exposes `fields`.
  pub fn new<I, S>(fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self { fields: fields.into_iter().map(Into::into).collect() }
  }

  pub fn has_field(&self, name: &str) -> bool { self.fields.contains(name) }

  /// Check root fields, following fragments that have not been entered yet.
  fn check_root<'d>(
    &self,
    document: &'d ExecutableDocument,
    set: &'d SelectionSet,
    entered: &mut HashSet<&'d str>,
    errors: &mut Vec<GraphqlError>,
  ) {
    for selection in &set.items {
      match &selection.node {
        Selection::Field(field) => {
          let name = field.node.name.node.as_str();
          if name != TYPENAME && !self.has_field(name) {
            errors.push(
              GraphqlError::new(format!(
                "Cannot query field \"{name}\" on type \"Subscription\"."
              ))
              .at(field.pos),
            );
          }
        }
        Selection::FragmentSpread(spread) => {
          let name = spread.node.fragment_name.node.as_str();
          if let Some(fragment) = document.fragments.get(name)
            && entered.insert(name)
          {
            self.check_root(document, &fragment.node.selection_set.node, entered, errors);
          }
        }
        Selection::InlineFragment(inline) => {
          self.check_root(document, &inline.node.selection_set.node, entered, errors)
        }
      }
    }
  }

  fn run(&self, request: ExecuteRequest<'_>) -> ExecutionResult {
    let ast = request.document.ast();
    let Some((_, operation)) = ast.operations.iter().min_by_key(|(_, op)| op.pos) else {
      return ExecutionResult::error(GraphqlError::new("Document has no operation."));
    };

    let mut data = Map::new();
    project_into(
      ast,
      &operation.node.selection_set.node,
      request.root_value,
      true,
      &mut Vec::new(),
      &mut data,
    );
    ExecutionResult::data(Value::Object(data))
  }
}

impl Engine for ProjectionEngine {
  fn validate(&self, document: &Document) -> Vec<GraphqlError> {
    let ast = document.ast();
    let mut errors = Vec::new();

    for (_, operation) in ast.operations.iter() {
      if operation.node.ty != OperationType::Subscription {
        errors.push(
          GraphqlError::new(format!(
            "Schema is not configured to execute {} operation.",
            operation.node.ty
          ))
          .at(operation.pos),
        );
        continue;
      }
      self.check_root(ast, &operation.node.selection_set.node, &mut HashSet::new(), &mut errors);
    }
    errors.extend(check_fragments(ast));

    errors.sort_by_key(|e| e.locations.first().copied());
    errors
  }

  fn execute<'a>(
    &'a self,
    request: ExecuteRequest<'a>,
  ) -> impl Future<Output = ExecutionResult> + Send + 'a {
    std::future::ready(self.run(request))
  }
}

// ─── Fragments ───────────────────────────────────────────────────────────────

/// Every spread in `set`, at any depth, with its position.
fn spreads<'d>(set: &'d SelectionSet, out: &mut Vec<(&'d str, Pos)>) {
  for selection in &set.items {
    match &selection.node {
      Selection::Field(field) => spreads(&field.node.selection_set.node, out),
      Selection::FragmentSpread(spread) => {
        out.push((spread.node.fragment_name.node.as_str(), spread.pos))
      }
      Selection::InlineFragment(inline) => spreads(&inline.node.selection_set.node, out),
    }
  }
}

/// Report unknown fragment names anywhere in the document, and fragments
/// that spread themselves directly or through other fragments.
fn check_fragments(document: &ExecutableDocument) -> Vec<GraphqlError> {
  let mut errors = Vec::new();

  let mut sets: Vec<&SelectionSet> = document
    .operations
    .iter()
    .map(|(_, op)| &op.node.selection_set.node)
    .collect();
  sets.extend(document.fragments.values().map(|f| &f.node.selection_set.node));
  for set in sets {
    let mut found = Vec::new();
    spreads(set, &mut found);
    for (name, pos) in found {
      if !document.fragments.contains_key(name) {
        errors.push(GraphqlError::new(format!("Unknown fragment \"{name}\".")).at(pos));
      }
    }
  }

  for (name, fragment) in &document.fragments {
    if reaches(document, name.as_str(), &fragment.node.selection_set.node) {
      errors.push(
        GraphqlError::new(format!("Cannot spread fragment \"{name}\" within itself."))
          .at(fragment.pos),
      );
    }
  }

  errors
}

/// Whether `target` is spread from `set`, following known fragments once.
fn reaches(document: &ExecutableDocument, target: &str, set: &SelectionSet) -> bool {
  let mut visited = HashSet::new();
  let mut pending = vec![set];

  while let Some(set) = pending.pop() {
    let mut found = Vec::new();
    spreads(set, &mut found);
    for (name, _) in found {
      if name == target {
        return true;
      }
      if visited.insert(name)
        && let Some(fragment) = document.fragments.get(name)
      {
        pending.push(&fragment.node.selection_set.node);
      }
    }
  }
  false
}

// ─── Projection ──────────────────────────────────────────────────────────────

/// Write the selections of `set` taken from `value` into `out`.
///
/// At the root every field resolves to `value` itself; below it fields are
/// looked up by name. A fragment already being expanded further up is not
/// entered again, so stored cyclic documents still terminate.
fn project_into<'d>(
  document: &'d ExecutableDocument,
  set: &'d SelectionSet,
  value: &Value,
  root: bool,
  active: &mut Vec<&'d str>,
  out: &mut Map<String, Value>,
) {
  for selection in &set.items {
    match &selection.node {
      Selection::Field(field) => {
        let name = field.node.name.node.as_str();
        if name == TYPENAME {
          continue;
        }
        let resolved = if root {
          value
        } else {
          value.get(name).unwrap_or(&Value::Null)
        };
        let key = field.node.response_key().node.to_string();
        out.insert(key, project(document, &field.node.selection_set.node, resolved, active));
      }
      Selection::FragmentSpread(spread) => {
        let name = spread.node.fragment_name.node.as_str();
        if active.contains(&name) {
          continue;
        }
        if let Some(fragment) = document.fragments.get(name) {
          active.push(name);
          project_into(document, &fragment.node.selection_set.node, value, root, active, out);
          active.pop();
        }
      }
      Selection::InlineFragment(inline) => {
        project_into(document, &inline.node.selection_set.node, value, root, active, out);
      }
    }
  }
}

fn project<'d>(
  document: &'d ExecutableDocument,
  set: &'d SelectionSet,
  value: &Value,
  active: &mut Vec<&'d str>,
) -> Value {
  if set.items.is_empty() {
    return value.clone();
  }
  match value {
    Value::Object(_) => {
      let mut out = Map::new();
      project_into(document, set, value, false, active, &mut out);
      Value::Object(out)
    }
    Value::Array(items) => Value::Array(
      items
        .iter()
        .map(|item| project(document, set, item, active))
        .collect(),
    ),
    _ => Value::Null,
  }
}
