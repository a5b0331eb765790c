//! A parsed GraphQL document that remembers its source text.
//!
//! The parser's AST does not survive a serde round trip (variables and enum
//! values collapse into plain JSON), so a [`Document`] serialises as its
//! source text and re-parses on the way back in.

use std::fmt;

use async_graphql_parser::{parse_query, types::ExecutableDocument};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::engine::GraphqlError;

#[derive(Clone)]
pub struct Document {
  source: String,
  ast:    ExecutableDocument,
}

impl Document {
  /// Parse `source` into a document.
  pub fn parse(source: impl Into<String>) -> Result<Self, GraphqlError> {
    let source = source.into();
    let ast = parse_query(&source).map_err(GraphqlError::from)?;
    Ok(Self { source, ast })
  }

  pub fn source(&self) -> &str { &self.source }

  pub fn ast(&self) -> &ExecutableDocument { &self.ast }
}

impl fmt::Debug for Document {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Document").field(&self.source).finish()
  }
}

impl PartialEq for Document {
  fn eq(&self, other: &Self) -> bool { self.source == other.source }
}

impl Serialize for Document {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.source)
  }
}

impl<'de> Deserialize<'de> for Document {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let source = String::deserialize(deserializer)?;
    Document::parse(source).map_err(|e| de::Error::custom(e.message))
  }
}
