//! Conversion between [`SubscriptionRecord`] and its SQLite row.
//!
//! The document column holds the validated source text; it is parsed again
//! when rows are decoded.

use std::collections::HashMap;

use subcast_core::{document::Document, record::SubscriptionRecord};
use tracing::warn;

pub const COLUMNS: &str = "client_id, id, topic, query, document, ttl";

/// A row as read from `subscriptions`, before the document is parsed.
pub struct RawRecord {
  pub client_id: String,
  pub id:        String,
  pub topic:     String,
  pub query:     String,
  pub document:  Option<String>,
  pub ttl:       i64,
}

impl RawRecord {
  /// Read a row selected with [`COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      client_id: row.get(0)?,
      id:        row.get(1)?,
      topic:     row.get(2)?,
      query:     row.get(3)?,
      document:  row.get(4)?,
      ttl:       row.get(5)?,
    })
  }

  pub fn from_record(record: &SubscriptionRecord) -> Self {
    Self {
      client_id: record.client_id.clone(),
      id:        record.id.clone(),
      topic:     record.topic.clone(),
      query:     record.query.clone(),
      document:  record.document.as_ref().map(|d| d.source().to_owned()),
      ttl:       record.ttl,
    }
  }

  fn into_record(self, document: Option<Document>) -> SubscriptionRecord {
    SubscriptionRecord {
      client_id: self.client_id,
      id: self.id,
      topic: self.topic,
      query: self.query,
      document,
      ttl: self.ttl,
    }
  }
}

/// Decode rows, parsing each stored document once per subscription id.
///
/// A document that no longer parses is logged and left out of the record;
/// the dispatcher re-parses the query source and reports the failure for
/// that subscription alone.
pub fn decode(raws: Vec<RawRecord>) -> Vec<SubscriptionRecord> {
  let mut parsed: HashMap<String, Option<Document>> = HashMap::new();

  raws
    .into_iter()
    .map(|mut raw| {
      let document = match raw.document.take() {
        None => None,
        Some(source) => parsed
          .entry(raw.id.clone())
          .or_insert_with(|| match Document::parse(source) {
            Ok(document) => Some(document),
            Err(error) => {
              warn!(id = %raw.id, error = %error.message, "stored document is invalid");
              None
            }
          })
          .clone(),
      };
      raw.into_record(document)
    })
    .collect()
}
