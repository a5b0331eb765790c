//! Subscription records and the query descriptor they persist.
//!
//! A record's `id` is a fingerprint of its inbound topic and serialised
//! descriptor, so registering the same subscription twice overwrites the
//! existing row instead of adding a new one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::{Result, document::Document};

// ─── Descriptor ──────────────────────────────────────────────────────────────

/// The logical subscription request, independent of the parsed document.
///
/// Field order is significant: it fixes the serialised form and therefore
/// the fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
  pub context_value:   Value,
  pub name:            String,
  pub source:          String,
  pub variable_values: Value,
}

impl QueryDescriptor {
  /// Build a descriptor, normalising `null` to `{}` and sorting object keys.
  pub fn new(
    name: impl Into<String>,
    source: impl Into<String>,
    context_value: Value,
    variable_values: Value,
  ) -> Self {
    Self {
      context_value:   canonical(&object_or_empty(context_value)),
      name:            name.into(),
      source:          source.into(),
      variable_values: canonical(&object_or_empty(variable_values)),
    }
  }

  pub fn to_json(&self) -> Result<String> { Ok(serde_json::to_string(self)?) }

  pub fn from_json(s: &str) -> Result<Self> { Ok(serde_json::from_str(s)?) }
}

fn object_or_empty(value: Value) -> Value {
  match value {
    Value::Null => Value::Object(Map::new()),
    other => other,
  }
}

/// Rebuild `value` with every object's keys inserted in sorted order.
fn canonical(value: &Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      Value::Object(
        keys
          .into_iter()
          .map(|k| (k.clone(), canonical(&map[k])))
          .collect(),
      )
    }
    Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
    other => other.clone(),
  }
}

// ─── Fingerprint ─────────────────────────────────────────────────────────────

/// SHA-256 over `topic` followed by the serialised descriptor, as lowercase
/// hex.
pub fn fingerprint(topic: &str, query: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(topic.as_bytes());
  hasher.update(query.as_bytes());
  hex::encode(hasher.finalize())
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// The persisted binding of a client, an inbound topic and a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
  pub client_id: String,
  pub id:        String,
  pub topic:     String,
  /// The serialised [`QueryDescriptor`].
  pub query:     String,
  /// `None` for local queries.
  pub document:  Option<Document>,
  /// Epoch seconds after which the record may be expired.
  pub ttl:       i64,
}

impl SubscriptionRecord {
  pub fn new(
    client_id: impl Into<String>,
    topic: impl Into<String>,
    query: impl Into<String>,
    document: Option<Document>,
    expires_at: DateTime<Utc>,
  ) -> Self {
    let topic = topic.into();
    let query = query.into();
    Self {
      client_id: client_id.into(),
      id: fingerprint(&topic, &query),
      topic,
      query,
      document,
      ttl: expires_at.timestamp(),
    }
  }

  pub fn descriptor(&self) -> Result<QueryDescriptor> { QueryDescriptor::from_json(&self.query) }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool { self.ttl <= now.timestamp() }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};
  use serde_json::json;

  use super::*;

  fn descriptor(context_value: Value) -> QueryDescriptor {
    QueryDescriptor::new(
      "onMessage",
      "subscription { onMessage { text } }",
      context_value,
      json!({ "room": "lobby" }),
    )
  }

  #[test]
  fn descriptor_serialises_in_fixed_field_order() {
    let json = descriptor(json!({})).to_json().unwrap();
    assert_eq!(
      json,
      r#"{"contextValue":{},"name":"onMessage","source":"subscription { onMessage { text } }","variableValues":{"room":"lobby"}}"#
    );
  }

  #[test]
  fn key_order_does_not_change_the_fingerprint() {
    let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":3}}"#).unwrap();
    let b: Value = serde_json::from_str(r#"{"a":{"x":3,"y":2},"b":1}"#).unwrap();

    let qa = descriptor(a).to_json().unwrap();
    let qb = descriptor(b).to_json().unwrap();
    assert_eq!(fingerprint("t", &qa), fingerprint("t", &qb));
  }

  #[test]
  fn fingerprint_depends_on_topic_and_query() {
    let query = descriptor(json!({})).to_json().unwrap();
    let id = fingerprint("subscriptions/inbound/a", &query);

    assert_eq!(id, fingerprint("subscriptions/inbound/a", &query));
    assert_ne!(id, fingerprint("subscriptions/inbound/b", &query));
    assert_ne!(id, fingerprint("subscriptions/inbound/a", &descriptor(json!({ "k": 1 })).to_json().unwrap()));
    assert_eq!(id.len(), 64);
  }

  #[test]
  fn null_context_is_normalised() {
    assert_eq!(descriptor(Value::Null), descriptor(json!({})));
  }

  #[test]
  fn record_expiry_uses_epoch_seconds() {
    let now = Utc.timestamp_opt(1_000_000, 0).unwrap();
    let query = descriptor(json!({})).to_json().unwrap();
    let record = SubscriptionRecord::new("c1", "t", query, None, now + Duration::hours(12));

    assert_eq!(record.ttl, 1_000_000 + 12 * 3600);
    assert!(!record.is_expired(now));
    assert!(record.is_expired(now + Duration::hours(12)));
    assert_eq!(record.descriptor().unwrap().name, "onMessage");
  }
}
