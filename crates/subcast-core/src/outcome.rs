//! Values returned by the dispatcher entry points.

use serde::Serialize;
use serde_json::Value;

use crate::{Error, ErrorContext, Scope};

/// What `handle` did with a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outcome {
  /// Unmatched topic, or a request without a client id.
  Ignored,
  Subscribed { acknowledgements: Vec<Acknowledgement> },
  Delivered { deliveries: Vec<Delivery> },
  Disconnected { client_id: String, removed: u64 },
}

/// One upserted subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
  pub client_id: String,
  pub id:        String,
  pub source:    String,
  pub topic:     String,
}

/// The fate of one publish during fan-out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Delivery {
  Published { topic: String, payload: Value },
  Failed { topic: String, error: ErrorContext, message: String },
}

impl Delivery {
  /// Capture `error` as a failed delivery to `topic`.
  pub fn failed(topic: impl Into<String>, error: &Error) -> Self {
    let topic = topic.into();
    let context = error
      .context()
      .cloned()
      .unwrap_or_else(|| ErrorContext::new(Scope::Publish).topic(topic.clone()));
    Delivery::Failed { topic, error: context, message: error.root().to_string() }
  }

  pub fn topic(&self) -> &str {
    match self {
      Delivery::Published { topic, .. } | Delivery::Failed { topic, .. } => topic,
    }
  }

  pub fn is_published(&self) -> bool { matches!(self, Delivery::Published { .. }) }
}
