//! Topic routing for inbound broker messages.

use serde::{Deserialize, Serialize};

pub const DEFAULT_INBOUND: &str = "subscriptions/inbound";
pub const DEFAULT_SUBSCRIBE: &str = "subscriptions/subscribe";
pub const DEFAULT_DISCONNECT: &str = "$aws/events/presence/disconnected";

/// The three topic prefixes the dispatcher listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
  pub inbound:    String,
  pub subscribe:  String,
  pub disconnect: String,
}

impl Default for Topics {
  fn default() -> Self {
    Self {
      inbound:    DEFAULT_INBOUND.to_owned(),
      subscribe:  DEFAULT_SUBSCRIBE.to_owned(),
      disconnect: DEFAULT_DISCONNECT.to_owned(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  Inbound,
  Subscribe,
  Disconnect,
}

impl Topics {
  /// Classify `topic` by prefix. Inbound wins, then subscribe, then
  /// disconnect; anything else is `None`.
  pub fn route(&self, topic: &str) -> Option<Route> {
    if topic.starts_with(&self.inbound) {
      Some(Route::Inbound)
    } else if topic.starts_with(&self.subscribe) {
      Some(Route::Subscribe)
    } else if topic.starts_with(&self.disconnect) {
      Some(Route::Disconnect)
    } else {
      None
    }
  }
}
