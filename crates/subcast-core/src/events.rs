//! Per-operation event policies.
//!
//! An [`Event`] decides, for one subscription operation name, which inbound
//! topics a subscription listens on and which outbound topics receive its
//! results. Both functions are pure and synchronous.

use std::{collections::HashMap, fmt, sync::Arc};

use serde_json::Value;

use crate::record::QueryDescriptor;

type TopicFn = dyn Fn(&str, &QueryDescriptor, &Value) -> Vec<String> + Send + Sync;

#[derive(Clone)]
pub struct Event {
  inbound:  Arc<TopicFn>,
  outbound: Arc<TopicFn>,
}

impl Event {
  /// Both functions receive `(client_id, descriptor, payload)`.
  ///
  /// For `inbound` the payload is the subscribe payload without `clientId`;
  /// for `outbound` it is the inbound message payload.
  pub fn new<I, O>(inbound: I, outbound: O) -> Self
  where
    I: Fn(&str, &QueryDescriptor, &Value) -> Vec<String> + Send + Sync + 'static,
    O: Fn(&str, &QueryDescriptor, &Value) -> Vec<String> + Send + Sync + 'static,
  {
    Self { inbound: Arc::new(inbound), outbound: Arc::new(outbound) }
  }

  /// Listen on fixed `inbound` topics and answer on the client's own topic.
  pub fn fixed<S: Into<String>>(inbound: impl IntoIterator<Item = S>) -> Self {
    let topics: Vec<String> = inbound.into_iter().map(Into::into).collect();
    Self::new(
      move |_, _, _| topics.clone(),
      |client_id, _, _| vec![client_id.to_owned()],
    )
  }

  pub fn inbound(&self, client_id: &str, query: &QueryDescriptor, payload: &Value) -> Vec<String> {
    (self.inbound)(client_id, query, payload)
  }

  pub fn outbound(&self, client_id: &str, query: &QueryDescriptor, payload: &Value) -> Vec<String> {
    (self.outbound)(client_id, query, payload)
  }
}

impl fmt::Debug for Event {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Event").finish_non_exhaustive()
  }
}

/// Event policies keyed by operation name.
#[derive(Debug, Clone, Default)]
pub struct Events(HashMap<String, Event>);

impl Events {
  pub fn new() -> Self { Self::default() }

  pub fn with(mut self, name: impl Into<String>, event: Event) -> Self {
    self.insert(name, event);
    self
  }

  pub fn insert(&mut self, name: impl Into<String>, event: Event) {
    self.0.insert(name.into(), event);
  }

  pub fn get(&self, name: &str) -> Option<&Event> { self.0.get(name) }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn names(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }
}

impl FromIterator<(String, Event)> for Events {
  fn from_iter<T: IntoIterator<Item = (String, Event)>>(iter: T) -> Self {
    Self(iter.into_iter().collect())
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn fixed_event_answers_on_the_client_topic() {
    let event = Event::fixed(["subscriptions/inbound/messages"]);
    let query = QueryDescriptor::new("onMessage", "subscription { onMessage }", json!({}), json!({}));

    assert_eq!(event.inbound("c1", &query, &json!({})), vec!["subscriptions/inbound/messages"]);
    assert_eq!(event.outbound("c1", &query, &json!({})), vec!["c1"]);
  }

  #[test]
  fn lookup_by_name() {
    let events = Events::new().with("onMessage", Event::fixed(["a"]));
    assert!(events.get("onMessage").is_some());
    assert!(events.get("onOther").is_none());
    assert_eq!(events.names().collect::<Vec<_>>(), vec!["onMessage"]);
  }
}
