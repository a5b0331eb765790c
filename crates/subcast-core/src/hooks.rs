//! Optional pre-processing hooks for the dispatcher entry points.

use std::{fmt, future::Future, sync::Arc};

use futures::future::BoxFuture;
use serde_json::Value;

use crate::Result;

/// A `(topic, payload)` pair as seen by an entry point.
///
/// An empty topic means the entry point was called in-process rather than
/// from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
  pub topic:   String,
  pub payload: Value,
}

impl Message {
  pub fn new(topic: impl Into<String>, payload: Value) -> Self {
    Self { topic: topic.into(), payload }
  }

  pub fn is_transport(&self) -> bool { !self.topic.is_empty() }
}

pub type Hook = Arc<dyn Fn(Message) -> BoxFuture<'static, Result<Message>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
  Subscribe,
  Inbound,
  Disconnect,
}

#[derive(Clone, Default)]
pub struct Hooks {
  on_subscribe:  Option<Hook>,
  on_inbound:    Option<Hook>,
  on_disconnect: Option<Hook>,
}

fn boxed<F, Fut>(hook: F) -> Hook
where
  F: Fn(Message) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Message>> + Send + 'static,
{
  Arc::new(move |message| Box::pin(hook(message)))
}

impl Hooks {
  pub fn on_subscribe<F, Fut>(mut self, hook: F) -> Self
  where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Message>> + Send + 'static,
  {
    self.on_subscribe = Some(boxed(hook));
    self
  }

  pub fn on_inbound<F, Fut>(mut self, hook: F) -> Self
  where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Message>> + Send + 'static,
  {
    self.on_inbound = Some(boxed(hook));
    self
  }

  pub fn on_disconnect<F, Fut>(mut self, hook: F) -> Self
  where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Message>> + Send + 'static,
  {
    self.on_disconnect = Some(boxed(hook));
    self
  }

  /// Run the hook for `entry`, or pass `message` through unchanged.
  pub async fn run(&self, entry: Entry, message: Message) -> Result<Message> {
    let hook = match entry {
      Entry::Subscribe => &self.on_subscribe,
      Entry::Inbound => &self.on_inbound,
      Entry::Disconnect => &self.on_disconnect,
    };
    match hook {
      Some(hook) => hook(message).await,
      None => Ok(message),
    }
  }
}

impl fmt::Debug for Hooks {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Hooks")
      .field("on_subscribe", &self.on_subscribe.is_some())
      .field("on_inbound", &self.on_inbound.is_some())
      .field("on_disconnect", &self.on_disconnect.is_some())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[tokio::test]
  async fn missing_hook_is_identity() {
    let message = Message::new("t", json!({ "a": 1 }));
    let out = Hooks::default().run(Entry::Inbound, message.clone()).await.unwrap();
    assert_eq!(out, message);
  }

  #[tokio::test]
  async fn hook_rewrites_only_its_entry() {
    let hooks = Hooks::default().on_subscribe(|mut message: Message| async move {
      message.payload["clientId"] = json!("rewritten");
      Ok::<_, crate::Error>(message)
    });

    let out = hooks
      .run(Entry::Subscribe, Message::new("t", json!({ "clientId": "c1" })))
      .await
      .unwrap();
    assert_eq!(out.payload["clientId"], "rewritten");

    let untouched = hooks
      .run(Entry::Disconnect, Message::new("t", json!({ "clientId": "c1" })))
      .await
      .unwrap();
    assert_eq!(untouched.payload["clientId"], "c1");
  }
}
