//! Event policies described in configuration.
//!
//! Each template lists inbound and outbound topics. `{clientId}` and
//! `{name}` are substituted with the subscribing client and the operation
//! name.

use serde::{Deserialize, Serialize};
use subcast_core::events::{Event, Events};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
  /// The subscription root field this policy applies to.
  pub name:     String,
  #[serde(default)]
  pub inbound:  Vec<String>,
  #[serde(default = "default_outbound")]
  pub outbound: Vec<String>,
}

fn default_outbound() -> Vec<String> { vec!["{clientId}".to_owned()] }

fn render(templates: &[String], client_id: &str, name: &str) -> Vec<String> {
  templates
    .iter()
    .map(|t| t.replace("{clientId}", client_id).replace("{name}", name))
    .collect()
}

impl EventTemplate {
  pub fn to_event(&self) -> Event {
    let inbound = self.inbound.clone();
    let outbound = self.outbound.clone();
    Event::new(
      move |client_id, query, _| render(&inbound, client_id, &query.name),
      move |client_id, query, _| render(&outbound, client_id, &query.name),
    )
  }
}

pub fn events(templates: &[EventTemplate]) -> Events {
  templates
    .iter()
    .map(|t| (t.name.clone(), t.to_event()))
    .collect()
}
