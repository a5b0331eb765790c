//! [`Dispatcher`]: subscribe, fan out, and disconnect.
//!
//! The dispatcher is stateless per call apart from its [`Registry`]. Each
//! entry point runs its optional hook, does its work under the configured
//! [`RetryPolicy`], and reports failures wrapped in an [`ErrorContext`].

use std::{
  collections::{BTreeMap, btree_map},
  future::Future,
  time::Duration,
};

use chrono::Utc;
use futures::future::join_all;
use serde_json::{Map, Value, json};
use tracing::{Span, debug, info, instrument, warn};

use crate::{
  Error, ErrorContext, Result, Scope,
  document::Document,
  engine::{Engine, ExecutionResult},
  events::{Event, Events},
  hooks::{Entry, Hooks, Message},
  outcome::{Acknowledgement, Delivery, Outcome},
  record::{QueryDescriptor, SubscriptionRecord},
  registry::Registry,
  retry::RetryPolicy,
  topics::{Route, Topics},
  transport::Transport,
  validator::{ExecuteArgs, LocalRequest, Validator},
};

/// How long a record lives after its last subscribe.
pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

// ─── Builder ─────────────────────────────────────────────────────────────────

pub struct DispatcherBuilder<R, T, G> {
  registry:  R,
  transport: T,
  validator: Validator<G>,
  events:    Events,
  topics:    Topics,
  hooks:     Hooks,
  retry:     RetryPolicy,
  context:   Map<String, Value>,
  ttl:       Duration,
}

impl<R, T, G> DispatcherBuilder<R, T, G>
where
  R: Registry,
  T: Transport,
  G: Engine,
{
  pub fn events(mut self, events: Events) -> Self {
    self.events = events;
    self
  }

  pub fn event(mut self, name: impl Into<String>, event: Event) -> Self {
    self.events.insert(name, event);
    self
  }

  pub fn topics(mut self, topics: Topics) -> Self {
    self.topics = topics;
    self
  }

  pub fn hooks(mut self, hooks: Hooks) -> Self {
    self.hooks = hooks;
    self
  }

  pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// Default execution context. Keys stored with a subscription win.
  pub fn context_value(mut self, context: Map<String, Value>) -> Self {
    self.context = context;
    self
  }

  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Register a named executor that bypasses parsing and validation.
  pub fn local_query<F, Fut>(mut self, name: impl Into<String>, executor: F) -> Self
  where
    F: Fn(LocalRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionResult> + Send + 'static,
  {
    self.validator.add_local_query(name, executor);
    self
  }

  pub fn build(self) -> Result<Dispatcher<R, T, G>> {
    if self.events.is_empty() {
      return Err(Error::Config("at least one event policy is required".into()));
    }
    let ttl = chrono::Duration::from_std(self.ttl).map_err(|e| Error::Config(e.to_string()))?;

    Ok(Dispatcher {
      registry: self.registry,
      transport: self.transport,
      validator: self.validator,
      events: self.events,
      topics: self.topics,
      hooks: self.hooks,
      retry: self.retry,
      context: self.context,
      ttl,
    })
  }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

pub struct Dispatcher<R, T, G> {
  registry:  R,
  transport: T,
  validator: Validator<G>,
  events:    Events,
  topics:    Topics,
  hooks:     Hooks,
  retry:     RetryPolicy,
  context:   Map<String, Value>,
  ttl:       chrono::Duration,
}

/// The fields of a subscribe payload the dispatcher understands.
struct SubscribeRequest {
  client_id:       Option<String>,
  source:          Option<String>,
  context_value:   Value,
  variable_values: Value,
  /// Everything else, handed to the event policy.
  rest:            Value,
}

impl SubscribeRequest {
  fn from_payload(payload: Value) -> Self {
    let mut fields = match payload {
      Value::Object(fields) => fields,
      _ => Map::new(),
    };

    let client_id = take_string(&mut fields, "clientId");
    let source = take_string(&mut fields, "source");
    // Older clients send the document as `requestString`.
    let legacy = take_string(&mut fields, "requestString");
    let context_value = fields.remove("contextValue").unwrap_or_else(|| json!({}));
    let variable_values = fields.remove("variableValues").unwrap_or_else(|| json!({}));

    Self {
      client_id,
      source: source.or(legacy),
      context_value,
      variable_values,
      rest: Value::Object(fields),
    }
  }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
  match fields.remove(key) {
    Some(Value::String(s)) if !s.is_empty() => Some(s),
    _ => None,
  }
}

fn client_id_of(payload: &Value) -> Option<String> {
  payload
    .get("clientId")
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .map(str::to_owned)
}

/// Records sharing one subscription id, with every subscribed client.
struct Group {
  record:     SubscriptionRecord,
  client_ids: Vec<String>,
}

impl<R, T, G> Dispatcher<R, T, G>
where
  R: Registry,
  T: Transport,
  G: Engine,
{
  pub fn builder(registry: R, transport: T, engine: G) -> DispatcherBuilder<R, T, G> {
    DispatcherBuilder {
      registry,
      transport,
      validator: Validator::new(engine),
      events: Events::new(),
      topics: Topics::default(),
      hooks: Hooks::default(),
      retry: RetryPolicy::default(),
      context: Map::new(),
      ttl: DEFAULT_TTL,
    }
  }

  pub fn registry(&self) -> &R { &self.registry }

  pub fn transport(&self) -> &T { &self.transport }

  pub fn validator(&self) -> &Validator<G> { &self.validator }

  pub fn topics(&self) -> &Topics { &self.topics }

  /// Route `topic` to the matching entry point.
  ///
  /// Any error that escapes without a context is given scope `handle`.
  #[instrument(skip(self, payload))]
  pub async fn handle(&self, topic: &str, payload: Value) -> Result<Outcome> {
    let outcome = match self.topics.route(topic) {
      Some(Route::Inbound) => self.on_inbound(topic, payload).await,
      Some(Route::Subscribe) => self.on_subscribe(topic, payload).await,
      Some(Route::Disconnect) => self.on_disconnect(topic, payload).await,
      None => {
        debug!("no route for topic");
        return Ok(Outcome::Ignored);
      }
    };

    outcome.map_err(|e| e.scoped(ErrorContext::new(Scope::Handle).topic(topic)))
  }

  // ── Subscribe ─────────────────────────────────────────────────────────────

  /// Validate and register a subscription.
  ///
  /// An empty `topic` marks an in-process call; validation errors are then
  /// not echoed to the client.
  #[instrument(skip(self, payload), fields(client_id = tracing::field::Empty))]
  pub async fn on_subscribe(&self, topic: &str, payload: Value) -> Result<Outcome> {
    let message = self
      .hooks
      .run(Entry::Subscribe, Message::new(topic, payload))
      .await?;
    let transport_borne = message.is_transport();
    let request = SubscribeRequest::from_payload(message.payload);

    let Some(client_id) = request.client_id else {
      warn!("subscribe request without clientId ignored");
      return Ok(Outcome::Ignored);
    };
    Span::current().record("client_id", client_id.as_str());

    let Some(source) = request.source else {
      let error = Error::MissingSource;
      self
        .publish(&client_id, &json!({ "errors": [{ "message": error.to_string() }] }))
        .await?;
      return Err(error.scoped(ErrorContext::new(Scope::OnSubscribe).client_id(client_id)));
    };

    let base = ErrorContext::new(Scope::OnSubscribe)
      .client_id(client_id.clone())
      .context_value(request.context_value.clone())
      .source(source.clone())
      .variable_values(request.variable_values.clone());

    let (name, document): (String, Option<Document>) = if self.validator.is_local(&source) {
      (source.clone(), None)
    } else {
      match self.validator.validate(&source) {
        Ok(validated) => (validated.name, Some(validated.document)),
        Err(errors) => {
          if transport_borne {
            if let Err(error) = self.publish(&client_id, &json!({ "errors": errors })).await {
              warn!(%error, "could not report validation errors to client");
            }
          }
          return Err(Error::InvalidSource { errors: errors.clone() }.scoped(base.errors(errors)));
        }
      }
    };

    let event = match self.events.get(&name) {
      Some(event) => event,
      None => return Err(Error::UnknownEvent(name).scoped(base)),
    };

    let descriptor = QueryDescriptor::new(
      name,
      source.clone(),
      request.context_value,
      request.variable_values,
    );
    let query = descriptor
      .to_json()
      .map_err(|e| e.scoped(base.clone()))?;

    let inbound = event.inbound(&client_id, &descriptor, &request.rest);
    if inbound.is_empty() {
      debug!(name = %descriptor.name, "event policy returned no inbound topics");
      return Ok(Outcome::Subscribed { acknowledgements: Vec::new() });
    }

    let expires_at = Utc::now() + self.ttl;
    let mut upserts = Vec::with_capacity(inbound.len());
    for inbound_topic in inbound {
      let record = SubscriptionRecord::new(
        client_id.clone(),
        inbound_topic,
        query.clone(),
        document.clone(),
        expires_at,
      );
      let mut context = base.clone().topic(record.topic.clone());
      context.scope = Scope::OnSubscribeInsert;
      upserts.push(self.upsert(record, source.clone(), context));
    }

    let acknowledgements = join_all(upserts)
      .await
      .into_iter()
      .collect::<Result<Vec<_>>>()?;

    info!(count = acknowledgements.len(), "subscription registered");
    Ok(Outcome::Subscribed { acknowledgements })
  }

  async fn upsert(
    &self,
    record: SubscriptionRecord,
    source: String,
    context: ErrorContext,
  ) -> Result<Acknowledgement> {
    let acknowledgement = Acknowledgement {
      client_id: record.client_id.clone(),
      id: record.id.clone(),
      source,
      topic: record.topic.clone(),
    };

    let record = &record;
    self
      .retry
      .run(move || async move {
        self
          .registry
          .upsert(record.clone())
          .await
          .map_err(Error::registry)
      })
      .await
      .map_err(|e| e.scoped(context))?;

    Ok(acknowledgement)
  }

  // ── Inbound ───────────────────────────────────────────────────────────────

  /// Re-execute every subscription listening on `topic` and publish the
  /// results.
  ///
  /// Only the registry lookup can fail the call. Everything after it is
  /// reported per delivery.
  #[instrument(skip(self, payload))]
  pub async fn on_inbound(&self, topic: &str, payload: Value) -> Result<Outcome> {
    let Message { topic, payload } = self
      .hooks
      .run(Entry::Inbound, Message::new(topic, payload))
      .await?;

    let lookup = topic.as_str();
    let records = self
      .retry
      .run(move || async move {
        self
          .registry
          .query_by_topic(lookup)
          .await
          .map_err(Error::registry)
      })
      .await
      .map_err(|e| e.scoped(ErrorContext::new(Scope::OnInboundFetchTopics).topic(topic.clone())))?;

    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    for record in records {
      match groups.entry(record.id.clone()) {
        btree_map::Entry::Occupied(mut entry) => entry.get_mut().client_ids.push(record.client_id),
        btree_map::Entry::Vacant(entry) => {
          entry.insert(Group { client_ids: vec![record.client_id.clone()], record });
        }
      }
    }
    debug!(groups = groups.len(), "fanning out");

    let mut runs = Vec::with_capacity(groups.len());
    for group in groups.into_values() {
      runs.push(self.run_group(&topic, &payload, group));
    }
    let deliveries: Vec<Delivery> = join_all(runs).await.into_iter().flatten().collect();

    Ok(Outcome::Delivered { deliveries })
  }

  async fn run_group(&self, topic: &str, payload: &Value, group: Group) -> Vec<Delivery> {
    match self.deliver_group(payload, &group).await {
      Ok(deliveries) => deliveries,
      Err(error) => {
        let error = error.scoped(
          ErrorContext::new(Scope::OnInboundExecute)
            .topic(topic)
            .payload(payload.clone()),
        );
        warn!(%error, id = %group.record.id, "subscription group failed");
        vec![Delivery::failed(topic, &error)]
      }
    }
  }

  async fn deliver_group(&self, payload: &Value, group: &Group) -> Result<Vec<Delivery>> {
    let query = group.record.descriptor()?;
    let event = self
      .events
      .get(&query.name)
      .ok_or_else(|| Error::UnknownEvent(query.name.clone()))?;

    let outbound: Vec<String> = group
      .client_ids
      .iter()
      .flat_map(|client_id| event.outbound(client_id, &query, payload))
      .filter(|topic| !topic.is_empty())
      .collect();
    if outbound.is_empty() {
      return Ok(Vec::new());
    }

    // A backend may hand back a record without its document. Local queries
    // need none; anything else is parsed from the stored source, once per group.
    let reparsed;
    let document = match &group.record.document {
      Some(document) => Some(document),
      None if self.validator.is_local(&query.name) => None,
      None => {
        reparsed = self
          .validator
          .engine()
          .parse(&query.source)
          .map_err(|e| Error::InvalidSource { errors: vec![e] })?;
        Some(&reparsed)
      }
    };

    let context_value = self.merge_context(&query.context_value);
    let result = self
      .validator
      .execute(ExecuteArgs {
        name:            &query.name,
        document,
        root_value:      payload,
        context_value:   &context_value,
        variable_values: &query.variable_values,
      })
      .await?;
    let response = serde_json::to_value(&result)?;

    let mut publishes = Vec::with_capacity(outbound.len());
    for topic in &outbound {
      publishes.push(self.deliver(topic, &response));
    }
    Ok(join_all(publishes).await)
  }

  async fn deliver(&self, topic: &str, response: &Value) -> Delivery {
    match self.publish(topic, response).await {
      Ok(delivery) => delivery,
      Err(error) => {
        warn!(topic, %error, "publish failed during fan-out");
        Delivery::failed(topic, &error)
      }
    }
  }

  /// Shallow merge: stored keys override the dispatcher defaults.
  fn merge_context(&self, stored: &Value) -> Value {
    let mut merged = self.context.clone();
    if let Value::Object(stored) = stored {
      merged.extend(stored.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Value::Object(merged)
  }

  // ── Disconnect ────────────────────────────────────────────────────────────

  /// Remove every subscription of the disconnecting client.
  #[instrument(skip(self, payload), fields(client_id = tracing::field::Empty))]
  pub async fn on_disconnect(&self, topic: &str, payload: Value) -> Result<Outcome> {
    let message = self
      .hooks
      .run(Entry::Disconnect, Message::new(topic, payload))
      .await?;

    let Some(client_id) = client_id_of(&message.payload) else {
      warn!("disconnect without clientId ignored");
      return Ok(Outcome::Ignored);
    };
    Span::current().record("client_id", client_id.as_str());

    let id = client_id.as_str();
    let removed = self
      .retry
      .run(move || async move { self.registry.clear(id).await.map_err(Error::registry) })
      .await
      .map_err(|e| e.scoped(ErrorContext::new(Scope::OnDisconnect).client_id(client_id.clone())))?;

    info!(removed, "client disconnected");
    Ok(Outcome::Disconnected { client_id, removed })
  }

  // ── Publish ───────────────────────────────────────────────────────────────

  /// Publish `payload` to `topic` under the retry policy.
  ///
  /// Strings are sent as-is; anything else is serialised as JSON.
  pub async fn publish(&self, topic: &str, payload: &Value) -> Result<Delivery> {
    let body = match payload {
      Value::String(s) => Ok(s.clone()),
      other => serde_json::to_string(other).map_err(Error::from),
    };

    let sent = match body {
      Ok(body) => {
        let body = &body;
        self
          .retry
          .run(move || async move {
            self
              .transport
              .publish(topic, body.clone())
              .await
              .map_err(Error::from)
          })
          .await
      }
      Err(error) => Err(error),
    };

    sent.map_err(|e| {
      e.scoped(
        ErrorContext::new(Scope::Publish)
          .topic(topic)
          .payload(payload.clone()),
      )
    })?;

    debug!(topic, "published");
    Ok(Delivery::Published { topic: topic.to_owned(), payload: payload.clone() })
  }
}
