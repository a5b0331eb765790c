//! In-memory collaborators for dispatcher tests.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  future::Future,
  sync::{
    Mutex,
    atomic::{AtomicU32, Ordering},
  },
  time::Duration,
};

use thiserror::Error;

use crate::{
  document::Document,
  engine::{Engine, ExecuteRequest, ExecutionResult, GraphqlError},
  projection::ProjectionEngine,
  record::SubscriptionRecord,
  registry::Registry,
  retry::{RetryDecision, RetryPolicy, Retryable},
  transport::{PublishError, Transport},
};

pub const FAST: Duration = Duration::from_millis(1);

/// The default dispatcher policy with a 1ms delay.
pub fn fast_retry() -> RetryPolicy { RetryPolicy::new(|_, _| RetryDecision::max(5).with_delay(FAST)) }

// ─── Registry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  Upsert,
  Clear,
  Query,
}

#[derive(Debug, Clone, Copy, Error)]
#[error("injected registry failure")]
pub struct Injected {
  pub retryable: bool,
}

impl Retryable for Injected {
  fn retryable(&self) -> Option<bool> { Some(self.retryable) }

  fn retry_delay(&self) -> Option<Duration> { Some(FAST) }
}

/// A registry keyed like the real one, with scripted failures.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
  rows:     Mutex<BTreeMap<(String, String), SubscriptionRecord>>,
  failures: Mutex<HashMap<Op, (u32, bool)>>,
  calls:    Mutex<HashMap<Op, u32>>,
}

impl MemoryRegistry {
  /// Fail the next `times` calls of `op`.
  pub fn fail(&self, op: Op, times: u32, retryable: bool) {
    self.failures.lock().unwrap().insert(op, (times, retryable));
  }

  pub fn calls(&self, op: Op) -> u32 { self.calls.lock().unwrap().get(&op).copied().unwrap_or(0) }

  pub fn len(&self) -> usize { self.rows.lock().unwrap().len() }

  pub fn records(&self) -> Vec<SubscriptionRecord> {
    self.rows.lock().unwrap().values().cloned().collect()
  }

  pub fn insert(&self, record: SubscriptionRecord) {
    self
      .rows
      .lock()
      .unwrap()
      .insert((record.client_id.clone(), record.id.clone()), record);
  }

  fn enter(&self, op: Op) -> Result<(), Injected> {
    *self.calls.lock().unwrap().entry(op).or_default() += 1;

    let mut failures = self.failures.lock().unwrap();
    match failures.get_mut(&op) {
      Some((remaining, retryable)) if *remaining > 0 => {
        *remaining -= 1;
        Err(Injected { retryable: *retryable })
      }
      _ => Ok(()),
    }
  }
}

impl Registry for MemoryRegistry {
  type Error = Injected;

  async fn upsert(&self, record: SubscriptionRecord) -> Result<(), Injected> {
    self.enter(Op::Upsert)?;
    self.insert(record);
    Ok(())
  }

  async fn clear<'a>(&'a self, client_id: &'a str) -> Result<u64, Injected> {
    self.enter(Op::Clear)?;
    let mut rows = self.rows.lock().unwrap();
    let before = rows.len();
    rows.retain(|(owner, _), _| owner != client_id);
    Ok((before - rows.len()) as u64)
  }

  async fn query_by_topic<'a>(&'a self, topic: &'a str) -> Result<Vec<SubscriptionRecord>, Injected> {
    self.enter(Op::Query)?;
    Ok(
      self
        .rows
        .lock()
        .unwrap()
        .values()
        .filter(|r| r.topic == topic)
        .cloned()
        .collect(),
    )
  }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Records every publish. Publishes to `failing` topics always fail.
#[derive(Debug, Default)]
pub struct RecordingTransport {
  sent:     Mutex<Vec<(String, String)>>,
  failing:  Mutex<HashSet<String>>,
  attempts: AtomicU32,
}

impl RecordingTransport {
  pub fn fail_topic(&self, topic: &str) { self.failing.lock().unwrap().insert(topic.to_owned()); }

  pub fn sent(&self) -> Vec<(String, String)> { self.sent.lock().unwrap().clone() }

  pub fn sent_to(&self, topic: &str) -> Vec<serde_json::Value> {
    self
      .sent()
      .into_iter()
      .filter(|(t, _)| t == topic)
      .map(|(_, body)| serde_json::from_str(&body).unwrap())
      .collect()
  }

  pub fn attempts(&self) -> u32 { self.attempts.load(Ordering::SeqCst) }
}

impl Transport for RecordingTransport {
  fn publish<'a>(
    &'a self,
    topic: &'a str,
    payload: String,
  ) -> impl Future<Output = Result<(), PublishError>> + Send + 'a {
    async move {
      self.attempts.fetch_add(1, Ordering::SeqCst);
      if self.failing.lock().unwrap().contains(topic) {
        return Err(PublishError::transient("broker unavailable", Some(FAST)));
      }
      self.sent.lock().unwrap().push((topic.to_owned(), payload));
      Ok(())
    }
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// A [`ProjectionEngine`] that counts executions.
#[derive(Debug)]
pub struct CountingEngine {
  inner:      ProjectionEngine,
  executions: AtomicU32,
}

impl CountingEngine {
  pub fn new<I, S>(fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self { inner: ProjectionEngine::new(fields), executions: AtomicU32::new(0) }
  }

  pub fn executions(&self) -> u32 { self.executions.load(Ordering::SeqCst) }
}

impl Engine for CountingEngine {
  fn validate(&self, document: &Document) -> Vec<GraphqlError> { self.inner.validate(document) }

  fn execute<'a>(
    &'a self,
    request: ExecuteRequest<'a>,
  ) -> impl Future<Output = ExecutionResult> + Send + 'a {
    self.executions.fetch_add(1, Ordering::SeqCst);
    self.inner.execute(request)
  }
}
