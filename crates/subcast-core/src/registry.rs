//! The `Registry` trait: persistence of subscription records.
//!
//! The trait is implemented by storage backends (e.g. `subcast-store-sqlite`).
//! The dispatcher depends on this abstraction, never on a concrete backend.

use std::future::Future;

use crate::{record::SubscriptionRecord, retry::Retryable};

/// Abstraction over a subscription registry backend.
///
/// Records are keyed by `(client_id, id)`. Because `id` is a fingerprint of
/// topic and query, an upsert of an identical subscription is idempotent.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait Registry: Send + Sync {
  /// Backend error. Retry hints flow into the dispatcher's retry policy.
  type Error: std::error::Error + Retryable + Send + Sync + 'static;

  /// Insert `record`, replacing any record with the same `(client_id, id)`.
  fn upsert(
    &self,
    record: SubscriptionRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Delete every record belonging to `client_id`, returning how many went.
  ///
  /// Clearing an unknown client is not an error.
  fn clear<'a>(
    &'a self,
    client_id: &'a str,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Every live record whose topic equals `topic`, across all clients.
  fn query_by_topic<'a>(
    &'a self,
    topic: &'a str,
  ) -> impl Future<Output = Result<Vec<SubscriptionRecord>, Self::Error>> + Send + 'a;
}
