//! The `Transport` trait: publish-with-acknowledgement onto a topic.

use std::{future::Future, time::Duration};

use thiserror::Error;

use crate::retry::Retryable;

/// A failed publish, with the transport's retry hints.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PublishError {
  pub message:     String,
  pub retryable:   bool,
  pub retry_delay: Option<Duration>,
}

impl PublishError {
  pub fn transient(message: impl Into<String>, retry_delay: Option<Duration>) -> Self {
    Self { message: message.into(), retryable: true, retry_delay }
  }

  pub fn fatal(message: impl Into<String>) -> Self {
    Self { message: message.into(), retryable: false, retry_delay: None }
  }
}

impl Retryable for PublishError {
  fn retryable(&self) -> Option<bool> { Some(self.retryable) }

  fn retry_delay(&self) -> Option<Duration> { self.retry_delay }
}

/// Abstraction over the message transport.
///
/// Delivery is at-least-once: a publish that returns an error may still have
/// reached the broker. The dispatcher serialises payloads before calling this.
pub trait Transport: Send + Sync {
  /// Publish `payload` on `topic`, resolving once the broker acknowledges it.
  fn publish<'a>(
    &'a self,
    topic: &'a str,
    payload: String,
  ) -> impl Future<Output = Result<(), PublishError>> + Send + 'a;
}
