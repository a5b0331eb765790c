//! Retry combinator for transient registry and transport failures.
//!
//! [`retry`] re-runs an operation while a decision function says the failure
//! is retryable and the attempt budget is not exhausted. Unset fields of the
//! decision are filled from the error itself through [`Retryable`].

use std::{fmt, future::Future, sync::Arc, time::Duration};

use tracing::debug;

use crate::{Error, Result};

/// Delay used when neither the decision nor the error suggests one.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

/// Retry budget used when the decision does not set one.
pub const DEFAULT_MAX: u32 = 1;

/// Retry budget of [`RetryPolicy::default`].
pub const DEFAULT_POLICY_MAX: u32 = 5;

// ─── Retryable ───────────────────────────────────────────────────────────────

/// Retry hints an error may carry about itself.
pub trait Retryable {
  /// Whether the failure is transient. `None` means "no opinion".
  fn retryable(&self) -> Option<bool> { None }

  /// How long the failing side asked us to wait.
  fn retry_delay(&self) -> Option<Duration> { None }
}

// ─── Decision ────────────────────────────────────────────────────────────────

/// A possibly partial decision for one failed attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryDecision {
  pub retryable: Option<bool>,
  pub delay:     Option<Duration>,
  pub max:       Option<u32>,
}

impl RetryDecision {
  pub fn max(max: u32) -> Self { Self { max: Some(max), ..Self::default() } }

  pub fn with_retryable(mut self, retryable: bool) -> Self {
    self.retryable = Some(retryable);
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn with_max(mut self, max: u32) -> Self {
    self.max = Some(max);
    self
  }

  fn resolve<E: Retryable + ?Sized>(self, error: &E) -> Resolved {
    Resolved {
      retryable: self
        .retryable
        .or_else(|| error.retryable())
        .unwrap_or(false),
      delay:     self
        .delay
        .or_else(|| error.retry_delay())
        .unwrap_or(DEFAULT_DELAY),
      max:       self.max.unwrap_or(DEFAULT_MAX),
    }
  }
}

/// A bare integer is shorthand for `{ max }`.
impl From<u32> for RetryDecision {
  fn from(max: u32) -> Self { Self::max(max) }
}

struct Resolved {
  retryable: bool,
  delay:     Duration,
  max:       u32,
}

// ─── Combinator ──────────────────────────────────────────────────────────────

/// Run `operation`, retrying failures according to `decide`.
///
/// `decide` receives the error and the zero-based index of the attempt that
/// produced it. The original error is returned untouched once the decision
/// says to stop. Dropping the returned future cancels any pending delay.
pub async fn retry<T, E, Op, Fut, D, R>(mut operation: Op, decide: D) -> Result<T, E>
where
  Op: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: Retryable,
  D: Fn(&E, u32) -> R,
  R: Into<RetryDecision>,
{
  let mut attempt = 0u32;
  loop {
    let error = match operation().await {
      Ok(value) => return Ok(value),
      Err(error) => error,
    };

    let decision = decide(&error, attempt).into().resolve(&error);
    if !decision.retryable || attempt >= decision.max {
      return Err(error);
    }

    debug!(attempt, delay_ms = decision.delay.as_millis() as u64, "retrying after failure");
    tokio::time::sleep(decision.delay).await;
    attempt += 1;
  }
}

// ─── Policy ──────────────────────────────────────────────────────────────────

type Decide = dyn Fn(&Error, u32) -> RetryDecision + Send + Sync;

/// A stored decision function applied to dispatcher operations.
///
/// Cloning is cheap; the decision function is reference-counted.
#[derive(Clone)]
pub struct RetryPolicy {
  decide: Arc<Decide>,
}

impl RetryPolicy {
  pub fn new<D, R>(decide: D) -> Self
  where
    D: Fn(&Error, u32) -> R + Send + Sync + 'static,
    R: Into<RetryDecision>,
  {
    Self { decide: Arc::new(move |error, attempt| decide(error, attempt).into()) }
  }

  /// Retry up to `max` times, taking retryability and delay from the error.
  pub fn max(max: u32) -> Self { Self::new(move |_, _| max) }

  pub fn never() -> Self { Self::max(0) }

  pub async fn run<T, Op, Fut>(&self, operation: Op) -> Result<T>
  where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let decide = &self.decide;
    retry(operation, |error: &Error, attempt| (**decide)(error, attempt)).await
  }
}

impl Default for RetryPolicy {
  fn default() -> Self { Self::max(DEFAULT_POLICY_MAX) }
}

impl fmt::Debug for RetryPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryPolicy").finish_non_exhaustive()
  }
}
