//! [`HttpTransport`]: publish-with-acknowledgement over an HTTP webhook.
//!
//! Each publish is a `POST` of `{topic, payload, qos: 1}` to the configured
//! URL. A `2xx` response is the broker's acknowledgement. `429` and `503` are
//! throttling and may carry a `Retry-After` header in seconds.

use std::{future::Future, time::Duration};

use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde::Serialize;
use subcast_core::transport::{PublishError, Transport};
use tracing::debug;

use crate::Result;

#[derive(Serialize)]
struct PublishRequest<'a> {
  topic:   &'a str,
  payload: &'a str,
  qos:     u8,
}

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: Client,
  url:    String,
}

impl HttpTransport {
  pub fn new(url: impl Into<String>) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(10))
      .build()?;
    Ok(Self { client, url: url.into() })
  }

  pub fn url(&self) -> &str { &self.url }
}

impl Transport for HttpTransport {
  fn publish<'a>(
    &'a self,
    topic: &'a str,
    payload: String,
  ) -> impl Future<Output = Result<(), PublishError>> + Send + 'a {
    async move {
      let body = PublishRequest { topic, payload: &payload, qos: 1 };
      let response = self
        .client
        .post(&self.url)
        .json(&body)
        .send()
        .await
        .map_err(send_error)?;

      let status = response.status();
      if status.is_success() {
        debug!(topic, %status, "publish acknowledged");
        return Ok(());
      }

      let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
      Err(status_error(status, retry_after))
    }
  }
}

/// Connection failures and timeouts are worth another attempt.
fn send_error(error: reqwest::Error) -> PublishError {
  let message = format!("publish request failed: {error}");
  if error.is_connect() || error.is_timeout() {
    PublishError::transient(message, None)
  } else {
    PublishError::fatal(message)
  }
}

pub fn status_error(status: StatusCode, retry_after: Option<Duration>) -> PublishError {
  let message = format!("publish rejected with {status}");
  match status {
    StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
      PublishError::transient(message, retry_after)
    }
    _ => PublishError::fatal(message),
  }
}

#[cfg(test)]
mod tests {
  use subcast_core::retry::Retryable;

  use super::*;

  #[test]
  fn throttling_is_retryable_with_server_delay() {
    let err = status_error(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)));
    assert_eq!(err.retryable(), Some(true));
    assert_eq!(err.retry_delay(), Some(Duration::from_secs(3)));

    let err = status_error(StatusCode::SERVICE_UNAVAILABLE, None);
    assert_eq!(err.retryable(), Some(true));
    assert_eq!(err.retry_delay(), None);
  }

  #[test]
  fn other_statuses_are_fatal() {
    for status in [StatusCode::BAD_REQUEST, StatusCode::FORBIDDEN, StatusCode::INTERNAL_SERVER_ERROR] {
      assert_eq!(status_error(status, None).retryable(), Some(false));
    }
  }

  #[tokio::test]
  async fn refused_connection_is_retryable() {
    // Grab a free port, then close it so nothing is listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::new(format!("http://{addr}/publish")).unwrap();
    let err = transport.publish("c1", "{}".into()).await.unwrap_err();

    assert_eq!(err.retryable(), Some(true));
    assert!(err.message.starts_with("publish request failed"));
  }
}
