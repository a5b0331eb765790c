//! Error types and axum `IntoResponse` implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Dispatch(#[from] subcast_core::Error),

  #[error("http client error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("configuration error: {0}")]
  Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Status code for a dispatcher failure, by what went wrong underneath.
pub fn status_for(error: &subcast_core::Error) -> StatusCode {
  use subcast_core::Error as Core;

  match error.root() {
    Core::MissingSource | Core::InvalidSource { .. } | Core::UnknownEvent(_) => {
      StatusCode::UNPROCESSABLE_ENTITY
    }
    Core::Registry { .. } | Core::Publish(_) => StatusCode::BAD_GATEWAY,
    _ => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    match self {
      Error::Dispatch(e) => {
        let status = status_for(&e);
        if status.is_server_error() {
          tracing::warn!(error = %e, "event failed");
        }
        let body = json!({
          "message": e.root().to_string(),
          "error": e.context(),
        });
        (status, Json(body)).into_response()
      }
      Error::Http(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
      Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
    }
  }
}
