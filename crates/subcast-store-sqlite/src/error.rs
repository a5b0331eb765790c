//! Error type for `subcast-store-sqlite`.

use std::time::Duration;

use rusqlite::ErrorCode;
use subcast_core::retry::Retryable;
use thiserror::Error;

/// How long to back off when SQLite reports contention.
pub const BUSY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  /// `SQLITE_BUSY` and `SQLITE_LOCKED` clear up on their own.
  pub fn is_contention(&self) -> bool {
    match self {
      Error::Database(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))) => {
        matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
      }
      _ => false,
    }
  }
}

impl Retryable for Error {
  fn retryable(&self) -> Option<bool> { Some(self.is_contention()) }

  fn retry_delay(&self) -> Option<Duration> { self.is_contention().then_some(BUSY_DELAY) }
}
