//! [`SqliteRegistry`]: the SQLite implementation of [`Registry`].

use std::path::Path;

use chrono::{DateTime, Utc};
use subcast_core::{record::SubscriptionRecord, registry::Registry};
use tracing::debug;

use crate::{
  Error, Result,
  encode::{COLUMNS, RawRecord, decode},
  schema::SCHEMA,
};

/// A subscription registry backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteRegistry {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteRegistry {
  /// Open (or create) a registry at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let registry = Self { conn };
    registry.init_schema().await?;
    Ok(registry)
  }

  /// Open an in-memory registry, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let registry = Self { conn };
    registry.init_schema().await?;
    Ok(registry)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Delete every record whose ttl is at or before `now`.
  pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
    let now = now.timestamp();
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM subscriptions WHERE ttl <= ?1", rusqlite::params![now])?)
      })
      .await?;

    debug!(removed, "purged expired subscriptions");
    Ok(removed as u64)
  }

  /// Number of stored rows, expired or not.
  pub async fn count(&self) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM subscriptions", [], |r| r.get(0))?)
      })
      .await?;
    Ok(count as u64)
  }
}

impl Registry for SqliteRegistry {
  type Error = Error;

  async fn upsert(&self, record: SubscriptionRecord) -> Result<()> {
    let raw = RawRecord::from_record(&record);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO subscriptions ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (client_id, id) DO UPDATE SET
               topic    = excluded.topic,
               query    = excluded.query,
               document = excluded.document,
               ttl      = excluded.ttl"
          ),
          rusqlite::params![raw.client_id, raw.id, raw.topic, raw.query, raw.document, raw.ttl],
        )?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn clear<'a>(&'a self, client_id: &'a str) -> Result<u64> {
    let client_id = client_id.to_owned();

    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM subscriptions WHERE client_id = ?1",
          rusqlite::params![client_id],
        )?)
      })
      .await?;

    Ok(removed as u64)
  }

  async fn query_by_topic<'a>(&'a self, topic: &'a str) -> Result<Vec<SubscriptionRecord>> {
    let topic = topic.to_owned();
    let now = Utc::now().timestamp();

    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {COLUMNS} FROM subscriptions
           WHERE topic = ?1 AND ttl > ?2
           ORDER BY client_id, id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![topic, now], RawRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(decode(raws))
  }
}
