//! SQL schema for the SQLite subscription registry.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per (client, subscription). `id` is a fingerprint of topic and
-- query, so re-subscribing overwrites in place.
CREATE TABLE IF NOT EXISTS subscriptions (
    client_id  TEXT    NOT NULL,
    id         TEXT    NOT NULL,
    topic      TEXT    NOT NULL,
    query      TEXT    NOT NULL,   -- JSON-encoded QueryDescriptor
    document   TEXT,               -- validated source; NULL for local queries
    ttl        INTEGER NOT NULL,   -- epoch seconds
    PRIMARY KEY (client_id, id)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_topic ON subscriptions(topic);
CREATE INDEX IF NOT EXISTS idx_subscriptions_ttl   ON subscriptions(ttl);
";
