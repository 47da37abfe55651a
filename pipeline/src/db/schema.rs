//! SQLite schema for the Update Store, the signal record store and the
//! Signal Log. Every statement is idempotent, so `migrate` runs on each
//! start of every stage.

use std::time::Duration;

use anyhow::Context;
use sqlx::AnyPool;

pub const UPDATES_TABLE: &str = "order_book_updates";

pub async fn migrate(pool: &AnyPool, retention: Duration) -> anyhow::Result<()> {
    // Update Store. `seq` gives a stable order among equal timestamps and
    // `created_at_ms` is assigned by the database, never by the writer.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS order_book_updates (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  event_type TEXT NOT NULL,
  event_time BIGINT NOT NULL,
  symbol TEXT NOT NULL,
  first_update_id BIGINT NOT NULL,
  final_update_id BIGINT NOT NULL,
  bids TEXT NOT NULL,
  asks TEXT NOT NULL,
  ts_ms BIGINT NOT NULL,
  created_at_ms BIGINT NOT NULL
    DEFAULT (CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER))
);
"#,
    )
    .execute(pool)
    .await
    .context("create order_book_updates")?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_updates_ts ON order_book_updates(ts_ms, seq);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_updates_created ON order_book_updates(created_at_ms);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS retention_policies (
  collection TEXT PRIMARY KEY,
  expire_after_secs BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
INSERT INTO retention_policies (collection, expire_after_secs) VALUES (?, ?)
ON CONFLICT(collection) DO UPDATE SET expire_after_secs = excluded.expire_after_secs;
"#,
    )
    .bind(UPDATES_TABLE)
    .bind(i64::try_from(retention.as_secs()).unwrap_or(i64::MAX))
    .execute(pool)
    .await
    .context("apply retention policy")?;

    // Store-side expiry: the only path that removes updates.
    sqlx::query(
        r#"
CREATE TRIGGER IF NOT EXISTS order_book_updates_expire
AFTER INSERT ON order_book_updates
BEGIN
  DELETE FROM order_book_updates
  WHERE created_at_ms < NEW.created_at_ms - 1000 * (
    SELECT expire_after_secs FROM retention_policies
    WHERE collection = 'order_book_updates'
  );
END;
"#,
    )
    .execute(pool)
    .await
    .context("create expiry trigger")?;

    // Signal records
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS trade_signals (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  signal TEXT NOT NULL,
  short_sma REAL NOT NULL,
  long_sma REAL NOT NULL,
  ts_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Signal Log
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS stream_entries (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  stream TEXT NOT NULL,
  fields TEXT NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_entries_stream ON stream_entries(stream, id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS stream_groups (
  stream TEXT NOT NULL,
  group_name TEXT NOT NULL,
  last_delivered_id BIGINT NOT NULL,
  created_ms BIGINT NOT NULL,
  PRIMARY KEY (stream, group_name)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS stream_pending (
  stream TEXT NOT NULL,
  group_name TEXT NOT NULL,
  entry_id BIGINT NOT NULL,
  consumer TEXT NOT NULL,
  delivery_count BIGINT NOT NULL,
  last_delivered_ms BIGINT NOT NULL,
  PRIMARY KEY (stream, group_name, entry_id)
);
"#,
    )
    .execute(pool)
    .await?;

    // Consumer output log, one row per original message id.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS processed_records (
  stream TEXT NOT NULL,
  original_id TEXT NOT NULL,
  original_data TEXT NOT NULL,
  processed INTEGER NOT NULL CHECK (processed IN (0,1)),
  processed_at TEXT NOT NULL,
  written_ms BIGINT NOT NULL,
  PRIMARY KEY (stream, original_id)
);
"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
