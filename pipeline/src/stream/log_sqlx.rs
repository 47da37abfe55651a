use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Any, AnyPool, Row, Transaction};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::StreamError;
use crate::stream::{Fields, GroupStart, PendingEntry, SignalLog, StreamId, StreamMessage};
use crate::time::now_ms;

/// How often a blocking read re-checks the log.
const BLOCK_POLL: Duration = Duration::from_millis(50);

/// SQLx-backed Signal Log.
///
/// Entries live in `stream_entries`; each group keeps a high-water mark in
/// `stream_groups` and its unacked deliveries in `stream_pending`.
pub struct SqlxSignalLog {
    pool: AnyPool,
}

impl SqlxSignalLog {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// One non-blocking read. Runs in a single transaction that takes the
    /// write lock up front, so two consumers of a group never claim the
    /// same entry.
    async fn read_once(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
UPDATE stream_groups
SET last_delivered_id = last_delivered_id
WHERE stream = ? AND group_name = ?;
"#,
        )
        .bind(stream)
        .bind(group)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            return Err(StreamError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }

        let now = now_ms() as i64;
        let mut out = redeliver(&mut tx, stream, group, consumer, count, now).await?;

        let remaining = count.saturating_sub(out.len());
        if remaining > 0 {
            out.extend(deliver_new(&mut tx, stream, group, consumer, remaining, now).await?);
        }

        tx.commit().await?;
        Ok(out)
    }
}

#[async_trait]
impl SignalLog for SqlxSignalLog {
    #[instrument(skip(self, fields), target = "stream")]
    async fn publish(&self, stream: &str, fields: &Fields) -> Result<StreamId, StreamError> {
        let encoded =
            serde_json::to_string(fields).map_err(|e| StreamError::Corrupt(e.to_string()))?;

        let row = sqlx::query(
            r#"
INSERT INTO stream_entries (stream, fields, created_ms)
VALUES (?, ?, ?)
RETURNING id;
"#,
        )
        .bind(stream)
        .bind(encoded)
        .bind(now_ms() as i64)
        .fetch_one(&self.pool)
        .await?;

        let id = StreamId(row.try_get::<i64, _>("id")?);
        debug!(%id, "entry appended");
        Ok(id)
    }

    #[instrument(skip(self), target = "stream")]
    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<bool, StreamError> {
        let start_id: i64 = match start {
            GroupStart::Beginning => 0,
            GroupStart::Latest => sqlx::query(
                "SELECT COALESCE(MAX(id), 0) AS last_id FROM stream_entries WHERE stream = ?;",
            )
            .bind(stream)
            .fetch_one(&self.pool)
            .await?
            .try_get("last_id")?,
        };

        let res = sqlx::query(
            r#"
INSERT INTO stream_groups (stream, group_name, last_delivered_id, created_ms)
VALUES (?, ?, ?, ?)
ON CONFLICT (stream, group_name) DO NOTHING;
"#,
        )
        .bind(stream)
        .bind(group)
        .bind(start_id)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;

        let created = res.rows_affected() > 0;
        if created {
            debug!(start_id, "consumer group created");
        } else {
            debug!("consumer group already exists");
        }
        Ok(created)
    }

    #[instrument(skip(self), target = "stream")]
    async fn read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        let deadline = block.map(|b| Instant::now() + b);

        loop {
            let batch = self.read_once(stream, group, consumer, count).await?;
            if !batch.is_empty() {
                debug!(delivered = batch.len(), "entries delivered");
                return Ok(batch);
            }

            let Some(deadline) = deadline else {
                return Ok(batch);
            };
            let now = Instant::now();
            if now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(BLOCK_POLL.min(deadline - now)).await;
        }
    }

    #[instrument(skip(self), target = "stream")]
    async fn ack(&self, stream: &str, group: &str, id: StreamId) -> Result<bool, StreamError> {
        let res = sqlx::query(
            "DELETE FROM stream_pending WHERE stream = ? AND group_name = ? AND entry_id = ?;",
        )
        .bind(stream)
        .bind(group)
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, StreamError> {
        let rows = sqlx::query(
            r#"
SELECT entry_id, consumer, delivery_count
FROM stream_pending
WHERE stream = ? AND group_name = ?
ORDER BY entry_id ASC;
"#,
        )
        .bind(stream)
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<PendingEntry, StreamError> {
                Ok(PendingEntry {
                    id: StreamId(r.try_get("entry_id")?),
                    consumer: r.try_get("consumer")?,
                    delivery_count: delivery_count(r.try_get("delivery_count")?),
                })
            })
            .collect()
    }
}

/// The consumer's own unacked entries, oldest first, with their delivery
/// count bumped.
async fn redeliver(
    tx: &mut Transaction<'static, Any>,
    stream: &str,
    group: &str,
    consumer: &str,
    count: usize,
    now: i64,
) -> Result<Vec<StreamMessage>, StreamError> {
    let rows = sqlx::query(
        r#"
SELECT e.id, e.fields, p.delivery_count
FROM stream_pending p
JOIN stream_entries e ON e.id = p.entry_id
WHERE p.stream = ? AND p.group_name = ? AND p.consumer = ?
ORDER BY e.id ASC
LIMIT ?;
"#,
    )
    .bind(stream)
    .bind(group)
    .bind(consumer)
    .bind(count as i64)
    .fetch_all(&mut **tx)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        let id: i64 = r.try_get("id")?;
        let previous: i64 = r.try_get("delivery_count")?;

        sqlx::query(
            r#"
UPDATE stream_pending
SET delivery_count = delivery_count + 1, last_delivered_ms = ?
WHERE stream = ? AND group_name = ? AND entry_id = ?;
"#,
        )
        .bind(now)
        .bind(stream)
        .bind(group)
        .bind(id)
        .execute(&mut **tx)
        .await?;

        out.push(StreamMessage {
            id: StreamId(id),
            fields: decode_fields(id, &r.try_get::<String, _>("fields")?)?,
            delivery_count: delivery_count(previous + 1),
        });
    }

    if !out.is_empty() {
        debug!(count = out.len(), "redelivering pending entries");
    }
    Ok(out)
}

/// Entries past the group's high-water mark. Claims them for `consumer` and
/// advances the mark.
async fn deliver_new(
    tx: &mut Transaction<'static, Any>,
    stream: &str,
    group: &str,
    consumer: &str,
    count: usize,
    now: i64,
) -> Result<Vec<StreamMessage>, StreamError> {
    let rows = sqlx::query(
        r#"
SELECT e.id, e.fields
FROM stream_entries e
JOIN stream_groups g ON g.stream = e.stream AND g.group_name = ?
WHERE e.stream = ? AND e.id > g.last_delivered_id
ORDER BY e.id ASC
LIMIT ?;
"#,
    )
    .bind(group)
    .bind(stream)
    .bind(count as i64)
    .fetch_all(&mut **tx)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    let mut high_water = None;

    for r in rows {
        let id: i64 = r.try_get("id")?;
        high_water = Some(id);

        let fields = match decode_fields(id, &r.try_get::<String, _>("fields")?) {
            Ok(f) => f,
            Err(e) => {
                // the group moves past it; it is never pending
                warn!(stream, group, entry_id = id, error = %e, "skipping corrupt stream entry");
                continue;
            }
        };

        sqlx::query(
            r#"
INSERT INTO stream_pending
  (stream, group_name, entry_id, consumer, delivery_count, last_delivered_ms)
VALUES (?, ?, ?, ?, 1, ?);
"#,
        )
        .bind(stream)
        .bind(group)
        .bind(id)
        .bind(consumer)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        out.push(StreamMessage {
            id: StreamId(id),
            fields,
            delivery_count: 1,
        });
    }

    if let Some(last) = high_water {
        sqlx::query(
            "UPDATE stream_groups SET last_delivered_id = ? WHERE stream = ? AND group_name = ?;",
        )
        .bind(last)
        .bind(stream)
        .bind(group)
        .execute(&mut **tx)
        .await?;
    }

    Ok(out)
}

/* =========================
Row mapping
========================= */

fn decode_fields(id: i64, raw: &str) -> Result<Fields, StreamError> {
    serde_json::from_str(raw).map_err(|e| StreamError::Corrupt(format!("entry {id}: {e}")))
}

fn delivery_count(raw: i64) -> u32 {
    u32::try_from(raw).unwrap_or(u32::MAX)
}
