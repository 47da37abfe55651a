use anyhow::Context;
use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use crate::consumer::types::ProcessedRecord;
use crate::stream::StreamId;
use crate::time::now_ms;

/// Output log of processed records, keyed by original message id.
#[async_trait]
pub trait ProcessedLog: Send + Sync {
    /// Idempotent write: a record whose `original_id` is already present is
    /// left untouched. Returns whether a new record was stored.
    async fn write(&self, stream: &str, record: &ProcessedRecord) -> anyhow::Result<bool>;
}

pub struct SqlxProcessedLog {
    pool: AnyPool,
}

impl SqlxProcessedLog {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Every record on `stream`, in original id order.
    pub async fn records(&self, stream: &str) -> anyhow::Result<Vec<ProcessedRecord>> {
        let rows = sqlx::query(
            r#"
SELECT original_id, original_data, processed, processed_at
FROM processed_records
WHERE stream = ?
ORDER BY CAST(original_id AS INTEGER) ASC;
"#,
        )
        .bind(stream)
        .fetch_all(&self.pool)
        .await
        .context("query processed records")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_record(&r) {
                Ok(rec) => out.push(rec),
                Err(e) => tracing::warn!(error = %e, "skipping malformed processed record"),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ProcessedLog for SqlxProcessedLog {
    async fn write(&self, stream: &str, record: &ProcessedRecord) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
INSERT INTO processed_records
  (stream, original_id, original_data, processed, processed_at, written_ms)
VALUES (?, ?, ?, ?, ?, ?)
ON CONFLICT (stream, original_id) DO NOTHING;
"#,
        )
        .bind(stream)
        .bind(record.original_id.to_string())
        .bind(record.original_data.clone())
        .bind(i64::from(record.processed))
        .bind(record.processed_at.clone())
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await
        .context("insert processed record")?;

        Ok(res.rows_affected() > 0)
    }
}

/* =========================
Row mapping
========================= */

fn row_to_record(r: &sqlx::any::AnyRow) -> anyhow::Result<ProcessedRecord> {
    let id: String = r.try_get("original_id")?;

    Ok(ProcessedRecord {
        original_id: id.parse::<StreamId>().context("invalid original_id")?,
        original_data: r.try_get("original_data")?,
        processed: r.try_get::<i64, _>("processed")? != 0,
        processed_at: r.try_get("processed_at")?,
    })
}
