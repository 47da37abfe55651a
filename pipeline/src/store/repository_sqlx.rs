use anyhow::{Context, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use crate::feed::types::{OrderBookData, OrderBookUpdate, PriceLevel, StoredUpdate};
use crate::signal::types::TradeSignal;
use crate::store::{SignalRepository, UpdateStore};
use crate::time::{from_ms, now_ms};

/// SQLx-backed Update Store.
/// Responsible only for persistence and row mapping. Rows older than the
/// retention policy are hidden from reads here and deleted by the schema
/// trigger on the next insert (see `db::schema`).
pub struct SqlxUpdateStore {
    pool: AnyPool,
}

impl SqlxUpdateStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UpdateStore for SqlxUpdateStore {
    async fn append(&self, update: &OrderBookUpdate) -> anyhow::Result<i64> {
        let d = &update.data;
        let bids = serde_json::to_string(&d.bid_updates).context("encode bids")?;
        let asks = serde_json::to_string(&d.ask_updates).context("encode asks")?;

        let row = sqlx::query(
            r#"
INSERT INTO order_book_updates
  (event_type, event_time, symbol, first_update_id, final_update_id, bids, asks, ts_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
RETURNING seq;
"#,
        )
        .bind(d.event_type.clone())
        .bind(d.event_time)
        .bind(d.symbol.clone())
        .bind(d.first_update_id)
        .bind(d.final_update_id)
        .bind(bids)
        .bind(asks)
        .bind(update.timestamp.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .context("insert order book update")?;

        Ok(row.get::<i64, _>("seq"))
    }

    async fn query_latest(&self, limit: usize) -> anyhow::Result<Vec<StoredUpdate>> {
        let limit = i64::try_from(limit).map_err(|_| anyhow!("limit too large: {limit}"))?;

        let rows = sqlx::query(
            r#"
SELECT
  seq, event_type, event_time, symbol,
  first_update_id, final_update_id,
  bids, asks, ts_ms, created_at_ms
FROM order_book_updates u
WHERE NOT EXISTS (
  SELECT 1 FROM retention_policies p
  WHERE p.collection = 'order_book_updates'
    AND u.created_at_ms < ? - 1000 * p.expire_after_secs
)
ORDER BY ts_ms DESC, seq DESC
LIMIT ?;
"#,
        )
        .bind(now_ms() as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("query latest order book updates")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_update(&r) {
                Ok(u) => out.push(u),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the window
                    tracing::warn!(error = %e, "skipping malformed order book row");
                }
            }
        }

        Ok(out)
    }
}

/// SQLx-backed record store for derived signals.
pub struct SqlxSignalRepository {
    pool: AnyPool,
}

impl SqlxSignalRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignalRepository for SqlxSignalRepository {
    async fn save_signal(&self, signal: &TradeSignal) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO trade_signals (signal, short_sma, long_sma, ts_ms)
VALUES (?, ?, ?, ?);
"#,
        )
        .bind(signal.signal.as_str())
        .bind(signal.short_sma)
        .bind(signal.long_sma)
        .bind(signal.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("insert trade signal")?;

        Ok(())
    }
}

/* =========================
Row mapping
========================= */

fn row_to_update(r: &sqlx::any::AnyRow) -> anyhow::Result<StoredUpdate> {
    let seq: i64 = r.try_get("seq")?;

    let bids: Vec<PriceLevel> =
        serde_json::from_str(&r.try_get::<String, _>("bids")?).context("invalid bids json")?;
    let asks: Vec<PriceLevel> =
        serde_json::from_str(&r.try_get::<String, _>("asks")?).context("invalid asks json")?;

    Ok(StoredUpdate {
        seq,
        update: OrderBookUpdate {
            data: OrderBookData {
                event_type: r.try_get("event_type")?,
                event_time: r.try_get("event_time")?,
                symbol: r.try_get("symbol")?,
                first_update_id: r.try_get("first_update_id")?,
                final_update_id: r.try_get("final_update_id")?,
                bid_updates: bids,
                ask_updates: asks,
            },
            timestamp: from_ms(r.try_get("ts_ms")?),
        },
        created_at: from_ms(r.try_get("created_at_ms")?),
    })
}
