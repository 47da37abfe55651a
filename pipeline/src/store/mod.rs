pub mod repository_sqlx;

use anyhow::Result;
use async_trait::async_trait;

use crate::feed::types::{OrderBookUpdate, StoredUpdate};
use crate::signal::types::TradeSignal;

pub use repository_sqlx::{SqlxSignalRepository, SqlxUpdateStore};

/// Durable, time-ordered store of decoded feed updates.
///
/// Append-only: the writer never updates or deletes. Old rows disappear
/// through store-side expiry alone.
#[async_trait]
pub trait UpdateStore: Send + Sync {
    /// Inserts one update; returns its insertion sequence.
    async fn append(&self, update: &OrderBookUpdate) -> Result<i64>;

    /// The `limit` most recent updates, newest first. Equal timestamps are
    /// ordered by insertion sequence (later insert first).
    async fn query_latest(&self, limit: usize) -> Result<Vec<StoredUpdate>>;
}

/// Record store for derived signals.
#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn save_signal(&self, signal: &TradeSignal) -> Result<()>;
}
