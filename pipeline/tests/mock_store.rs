#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Mutex;

use pipeline::consumer::{ActionDispatcher, ProcessedLog, ProcessedRecord, TradeAction};
use pipeline::feed::{OrderBookData, OrderBookUpdate, StoredUpdate};
use pipeline::signal::TradeSignal;
use pipeline::store::{SignalRepository, UpdateStore};
use pipeline::error::StreamError;
use pipeline::stream::{
    Fields, GroupStart, PendingEntry, SignalLog, SignalPublisher, StreamId, StreamMessage,
    signal_fields,
};

/// Depth update whose first bid delta is `price`; `None` means no bids.
pub fn update(seq: i64, price: Option<&str>) -> OrderBookUpdate {
    let bids = match price {
        Some(p) => vec![vec![p.to_string(), "1.0".to_string()]],
        None => vec![],
    };

    OrderBookUpdate {
        data: OrderBookData {
            event_type: "depthUpdate".into(),
            event_time: 1_700_000_000_000 + seq,
            symbol: "BTCUSDT".into(),
            first_update_id: seq * 10,
            final_update_id: seq * 10 + 9,
            bid_updates: bids,
            ask_updates: vec![vec!["99999".into(), "1".into()]],
        },
        timestamp: Utc
            .timestamp_millis_opt(1_700_000_000_000 + seq * 1_000)
            .unwrap(),
    }
}

/// In-memory Update Store; appends in order, reads newest first.
#[derive(Default, Clone)]
pub struct MockUpdateStore {
    pub rows: Arc<Mutex<Vec<StoredUpdate>>>,
    pub delay: Option<Duration>,
    pub fail: bool,
}

impl MockUpdateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test convenience: store one update per price, oldest first.
    pub async fn with_prices(prices: &[Option<&str>]) -> Self {
        let store = Self::new();
        for (i, p) in prices.iter().enumerate() {
            store.append(&update(i as i64, *p)).await.unwrap();
        }
        store
    }
}

#[async_trait]
impl UpdateStore for MockUpdateStore {
    async fn append(&self, update: &OrderBookUpdate) -> anyhow::Result<i64> {
        if self.fail {
            return Err(anyhow!("store unavailable"));
        }
        let mut rows = self.rows.lock().await;
        let seq = rows.len() as i64 + 1;
        rows.push(StoredUpdate {
            seq,
            update: update.clone(),
            created_at: Utc::now(),
        });
        Ok(seq)
    }

    async fn query_latest(&self, limit: usize) -> anyhow::Result<Vec<StoredUpdate>> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.fail {
            return Err(anyhow!("store unavailable"));
        }
        Ok(self.rows.lock().await.iter().rev().take(limit).cloned().collect())
    }
}

#[derive(Default, Clone)]
pub struct MockSignalRepository {
    pub saved: Arc<Mutex<Vec<TradeSignal>>>,
    pub fail: bool,
}

impl MockSignalRepository {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SignalRepository for MockSignalRepository {
    async fn save_signal(&self, signal: &TradeSignal) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow!("record store unavailable"));
        }
        self.saved.lock().await.push(signal.clone());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MockPublisher {
    pub published: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
    pub fail: bool,
}

impl MockPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SignalPublisher for MockPublisher {
    async fn publish_signal(&self, signal: &TradeSignal) -> anyhow::Result<StreamId> {
        if self.fail {
            return Err(anyhow!("log unavailable"));
        }
        let mut published = self.published.lock().await;
        published.push(signal_fields(signal));
        Ok(StreamId(published.len() as i64))
    }
}

/// Output log that always fails to write.
#[derive(Default, Clone)]
pub struct FailingProcessedLog;

#[async_trait]
impl ProcessedLog for FailingProcessedLog {
    async fn write(&self, _stream: &str, _record: &ProcessedRecord) -> anyhow::Result<bool> {
        Err(anyhow!("output log unavailable"))
    }
}

/// Dispatcher that records what it was asked to do.
#[derive(Default, Clone)]
pub struct RecordingDispatcher {
    pub actions: Arc<Mutex<Vec<(StreamId, TradeAction)>>>,
}

impl RecordingDispatcher {
    pub async fn taken(&self) -> Vec<TradeAction> {
        self.actions
            .lock()
            .await
            .iter()
            .map(|(_, a)| a.clone())
            .collect()
    }
}

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, id: StreamId, action: &TradeAction) {
        self.actions.lock().await.push((id, action.clone()));
    }
}

/// Signal Log whose first `failures` acks fail; everything else goes to
/// the wrapped log.
pub struct FlakyAckLog {
    inner: Arc<dyn SignalLog>,
    failures: AtomicU32,
}

impl FlakyAckLog {
    pub fn new(inner: Arc<dyn SignalLog>, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl SignalLog for FlakyAckLog {
    async fn publish(&self, stream: &str, fields: &Fields) -> Result<StreamId, StreamError> {
        self.inner.publish(stream, fields).await
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<bool, StreamError> {
        self.inner.ensure_group(stream, group, start).await
    }

    async fn read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        self.inner.read(stream, group, consumer, count, block).await
    }

    async fn ack(&self, stream: &str, group: &str, id: StreamId) -> Result<bool, StreamError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StreamError::Corrupt("ack refused".into()));
        }
        self.inner.ack(stream, group, id).await
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, StreamError> {
        self.inner.pending(stream, group).await
    }
}
