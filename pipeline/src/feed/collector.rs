//! Ingestion stage: feed frames → decoded updates → Update Store.

use std::sync::Arc;

use chrono::Utc;
use common::Shutdown;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::FeedError;
use crate::feed::connector::{FeedEvent, FeedSource};
use crate::feed::types::{OrderBookData, OrderBookUpdate};
use crate::store::UpdateStore;

/// Counts of what happened to the frames of one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub frames: u64,
    pub stored: u64,
    pub decode_failures: u64,
    pub store_failures: u64,
}

pub struct DataCollectorService {
    feed: Arc<dyn FeedSource>,
    store: Arc<dyn UpdateStore>,
}

impl DataCollectorService {
    pub fn new(feed: Arc<dyn FeedSource>, store: Arc<dyn UpdateStore>) -> Self {
        Self { feed, store }
    }

    /// Runs until shutdown, a clean end of the feed, or a surfaced fault.
    ///
    /// Connection exhaustion and reader faults are returned; malformed
    /// payloads and failed appends are logged and skipped.
    #[instrument(skip_all, target = "collector")]
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<IngestStats, FeedError> {
        let mut feed = self.feed.open(shutdown.clone()).await?;
        info!("collector connected; ingesting");

        let mut stats = IngestStats::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    info!(?stats, "termination signal received, shutting down");
                    feed.close();
                    return Ok(stats);
                }
                ev = feed.next() => ev,
            };

            match event {
                FeedEvent::Frame(payload) => self.ingest(&payload, &mut stats).await,
                FeedEvent::Fault(fault) => {
                    warn!(error = %fault, ?stats, "feed reader faulted");
                    return Err(fault);
                }
                FeedEvent::Closed => {
                    info!(?stats, "feed closed");
                    return Ok(stats);
                }
            }
        }
    }

    async fn ingest(&self, payload: &[u8], stats: &mut IngestStats) {
        stats.frames += 1;
        trace!(bytes = payload.len(), "frame received");

        let data = match OrderBookData::decode(payload) {
            Ok(d) => d,
            Err(e) => {
                stats.decode_failures += 1;
                warn!(error = %e, "skipping undecodable payload");
                return;
            }
        };

        let update = OrderBookUpdate {
            data,
            timestamp: Utc::now(),
        };

        match self.store.append(&update).await {
            Ok(seq) => {
                stats.stored += 1;
                debug!(seq, symbol = %update.data.symbol, "order book update stored");
            }
            Err(e) => {
                stats.store_failures += 1;
                warn!(error = ?e, "failed to save order book update");
            }
        }
    }
}
