//! Signal engine: one tick turns the latest window of updates into a signal.
//!
//! Flow per tick:
//! 1) Fetch the `long_period` most recent updates (newest first).
//! 2) Put them in chronological order.
//! 3) Refuse the tick if fewer than `long_period` of them carry a price.
//! 4) Extract prices and compute the short and long SMAs.
//! 5) Classify, then record and publish the signal.
//!
//! Recording and publishing are independent: either may fail without
//! affecting the other or the returned signal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{TraceId, child_span, root_span, warn_if_slow};
use tracing::{Instrument, debug, info, instrument, warn};

use crate::config::SignalConfig;
use crate::error::SignalError;
use crate::signal::extract::{extract_prices, priced_count};
use crate::signal::sma::latest_smas;
use crate::signal::types::{Signal, TradeSignal};
use crate::store::{SignalRepository, UpdateStore};
use crate::stream::SignalPublisher;

pub struct SignalProcessor {
    updates: Arc<dyn UpdateStore>,
    signals: Arc<dyn SignalRepository>,
    publisher: Arc<dyn SignalPublisher>,
    short_period: usize,
    long_period: usize,
}

impl SignalProcessor {
    pub fn new(
        cfg: &SignalConfig,
        updates: Arc<dyn UpdateStore>,
        signals: Arc<dyn SignalRepository>,
        publisher: Arc<dyn SignalPublisher>,
    ) -> Self {
        Self {
            updates,
            signals,
            publisher,
            short_period: cfg.short_period,
            long_period: cfg.long_period,
        }
    }

    /// Computes the current signal from the latest window and emits it.
    #[instrument(
        skip(self),
        target = "signal",
        fields(short = self.short_period, long = self.long_period)
    )]
    pub async fn generate_signal(&self) -> Result<TradeSignal, SignalError> {
        let mut window = warn_if_slow("query_latest", Duration::from_millis(250), async {
            self.updates.query_latest(self.long_period).await
        })
        .await
        .map_err(SignalError::Store)?;

        // Newest first from the store; averages want oldest first.
        window.reverse();
        let records = window.iter().map(|s| &s.update.data);

        let available = priced_count(records.clone());
        if available < self.long_period {
            debug!(
                fetched = window.len(),
                available, "not enough priced updates for a signal"
            );
            return Err(SignalError::InsufficientData {
                required: self.long_period,
                available,
            });
        }

        let prices = extract_prices(records)?;
        let (short_sma, long_sma) = latest_smas(&prices, self.short_period, self.long_period)?;

        let signal = TradeSignal {
            signal: Signal::classify(short_sma, long_sma),
            short_sma,
            long_sma,
            timestamp: Utc::now(),
        };

        info!(
            signal = %signal.signal,
            short_sma,
            long_sma,
            "signal generated"
        );

        self.emit(&signal).instrument(child_span("emit_signal")).await;
        Ok(signal)
    }

    /// One scheduled tick under its own trace, bounded by `timeout`.
    pub async fn run_tick(&self, timeout: Duration) -> Result<TradeSignal, SignalError> {
        let span = root_span("signal_tick", &TraceId::new());

        async {
            match tokio::time::timeout(timeout, self.generate_signal()).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "signal tick timed out");
                    Err(SignalError::Timeout(timeout))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn emit(&self, signal: &TradeSignal) {
        let (saved, published) = tokio::join!(
            self.signals.save_signal(signal),
            self.publisher.publish_signal(signal),
        );

        match saved {
            Ok(()) => debug!("signal recorded"),
            Err(e) => warn!(error = ?e, "failed to record signal"),
        }
        match published {
            Ok(id) => info!(%id, "signal published"),
            Err(e) => warn!(error = ?e, "failed to publish signal"),
        }
    }
}
