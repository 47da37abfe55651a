use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::SecondsFormat;

use crate::signal::types::TradeSignal;
use crate::stream::{Fields, SignalLog, StreamId};

/// Where the signal engine announces each computed signal.
#[async_trait]
pub trait SignalPublisher: Send + Sync {
    async fn publish_signal(&self, signal: &TradeSignal) -> anyhow::Result<StreamId>;
}

/// Publishes signals as entries on a Signal Log stream.
pub struct StreamSignalPublisher {
    log: Arc<dyn SignalLog>,
    stream: String,
}

impl StreamSignalPublisher {
    pub fn new(log: Arc<dyn SignalLog>, stream: impl Into<String>) -> Self {
        Self {
            log,
            stream: stream.into(),
        }
    }
}

#[async_trait]
impl SignalPublisher for StreamSignalPublisher {
    async fn publish_signal(&self, signal: &TradeSignal) -> anyhow::Result<StreamId> {
        let id = self
            .log
            .publish(&self.stream, &signal_fields(signal))
            .await
            .with_context(|| format!("publish signal to {}", self.stream))?;
        Ok(id)
    }
}

/// Wire fields of a published signal: `signal`, `shortSMA`, `longSMA`, and
/// `time` (RFC 3339, UTC, second precision).
pub fn signal_fields(signal: &TradeSignal) -> Fields {
    Fields::from([
        ("signal".to_string(), signal.signal.as_str().to_string()),
        ("shortSMA".to_string(), signal.short_sma.to_string()),
        ("longSMA".to_string(), signal.long_sma.to_string()),
        (
            "time".to_string(),
            signal.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ])
}
