//! Signal consumer: poll the Signal Log under a group, write a processed
//! record per message, ack, then dispatch.
//!
//! Per message the order is fixed: write → ack → dispatch. A message is only
//! acked after its record is written, and only dispatched after it is
//! acked, so a crash at any point leads to redelivery rather than loss. The
//! output write is idempotent, which makes that redelivery harmless.

use std::sync::Arc;
use std::time::Duration;

use common::{Shutdown, TraceId, annotate_span, root_span, warn_if_slow};
use tracing::{Instrument, debug, field, info, instrument, warn};

use crate::config::{ConsumerConfig, StreamConfig};
use crate::consumer::dispatch::ActionDispatcher;
use crate::consumer::output::ProcessedLog;
use crate::consumer::types::{BatchReport, ProcessedRecord, TradeAction};
use crate::error::StreamError;
use crate::stream::{SignalLog, StreamMessage};
use crate::task::run_periodic;

pub struct MessageProcessor {
    log: Arc<dyn SignalLog>,
    output: Arc<dyn ProcessedLog>,
    dispatcher: Arc<dyn ActionDispatcher>,
    cfg: ConsumerConfig,
    signal_stream: String,
    processed_stream: String,
}

impl MessageProcessor {
    pub fn new(
        cfg: &ConsumerConfig,
        streams: &StreamConfig,
        log: Arc<dyn SignalLog>,
        output: Arc<dyn ProcessedLog>,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Self {
        Self {
            log,
            output,
            dispatcher,
            cfg: cfg.clone(),
            signal_stream: streams.signal_stream.clone(),
            processed_stream: streams.processed_stream.clone(),
        }
    }

    /// Creates the consumer group if it does not exist yet.
    pub async fn ensure_group(&self) -> Result<(), StreamError> {
        let created = self
            .log
            .ensure_group(&self.signal_stream, &self.cfg.group, self.cfg.group_start)
            .await?;
        info!(
            stream = %self.signal_stream,
            group = %self.cfg.group,
            created,
            "consumer group ready"
        );
        Ok(())
    }

    /// Reads one batch and processes every message in it. Only the read
    /// itself can fail the call; per-message failures land in the report.
    #[instrument(
        skip(self),
        target = "consumer",
        fields(
            group = %self.cfg.group,
            consumer = %self.cfg.consumer,
            stream = field::Empty,
            message_id = field::Empty
        )
    )]
    pub async fn process_messages(&self) -> Result<BatchReport, StreamError> {
        let budget = self.cfg.read_block.unwrap_or_default() + Duration::from_millis(250);
        let messages = warn_if_slow("read_messages", budget, async {
            self.log
                .read(
                    &self.signal_stream,
                    &self.cfg.group,
                    &self.cfg.consumer,
                    self.cfg.read_count,
                    self.cfg.read_block,
                )
                .await
        })
        .await?;

        let mut report = BatchReport {
            read: messages.len(),
            ..BatchReport::default()
        };

        for msg in &messages {
            self.process_one(msg, &mut report).await;
        }

        if report.read > 0 {
            info!(?report, "batch processed");
        }
        Ok(report)
    }

    async fn process_one(&self, msg: &StreamMessage, report: &mut BatchReport) {
        let id = msg.id.to_string();
        annotate_span(&self.signal_stream, Some(&id));

        if msg.delivery_count > 1 {
            debug!(%id, delivery_count = msg.delivery_count, "redelivered message");
        }

        let record = match ProcessedRecord::from_message(msg) {
            Ok(r) => r,
            Err(e) => {
                // Nothing can make this message valid later; drop it so it
                // does not sit in the pending list forever.
                warn!(%id, error = %e, fields = ?msg.fields, "dropping malformed message");
                report.failed += 1;
                if self.ack(msg).await {
                    report.acked += 1;
                }
                return;
            }
        };

        match self.output.write(&self.processed_stream, &record).await {
            Ok(true) => report.written += 1,
            Ok(false) => {
                debug!(%id, "processed record already present");
                report.written += 1;
            }
            Err(e) => {
                warn!(%id, error = ?e, "failed to write processed record; leaving pending");
                report.failed += 1;
                return;
            }
        }

        if !self.ack(msg).await {
            report.failed += 1;
            return;
        }
        report.acked += 1;

        let action = TradeAction::from_message(msg);
        self.dispatcher.dispatch(msg.id, &action).await;
        report.dispatched += 1;
    }

    /// Returns `false` only when the ack failed; such a message stays
    /// pending and is redelivered.
    async fn ack(&self, msg: &StreamMessage) -> bool {
        match self
            .log
            .ack(&self.signal_stream, &self.cfg.group, msg.id)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                debug!(id = %msg.id, "message was no longer pending");
                true
            }
            Err(e) => {
                warn!(id = %msg.id, error = %e, "failed to acknowledge message");
                false
            }
        }
    }

    /// Polls every `poll_interval` until shutdown. The in-flight batch
    /// always completes.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let every = self.cfg.poll_interval;

        run_periodic("signal_consumer", every, shutdown, move || {
            let this = Arc::clone(&self);
            async move {
                let span = root_span("consumer_poll", &TraceId::new());
                async {
                    if let Err(e) = this.process_messages().await {
                        warn!(error = %e, "error reading messages");
                    }
                }
                .instrument(span)
                .await
            }
        })
        .await;
    }
}
