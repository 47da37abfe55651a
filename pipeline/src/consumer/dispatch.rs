use async_trait::async_trait;
use tracing::{info, warn};

use crate::consumer::types::TradeAction;
use crate::stream::StreamId;

/// Acts on a consumed signal. Order placement is out of scope; the handlers
/// are where it would plug in.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, id: StreamId, action: &TradeAction);
}

/// Dispatcher that only logs the action it would take.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDispatcher;

#[async_trait]
impl ActionDispatcher for LoggingDispatcher {
    async fn dispatch(&self, id: StreamId, action: &TradeAction) {
        match action {
            TradeAction::Buy => info!(target: "trader", %id, "executing BUY order"),
            TradeAction::Sell => info!(target: "trader", %id, "executing SELL order"),
            TradeAction::Hold => info!(target: "trader", %id, "holding position"),
            TradeAction::Unknown(signal) => {
                warn!(target: "trader", %id, ?signal, "unknown signal received")
            }
        }
    }
}
