use std::sync::Arc;

use common::Shutdown;
use tracing::{info, warn};

use crate::config::SignalConfig;
use crate::error::SignalError;
use crate::signal::processor::SignalProcessor;
use crate::task::run_periodic;

/// Drives `processor` every `cfg.interval` until shutdown. A failed tick is
/// logged and the next one runs on schedule.
pub async fn run_signal_scheduler(
    processor: Arc<SignalProcessor>,
    cfg: SignalConfig,
    shutdown: Shutdown,
) {
    let timeout = cfg.tick_timeout;

    run_periodic("signal_scheduler", cfg.interval, shutdown, move || {
        let processor = Arc::clone(&processor);
        async move {
            match processor.run_tick(timeout).await {
                Ok(_) => {}
                Err(e @ SignalError::InsufficientData { .. }) => {
                    info!(error = %e, "skipping tick");
                }
                Err(e) => warn!(error = %e, "signal tick failed"),
            }
        }
    })
    .await;
}
