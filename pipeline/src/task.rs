//! Task plumbing shared by the pipeline stages.
//!
//! - `supervise` watches a background worker and turns its error, or its
//!   panic, into a typed fault delivered on a oneshot channel.
//! - `run_periodic` drives a job on a fixed cadence until shutdown.

use std::any::Any;
use std::future::Future;
use std::time::Duration;

use common::Shutdown;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("worker {worker} panicked: {message}")]
pub struct TaskPanic {
    pub worker: &'static str,
    pub message: String,
}

/// Spawns a supervisor for `handle`.
///
/// The returned receiver yields the worker's fault: its `Err` value, or a
/// `TaskPanic` converted into `E`. A clean exit (or cancellation) closes the
/// channel without a value.
pub fn supervise<E>(worker: &'static str, handle: JoinHandle<Result<(), E>>) -> oneshot::Receiver<E>
where
    E: From<TaskPanic> + std::fmt::Display + Send + 'static,
{
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let fault = match handle.await {
            Ok(Ok(())) => {
                debug!(worker, "worker finished");
                None
            }
            Ok(Err(e)) => {
                warn!(worker, error = %e, "worker exited with a fault");
                Some(e)
            }
            Err(join) if join.is_panic() => {
                let message = panic_message(join.into_panic());
                error!(worker, %message, "worker panicked; converting to fault");
                Some(E::from(TaskPanic { worker, message }))
            }
            Err(_) => {
                debug!(worker, "worker cancelled");
                None
            }
        };

        if let Some(fault) = fault {
            // Receiver may already be gone if the owner stopped listening.
            let _ = tx.send(fault);
        }
    });

    rx
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs `job` every `every` until `shutdown` fires.
///
/// Shutdown is only observed between jobs: a job that has started always
/// runs to completion. Missed ticks (a job slower than the period) are
/// skipped, never queued.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    mut shutdown: Shutdown,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        task = name,
        every_ms = every.as_millis() as u64,
        "periodic task started"
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }

        job().await;
    }

    info!(task = name, "periodic task stopped");
}
