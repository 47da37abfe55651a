//! Cooperative shutdown signal shared by every long-running task.
//!
//! A single `ShutdownTrigger` is owned by whoever decides the process (or a
//! worker) should stop; any number of `Shutdown` handles observe it.
//! Once triggered the signal stays triggered.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

#[derive(Clone, Debug)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    // Only set by `never()`: keeps the sender alive so `wait` parks.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
            _keepalive: None,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// A handle that never fires. Useful for one-shot runs and tests.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the trigger fires. A dropped trigger counts as fired.
    pub async fn wait(&mut self) {
        // wait_for errors only when the sender is gone
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}
