//! Cooperative shutdown signalling
//!
//! A [`ShutdownSignal`] is a cloneable handle that fans a stop request out to
//! every task that subscribed to it. The service owns one signal; each UDP
//! listener, session loop, and acceptor holds a [`ShutdownListener`] and
//! selects on it alongside its I/O. Server sessions additionally carry their
//! own signal so a single session can be cancelled (displacement) without
//! stopping the service.
//!
//! Triggering is idempotent and sticky: subscribers that arrive after the
//! trigger observe it immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Cloneable stop-request handle.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create a new, untriggered signal.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request shutdown. Idempotent; wakes all current and future listeners.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        // Send fails when no listener is currently subscribed; the sticky
        // flag covers late subscribers.
        let _ = self.tx.send(());
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Obtain a listener for use in `tokio::select!` loops.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
            triggered: Arc::clone(&self.triggered),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of a [`ShutdownSignal`].
#[derive(Debug)]
pub struct ShutdownListener {
    rx: broadcast::Receiver<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownListener {
    /// Resolve once shutdown is requested. Resolves immediately if it
    /// already was.
    pub async fn recv(&mut self) {
        if self.triggered.load(Ordering::SeqCst) {
            return;
        }
        // Lagged and Closed both mean the trigger happened (or the signal
        // owner is gone); either way the task should stop.
        let _ = self.rx.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn trigger_wakes_listener() {
        let signal = ShutdownSignal::new();
        let mut listener = signal.subscribe();

        let waiter = tokio::spawn(async move { listener.recv().await });
        signal.trigger();

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("listener woke")
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn late_subscriber_observes_trigger() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let mut listener = signal.subscribe();
        timeout(Duration::from_millis(100), listener.recv())
            .await
            .expect("sticky trigger observed");
    }

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();

        let mut listener = signal.subscribe();
        timeout(Duration::from_millis(100), listener.recv())
            .await
            .expect("listener observed trigger");
    }
}
