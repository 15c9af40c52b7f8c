//! Shutdown coordination for the server.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::net::ConnectionTracker;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that accept loops and background tasks
/// subscribe to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still subscribed.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Trigger shutdown, then wait up to `grace` for open sessions to finish.
    ///
    /// Returns `true` when every session drained in time.
    pub async fn drain(&self, tracker: &ConnectionTracker, grace: Duration) -> bool {
        self.trigger();
        let active = tracker.active_count();
        if active > 0 {
            tracing::info!(active, grace_secs = grace.as_secs(), "Waiting for sessions to drain");
        }
        let drained = tracker.wait_for_drain(grace).await;
        if !drained {
            tracing::warn!(
                remaining = tracker.active_count(),
                "Shutdown grace period elapsed with sessions still open"
            );
        }
        drained
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_trigger() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 1);
        shutdown.trigger();
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn drain_waits_for_sessions() {
        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });
        assert!(shutdown.drain(&tracker, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn drain_gives_up_after_grace() {
        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track();
        assert!(!shutdown.drain(&tracker, Duration::from_millis(100)).await);
    }
}
