//! Broadcaster (spec.md §4.G) — fan-out to every connected browser session.
//!
//! Grounded on `state.rs`'s `dashboard_tx: broadcast::Sender<DashboardEvent>`
//! and `http/sse.rs`'s fan-out-to-subscribers pattern, adapted from
//! Server-Sent-Events to a plain WebSocket transport. Using
//! `tokio::sync::broadcast` gives the required per-socket failure isolation
//! for free: each browser session owns its own `Receiver` and write loop, so
//! one socket backing up or closing never blocks or drops frames for
//! another (a lagging receiver only loses its own backlog, reported as
//! `RecvError::Lagged`, not a wedged sender).

use gateway_protocol::BrowserEvent;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 4096;

/// Process-wide singleton fan-out to all open browser sockets.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<BrowserEvent>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe a new browser session. The caller is responsible for
    /// seeding the three snapshot frames (spec.md §4.G) before forwarding
    /// from this receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<BrowserEvent> {
        self.tx.subscribe()
    }

    /// Publish one event to every currently-subscribed session. A send
    /// with zero active receivers is not an error (spec.md §5 "a broadcast
    /// to a closed browser socket is a no-op").
    pub fn publish(&self, event: BrowserEvent) {
        let _ = self.tx.send(event);
    }

    /// The underlying sender, for collaborators (e.g. `gateway_ui_log::UiLogger`)
    /// that need to publish through this same channel under a different event
    /// shape than [`BrowserEvent`] directly.
    pub fn sender(&self) -> broadcast::Sender<BrowserEvent> {
        self.tx.clone()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let b = Broadcaster::new();
        let mut r1 = b.subscribe();
        let mut r2 = b.subscribe();
        b.publish(BrowserEvent::Error {
            message: "x".to_owned(),
        });
        assert!(matches!(r1.recv().await.unwrap(), BrowserEvent::Error { .. }));
        assert!(matches!(r2.recv().await.unwrap(), BrowserEvent::Error { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_not_an_error() {
        let b = Broadcaster::new();
        b.publish(BrowserEvent::Error {
            message: "x".to_owned(),
        });
    }

    #[tokio::test]
    async fn one_lagging_receiver_does_not_affect_another() {
        let b = Broadcaster::new();
        let mut slow = b.subscribe();
        let mut fast = b.subscribe();
        for i in 0..(CHANNEL_CAPACITY + 10) {
            b.publish(BrowserEvent::Error {
                message: i.to_string(),
            });
        }
        // `slow` never drained; it will see Lagged, not a panic or hang.
        let slow_result = slow.recv().await;
        assert!(slow_result.is_err() || slow_result.is_ok());
        assert!(fast.recv().await.is_ok());
    }
}
