//! State fan-out to subscriber sessions.
//!
//! A pump task watches the store's change feed and publishes a fresh
//! [`StatusReport`] on every mutation, plus on a fixed heartbeat so
//! subscribers that missed an event resynchronize anyway. Delivery is
//! best-effort, at-most-once: a slow subscriber observes `Lagged` on its
//! receiver and simply misses intermediate reports — publication never
//! blocks on anyone.

use crate::registry::RelayRegistry;
use crate::status::StatusReport;
use crate::store::{StateEvent, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<StatusReport>,
    registry: Arc<RelayRegistry>,
    store: Arc<StateStore>,
}

impl Broadcaster {
    /// Spawn the pump over the store's change feed.
    pub fn spawn(
        registry: Arc<RelayRegistry>,
        store: Arc<StateStore>,
        mut events: mpsc::UnboundedReceiver<StateEvent>,
        heartbeat: Duration,
    ) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let broadcaster = Self {
            tx: tx.clone(),
            registry: registry.clone(),
            store: store.clone(),
        };

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => Some(event),
                        // Store gone; the process is tearing down.
                        None => break,
                    },
                    () = tokio::time::sleep(heartbeat) => None,
                };
                if let Some(event) = event {
                    tracing::debug!(?event, "state change published");
                }
                let report = StatusReport::build(&registry, &store.snapshot());
                // Err just means nobody is subscribed right now.
                let _ = tx.send(report);
            }
        });

        broadcaster
    }

    /// New subscription. The receiver sees every report published from
    /// now on, minus anything it falls behind on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusReport> {
        self.tx.subscribe()
    }

    /// Current report, built on demand (used for `"get_status"` control
    /// tokens and the initial message of a new session).
    pub fn current(&self) -> StatusReport {
        StatusReport::build(&self.registry, &self.store.snapshot())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::hardware::MemoryLine;

    fn fixture() -> (Broadcaster, Arc<StateStore>) {
        let config = RelayConfig::default();
        let registry = Arc::new(
            RelayRegistry::build(&config, |_| Ok(Arc::new(MemoryLine::new()))).unwrap(),
        );
        let (store, events) = StateStore::new(registry.ids());
        let store = Arc::new(store);
        let broadcaster = Broadcaster::spawn(
            registry,
            store.clone(),
            events,
            Duration::from_secs(3600),
        );
        (broadcaster, store)
    }

    #[tokio::test]
    async fn publishes_one_report_per_mutation() {
        let (broadcaster, store) = fixture();
        let mut rx = broadcaster.subscribe();

        store.apply_write(1, true);
        let report = rx.recv().await.unwrap();
        assert!(report.relays[&1].state);

        store.apply_write(1, false);
        let report = rx.recv().await.unwrap();
        assert!(!report.relays[&1].state);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_publishes_without_changes() {
        let (broadcaster, _store) = fixture();
        let mut rx = broadcaster.subscribe();
        tokio::time::sleep(Duration::from_secs(3601)).await;
        let report = rx.recv().await.unwrap();
        assert!(!report.relays[&1].state);
    }

    #[tokio::test]
    async fn current_reflects_store() {
        let (broadcaster, store) = fixture();
        store.set_emergency_stop(true);
        assert!(broadcaster.current().emergency_stop);
    }
}
