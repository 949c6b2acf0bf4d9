//! Authoritative in-memory relay state.
//!
//! Single-writer discipline: only the coordinator's serialized command
//! loop calls the mutating methods. Everybody else (HTTP handlers, the
//! broadcaster, subscriber sessions) reads snapshot copies. Every
//! mutation emits exactly one [`StateEvent`] on the change feed; no
//! mutation is silently dropped.

use crate::registry::RelayId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// State types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RelayState {
    pub id: RelayId,
    /// The value the coordinator most recently wrote.
    pub desired: bool,
    /// The value last read back from the physical line. May lag `desired`
    /// between a write and the next reconciliation.
    pub last_observed: bool,
    pub last_changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemState {
    pub relays: BTreeMap<RelayId, RelayState>,
    pub emergency_stop_engaged: bool,
    pub hardware_ready: bool,
}

/// One entry on the broadcaster's change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// A coordinator write changed a relay's desired state.
    Written(RelayId),
    /// Reconciliation observed a level that differs from the last one.
    Drift(RelayId),
    /// The emergency-stop flag flipped.
    EmergencyStop(bool),
    /// Hardware initialization completed (or the process began shutdown).
    HardwareReady(bool),
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

pub struct StateStore {
    inner: RwLock<SystemState>,
    events: mpsc::UnboundedSender<StateEvent>,
}

impl StateStore {
    /// Build the store for the given relay ids (all OFF, hardware not yet
    /// ready). Returns the change-feed receiver for the broadcaster.
    pub fn new(ids: impl IntoIterator<Item = RelayId>) -> (Self, mpsc::UnboundedReceiver<StateEvent>) {
        let now = Utc::now();
        let relays = ids
            .into_iter()
            .map(|id| {
                (
                    id,
                    RelayState {
                        id,
                        desired: false,
                        last_observed: false,
                        last_changed_at: now,
                    },
                )
            })
            .collect();
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Self {
            inner: RwLock::new(SystemState {
                relays,
                emergency_stop_engaged: false,
                hardware_ready: false,
            }),
            events: tx,
        };
        (store, rx)
    }

    /// Immutable copy of the whole system state. O(N); never blocks on
    /// hardware I/O.
    pub fn snapshot(&self) -> SystemState {
        self.inner.read().unwrap().clone()
    }

    /// Record a successful coordinator write. Updates `desired` and
    /// `last_observed` together (immediately after a write they agree by
    /// definition, until reconciliation proves otherwise). Returns the
    /// previous state, or `None` for an unknown id.
    pub fn apply_write(&self, id: RelayId, desired: bool) -> Option<RelayState> {
        let mut state = self.inner.write().unwrap();
        let relay = state.relays.get_mut(&id)?;
        let previous = relay.clone();
        relay.desired = desired;
        relay.last_observed = desired;
        relay.last_changed_at = Utc::now();
        drop(state);
        let _ = self.events.send(StateEvent::Written(id));
        Some(previous)
    }

    /// Record a hardware read-back. Returns whether the observation
    /// differed from the previous one; emits a drift event only then.
    pub fn apply_observation(&self, id: RelayId, observed: bool) -> bool {
        let mut state = self.inner.write().unwrap();
        let Some(relay) = state.relays.get_mut(&id) else {
            return false;
        };
        if relay.last_observed == observed {
            return false;
        }
        relay.last_observed = observed;
        relay.last_changed_at = Utc::now();
        drop(state);
        let _ = self.events.send(StateEvent::Drift(id));
        true
    }

    pub fn set_emergency_stop(&self, engaged: bool) {
        let mut state = self.inner.write().unwrap();
        if state.emergency_stop_engaged == engaged {
            return;
        }
        state.emergency_stop_engaged = engaged;
        drop(state);
        let _ = self.events.send(StateEvent::EmergencyStop(engaged));
    }

    pub fn set_hardware_ready(&self, ready: bool) {
        let mut state = self.inner.write().unwrap();
        if state.hardware_ready == ready {
            return;
        }
        state.hardware_ready = ready;
        drop(state);
        let _ = self.events.send(StateEvent::HardwareReady(ready));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<StateEvent>) -> Vec<StateEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn every_write_emits_exactly_one_event() {
        let (store, mut rx) = StateStore::new([1, 2]);
        store.apply_write(1, true);
        store.apply_write(1, false);
        assert_eq!(
            drain(&mut rx),
            vec![StateEvent::Written(1), StateEvent::Written(1)]
        );
        let snap = store.snapshot();
        assert!(!snap.relays[&1].desired);
        assert!(!snap.relays[&1].last_observed);
    }

    #[tokio::test]
    async fn write_returns_previous_state() {
        let (store, _rx) = StateStore::new([1]);
        let prev = store.apply_write(1, true).unwrap();
        assert!(!prev.desired);
        let prev = store.apply_write(1, false).unwrap();
        assert!(prev.desired);
        assert!(store.apply_write(9, true).is_none());
    }

    #[tokio::test]
    async fn observation_emits_drift_only_on_change() {
        let (store, mut rx) = StateStore::new([1, 2]);
        store.apply_write(1, true);
        let _ = drain(&mut rx);

        // Matching observation: no event, no report.
        assert!(!store.apply_observation(1, true));
        assert!(drain(&mut rx).is_empty());

        // Divergent observation: one drift event, only relay 1 touched.
        assert!(store.apply_observation(1, false));
        assert_eq!(drain(&mut rx), vec![StateEvent::Drift(1)]);
        let snap = store.snapshot();
        assert!(snap.relays[&1].desired);
        assert!(!snap.relays[&1].last_observed);
        assert!(!snap.relays[&2].last_observed);
    }

    #[tokio::test]
    async fn flag_mutations_are_edge_triggered() {
        let (store, mut rx) = StateStore::new([1]);
        store.set_emergency_stop(true);
        store.set_emergency_stop(true);
        store.set_hardware_ready(true);
        assert_eq!(
            drain(&mut rx),
            vec![StateEvent::EmergencyStop(true), StateEvent::HardwareReady(true)]
        );
        assert!(store.snapshot().emergency_stop_engaged);
        assert!(store.snapshot().hardware_ready);
    }
}
