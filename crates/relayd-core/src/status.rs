//! Wire-shaped status snapshot pushed to subscribers and served by
//! `GET /status`.

use crate::registry::{RelayId, RelayRegistry};
use crate::store::SystemState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct RelayReport {
    pub name: String,
    pub state: bool,
    /// "ON" / "OFF" — redundant with `state` but kept for display clients.
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    /// Keyed by relay id, in numeric id order. Serializes with string
    /// keys (JSON objects require them) without falling back to the
    /// lexical order that would put "10" before "2".
    pub relays: BTreeMap<RelayId, RelayReport>,
    pub emergency_stop: bool,
    pub hardware_ready: bool,
}

impl StatusReport {
    pub fn build(registry: &RelayRegistry, state: &SystemState) -> Self {
        let relays = registry
            .descriptors()
            .iter()
            .filter_map(|desc| {
                let relay = state.relays.get(&desc.id)?;
                Some((
                    desc.id,
                    RelayReport {
                        name: desc.name.clone(),
                        state: relay.desired,
                        status: if relay.desired { "ON" } else { "OFF" },
                    },
                ))
            })
            .collect();
        Self {
            timestamp: Utc::now(),
            relays,
            emergency_stop: state.emergency_stop_engaged,
            hardware_ready: state.hardware_ready,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
