use crate::error::{RelayError, Result};
use crate::registry::RelayId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// RelayDef
// ---------------------------------------------------------------------------

/// One configured relay: id → hardware line identifier → display name.
/// Fixed at process start; the registry is built from this list once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayDef {
    pub id: RelayId,
    /// Hardware line identifier (e.g. a BCM pin number). Opaque to the
    /// engine; only the line factory interprets it.
    pub line: u32,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Pulse / timed-set duration bounds, in seconds.
    #[serde(default = "default_pulse_min_secs")]
    pub pulse_min_secs: f64,
    #[serde(default = "default_pulse_max_secs")]
    pub pulse_max_secs: f64,
    /// Sequence step duration bounds, in seconds.
    #[serde(default = "default_step_min_secs")]
    pub step_min_secs: f64,
    #[serde(default = "default_step_max_secs")]
    pub step_max_secs: f64,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_repeat")]
    pub max_repeat: u32,
}

fn default_pulse_min_secs() -> f64 {
    0.1
}

fn default_pulse_max_secs() -> f64 {
    3600.0
}

fn default_step_min_secs() -> f64 {
    0.1
}

fn default_step_max_secs() -> f64 {
    60.0
}

fn default_max_steps() -> usize {
    20
}

fn default_max_repeat() -> u32 {
    10
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            pulse_min_secs: default_pulse_min_secs(),
            pulse_max_secs: default_pulse_max_secs(),
            step_min_secs: default_step_min_secs(),
            step_max_secs: default_step_max_secs(),
            max_steps: default_max_steps(),
            max_repeat: default_max_repeat(),
        }
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    /// Interval between periodic hardware re-reads.
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    /// Interval between heartbeat snapshots to subscribers.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Per-call hardware I/O budget.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

fn default_reconcile_interval_ms() -> u64 {
    100
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_io_timeout_ms() -> u64 {
    500
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: default_reconcile_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl Timing {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// RelayConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relays")]
    pub relays: Vec<RelayDef>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub timing: Timing,
    /// Bind address for the HTTP/WebSocket edge.
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// The 4-port board this daemon grew up on: BCM pins 2, 3, 4, 17.
fn default_relays() -> Vec<RelayDef> {
    [(1u8, 2u32), (2, 3), (3, 4), (4, 17)]
        .into_iter()
        .map(|(id, line)| RelayDef {
            id,
            line,
            name: format!("Relay {id}"),
        })
        .collect()
}

fn default_listen() -> String {
    "0.0.0.0:8002".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            limits: Limits::default(),
            timing: Timing::default(),
            listen: default_listen(),
        }
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.relays.is_empty() {
            return Err(RelayError::InvalidArgument(
                "at least one relay must be configured".into(),
            ));
        }
        let mut seen = HashSet::new();
        for def in &self.relays {
            if !seen.insert(def.id) {
                return Err(RelayError::InvalidArgument(format!(
                    "duplicate relay id: {}",
                    def.id
                )));
            }
        }
        if self.limits.pulse_min_secs <= 0.0 || self.limits.pulse_min_secs > self.limits.pulse_max_secs {
            return Err(RelayError::InvalidArgument(
                "pulse duration bounds are inverted or non-positive".into(),
            ));
        }
        if self.limits.step_min_secs <= 0.0 || self.limits.step_min_secs > self.limits.step_max_secs {
            return Err(RelayError::InvalidArgument(
                "step duration bounds are inverted or non-positive".into(),
            ));
        }
        if self.limits.max_steps == 0 || self.limits.max_repeat == 0 {
            return Err(RelayError::InvalidArgument(
                "max_steps and max_repeat must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
