//! Static relay table: id → hardware line + display name.
//!
//! Built once at startup from [`RelayConfig`]; immutable afterwards.

use crate::config::{RelayConfig, RelayDef};
use crate::error::{RelayError, Result};
use crate::hardware::{HardwareError, HardwareLine};
use std::sync::Arc;
use std::time::Duration;

pub type RelayId = u8;

#[derive(Clone)]
pub struct RelayDescriptor {
    pub id: RelayId,
    pub name: String,
    pub line: Arc<dyn HardwareLine>,
}

pub struct RelayRegistry {
    // Configuration order; all iteration (all-on/off, reconcile) follows it.
    relays: Vec<RelayDescriptor>,
}

impl RelayRegistry {
    /// Bind every configured relay to a hardware line via `factory`.
    pub fn build<F>(config: &RelayConfig, mut factory: F) -> Result<Self>
    where
        F: FnMut(&RelayDef) -> std::result::Result<Arc<dyn HardwareLine>, HardwareError>,
    {
        config.validate()?;
        let mut relays = Vec::with_capacity(config.relays.len());
        for def in &config.relays {
            let line = factory(def).map_err(|source| RelayError::HardwareFault {
                relay: def.id,
                source,
            })?;
            relays.push(RelayDescriptor {
                id: def.id,
                name: def.name.clone(),
                line,
            });
        }
        Ok(Self { relays })
    }

    pub fn resolve(&self, id: RelayId) -> Result<&RelayDescriptor> {
        self.relays
            .iter()
            .find(|d| d.id == id)
            .ok_or(RelayError::InvalidRelay(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = RelayId> + '_ {
        self.relays.iter().map(|d| d.id)
    }

    pub fn descriptors(&self) -> &[RelayDescriptor] {
        &self.relays
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Drive every configured line to OFF. Fails fast on the first line
    /// that cannot be configured — startup must not proceed with a
    /// partially initialized relay set.
    pub async fn initialize(&self, io_timeout: Duration) -> Result<()> {
        for desc in &self.relays {
            match tokio::time::timeout(io_timeout, desc.line.write(false)).await {
                Ok(Ok(())) => {}
                Ok(Err(source)) => {
                    return Err(RelayError::HardwareFault {
                        relay: desc.id,
                        source,
                    })
                }
                Err(_) => return Err(RelayError::HardwareTimeout { relay: desc.id }),
            }
        }
        tracing::info!(relays = self.relays.len(), "hardware initialized, all relays OFF");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
