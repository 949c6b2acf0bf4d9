//! Digital output line abstraction.
//!
//! A [`HardwareLine`] is one physical boolean output. `level = true` means
//! the relay is energized (ON). Relay boards are typically active-low —
//! logical ON maps to electrical LOW — and that inversion lives entirely
//! inside implementations of this trait. Nothing above this module ever
//! sees an electrical level.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum HardwareError {
    #[error("line fault: {0}")]
    Fault(String),

    #[error("line not initialized")]
    Uninitialized,
}

/// One physical digital output. Implementations perform real I/O and are
/// expected to fail loudly: errors are surfaced to the caller, never
/// retried silently.
#[async_trait]
pub trait HardwareLine: Send + Sync {
    /// Drive the line. `level = true` energizes the relay.
    async fn write(&self, level: bool) -> std::result::Result<(), HardwareError>;

    /// Read the line's actual level back (logical convention, ON = true).
    async fn read(&self) -> std::result::Result<bool, HardwareError>;
}

// ---------------------------------------------------------------------------
// MemoryLine — in-memory adapter for tests and --simulate mode
// ---------------------------------------------------------------------------

/// Shared, ordered record of `(tag, logical level)` writes across a bank
/// of memory lines. Lets tests assert cross-relay write ordering.
pub type WriteJournal = std::sync::Arc<Mutex<Vec<(u8, bool)>>>;

/// In-memory line used by tests and simulation mode.
///
/// Stores the *electrical* level (active-low, like the relay boards the
/// daemon targets) so the logical/electrical inversion is exercised the
/// same way a real driver would exercise it. Keeps an ordered log of
/// logical write levels and supports fault/hang injection.
pub struct MemoryLine {
    /// Electrical level. ON (logical true) is stored as `false` (LOW).
    electrical: Mutex<bool>,
    writes: Mutex<Vec<bool>>,
    journal: Option<(u8, WriteJournal)>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    hang_writes: AtomicBool,
}

impl MemoryLine {
    /// A de-energized line (electrical HIGH = logical OFF).
    pub fn new() -> Self {
        Self {
            electrical: Mutex::new(true),
            writes: Mutex::new(Vec::new()),
            journal: None,
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            hang_writes: AtomicBool::new(false),
        }
    }

    /// A line that additionally records its writes (tagged with `tag`)
    /// into a journal shared with the rest of the bank.
    pub fn with_journal(tag: u8, journal: WriteJournal) -> Self {
        let mut line = Self::new();
        line.journal = Some((tag, journal));
        line
    }

    /// All logical levels written so far, in call order.
    pub fn writes(&self) -> Vec<bool> {
        self.writes.lock().unwrap().clone()
    }

    /// Flip the electrical level as if an external agent rewired the
    /// output behind the coordinator's back. Does not touch the write log.
    pub fn simulate_external(&self, logical: bool) {
        *self.electrical.lock().unwrap() = !logical;
    }

    /// Make every subsequent `write` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `read` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `write` hang forever (exercises I/O timeouts).
    pub fn hang_writes(&self, hang: bool) {
        self.hang_writes.store(hang, Ordering::SeqCst);
    }
}

impl Default for MemoryLine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareLine for MemoryLine {
    async fn write(&self, level: bool) -> std::result::Result<(), HardwareError> {
        if self.hang_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HardwareError::Fault("injected write fault".into()));
        }
        // Active-low: logical ON drives the pin LOW.
        *self.electrical.lock().unwrap() = !level;
        self.writes.lock().unwrap().push(level);
        if let Some((tag, journal)) = &self.journal {
            journal.lock().unwrap().push((*tag, level));
        }
        Ok(())
    }

    async fn read(&self) -> std::result::Result<bool, HardwareError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(HardwareError::Fault("injected read fault".into()));
        }
        Ok(!*self.electrical.lock().unwrap())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips_logical_level() {
        let line = MemoryLine::new();
        assert!(!line.read().await.unwrap());

        line.write(true).await.unwrap();
        assert!(line.read().await.unwrap());
        // Electrically the pin is LOW while logically ON.
        assert!(!*line.electrical.lock().unwrap());

        line.write(false).await.unwrap();
        assert!(!line.read().await.unwrap());
        assert_eq!(line.writes(), vec![true, false]);
    }

    #[tokio::test]
    async fn injected_fault_surfaces() {
        let line = MemoryLine::new();
        line.fail_writes(true);
        assert!(line.write(true).await.is_err());
        // The failed write must not have actuated anything.
        assert!(!line.read().await.unwrap());
        assert!(line.writes().is_empty());
    }

    #[tokio::test]
    async fn external_change_is_visible_to_read() {
        let line = MemoryLine::new();
        line.simulate_external(true);
        assert!(line.read().await.unwrap());
        assert!(line.writes().is_empty());
    }
}
