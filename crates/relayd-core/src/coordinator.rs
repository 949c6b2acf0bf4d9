//! Command-serialization and scheduling core.
//!
//! Every mutation — HTTP handlers, auto-off timers, sequence steppers,
//! the periodic reconciler — funnels through one consumer task, so store
//! mutations and hardware writes never race no matter how many callers
//! issue commands concurrently. Commands are applied in the order they
//! are accepted; the emergency lane is drained ahead of the ordinary
//! queue via a biased select.
//!
//! ```text
//!  handlers ──┐                       ┌──▶ StateStore ──▶ change feed
//!  timers ────┼──▶ command queue ──▶ Engine
//!  steppers ──┤    (serialized)       └──▶ HardwareLine
//!  reconciler ┘
//! ```

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::registry::{RelayId, RelayRegistry};
use crate::sequence::{SequenceId, SequenceRun, SequenceSpec, SequenceStatus};
use crate::store::StateStore;
use chrono::Utc;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Bulk outcome
// ---------------------------------------------------------------------------

/// Per-relay result of an all-on / all-off / emergency-stop pass. One
/// relay's failure never aborts the pass; the rest are still driven.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub applied: Vec<RelayId>,
    pub failed: Vec<(RelayId, RelayError)>,
}

impl BulkOutcome {
    pub fn all_applied(&self) -> bool {
        self.failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

enum Command {
    Set {
        id: RelayId,
        state: bool,
        duration: Option<Duration>,
        reply: oneshot::Sender<Result<()>>,
    },
    Toggle {
        id: RelayId,
        reply: oneshot::Sender<Result<bool>>,
    },
    Pulse {
        id: RelayId,
        duration: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
    StartSequence {
        spec: SequenceSpec,
        reply: oneshot::Sender<Result<SequenceId>>,
    },
    SequenceStatus {
        id: SequenceId,
        reply: oneshot::Sender<Result<SequenceRun>>,
    },
    CancelSequence {
        id: SequenceId,
        reply: oneshot::Sender<Result<SequenceRun>>,
    },
    AllSet {
        state: bool,
        reply: oneshot::Sender<Result<BulkOutcome>>,
    },
    EmergencyStop {
        reply: oneshot::Sender<Result<BulkOutcome>>,
    },
    ClearEmergencyStop {
        reply: oneshot::Sender<()>,
    },
    Reconcile {
        reply: Option<oneshot::Sender<Result<Vec<RelayId>>>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },

    // Internal: an armed auto-off timer fired.
    AutoOff { id: RelayId, op_id: u64 },
    // Internal: a sequence stepper requests its next write.
    SeqStep {
        run_id: SequenceId,
        step_index: usize,
        repeat_index: u32,
        relay: RelayId,
        state: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    // Internal: a stepper ran out of steps.
    SeqFinished { run_id: SequenceId, failed: bool },
}

// ---------------------------------------------------------------------------
// Coordinator handle
// ---------------------------------------------------------------------------

/// Cloneable handle to the serialized engine. Dropping every handle (and
/// the reconciler) ends the engine task; [`shutdown`](Self::shutdown)
/// ends it deterministically.
#[derive(Clone)]
pub struct Coordinator {
    cmd_tx: mpsc::Sender<Command>,
    estop_tx: mpsc::Sender<Command>,
}

impl Coordinator {
    /// Spawn the engine loop and the periodic reconciler.
    pub fn spawn(registry: Arc<RelayRegistry>, store: Arc<StateStore>, config: &RelayConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (estop_tx, estop_rx) = mpsc::channel(8);

        let engine = Engine {
            registry,
            store,
            limits: config.limits.clone(),
            io_timeout: config.timing.io_timeout(),
            cmd_tx: cmd_tx.clone(),
            armed: HashMap::new(),
            runs: HashMap::new(),
            next_op: 0,
        };
        tokio::spawn(engine.run(cmd_rx, estop_rx));

        let reconcile_tx = cmd_tx.clone();
        let interval = config.timing.reconcile_interval();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if reconcile_tx
                    .send(Command::Reconcile { reply: None })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        Self { cmd_tx, estop_tx }
    }

    async fn dispatch<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| RelayError::Shutdown)?;
        rx.await.map_err(|_| RelayError::Shutdown)?
    }

    /// Write one relay, optionally arming an auto-off after `duration`.
    pub async fn set_relay(
        &self,
        id: RelayId,
        state: bool,
        duration: Option<Duration>,
    ) -> Result<()> {
        self.dispatch(|reply| Command::Set {
            id,
            state,
            duration,
            reply,
        })
        .await
    }

    /// Invert a relay's desired state. Read-then-write happens inside one
    /// serialized command, so concurrent toggles never observe the same
    /// "current" value. Returns the new state.
    pub async fn toggle(&self, id: RelayId) -> Result<bool> {
        self.dispatch(|reply| Command::Toggle { id, reply }).await
    }

    /// ON now, automatically OFF after `duration`.
    pub async fn pulse(&self, id: RelayId, duration: Duration) -> Result<()> {
        self.dispatch(|reply| Command::Pulse {
            id,
            duration,
            reply,
        })
        .await
    }

    /// Begin a sequence run; returns immediately with the run id while
    /// execution proceeds asynchronously.
    pub async fn run_sequence(&self, spec: SequenceSpec) -> Result<SequenceId> {
        self.dispatch(|reply| Command::StartSequence { spec, reply })
            .await
    }

    pub async fn sequence_status(&self, id: SequenceId) -> Result<SequenceRun> {
        self.dispatch(|reply| Command::SequenceStatus { id, reply })
            .await
    }

    /// Cancel a running sequence. Takes effect at the next step boundary
    /// at the latest; cancelling a finished run is a no-op.
    pub async fn cancel_sequence(&self, id: SequenceId) -> Result<SequenceRun> {
        self.dispatch(|reply| Command::CancelSequence { id, reply })
            .await
    }

    pub async fn all_on(&self) -> Result<BulkOutcome> {
        self.dispatch(|reply| Command::AllSet { state: true, reply })
            .await
    }

    pub async fn all_off(&self) -> Result<BulkOutcome> {
        self.dispatch(|reply| Command::AllSet {
            state: false,
            reply,
        })
        .await
    }

    /// Preemptive: drained ahead of every queued-but-unapplied command.
    /// Cancels all timers and sequence runs, then drives every relay OFF.
    pub async fn emergency_stop(&self) -> Result<BulkOutcome> {
        let (tx, rx) = oneshot::channel();
        self.estop_tx
            .send(Command::EmergencyStop { reply: tx })
            .await
            .map_err(|_| RelayError::Shutdown)?;
        rx.await.map_err(|_| RelayError::Shutdown)?
    }

    /// Reset the emergency-stop flag. The flag is observational; it does
    /// not gate subsequent activation commands.
    pub async fn clear_emergency_stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ClearEmergencyStop { reply: tx })
            .await
            .map_err(|_| RelayError::Shutdown)?;
        rx.await.map_err(|_| RelayError::Shutdown)
    }

    /// Read every line back and fold the observations into the store.
    /// Returns the relays whose observed state diverged since last time.
    pub async fn reconcile(&self) -> Result<Vec<RelayId>> {
        self.dispatch(|reply| Command::Reconcile { reply: Some(reply) })
            .await
    }

    /// Stop the engine: cancels every timer and run, marks hardware not
    /// ready, and rejects later commands with [`RelayError::Shutdown`].
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .estop_tx
            .send(Command::Shutdown { reply: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Engine — the single serialized consumer
// ---------------------------------------------------------------------------

struct ArmedOff {
    op_id: u64,
    handle: JoinHandle<()>,
}

struct RunEntry {
    run: SequenceRun,
    stepper: Option<JoinHandle<()>>,
}

struct Engine {
    registry: Arc<RelayRegistry>,
    store: Arc<StateStore>,
    limits: crate::config::Limits,
    io_timeout: Duration,
    cmd_tx: mpsc::Sender<Command>,
    armed: HashMap<RelayId, ArmedOff>,
    runs: HashMap<SequenceId, RunEntry>,
    next_op: u64,
}

impl Engine {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut estop_rx: mpsc::Receiver<Command>,
    ) {
        loop {
            let flow = tokio::select! {
                biased;
                cmd = estop_rx.recv() => match cmd {
                    Some(cmd) => self.apply(cmd).await,
                    // Every handle is gone; nothing can issue commands.
                    None => ControlFlow::Break(()),
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.apply(cmd).await,
                    None => ControlFlow::Break(()),
                },
            };
            if flow.is_break() {
                break;
            }
        }
        self.teardown();
    }

    async fn apply(&mut self, cmd: Command) -> ControlFlow<()> {
        match cmd {
            Command::Set {
                id,
                state,
                duration,
                reply,
            } => {
                let _ = reply.send(self.handle_set(id, state, duration, true).await);
            }
            Command::Toggle { id, reply } => {
                let _ = reply.send(self.handle_toggle(id).await);
            }
            Command::Pulse {
                id,
                duration,
                reply,
            } => {
                let _ = reply.send(self.handle_set(id, true, Some(duration), true).await);
            }
            Command::StartSequence { spec, reply } => {
                let _ = reply.send(self.handle_start_sequence(spec));
            }
            Command::SequenceStatus { id, reply } => {
                let _ = reply.send(
                    self.runs
                        .get(&id)
                        .map(|e| e.run.clone())
                        .ok_or(RelayError::SequenceNotFound(id)),
                );
            }
            Command::CancelSequence { id, reply } => {
                let _ = reply.send(self.handle_cancel_sequence(id));
            }
            Command::AllSet { state, reply } => {
                let _ = reply.send(self.handle_all_set(state).await);
            }
            Command::EmergencyStop { reply } => {
                let _ = reply.send(self.handle_emergency_stop().await);
            }
            Command::ClearEmergencyStop { reply } => {
                self.store.set_emergency_stop(false);
                tracing::info!("emergency stop cleared");
                let _ = reply.send(());
            }
            Command::Reconcile { reply } => {
                let result = self.handle_reconcile().await;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                } else if let Err(e) = result {
                    tracing::warn!(error = %e, "periodic reconcile skipped");
                }
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
            Command::AutoOff { id, op_id } => {
                self.handle_auto_off(id, op_id).await;
            }
            Command::SeqStep {
                run_id,
                step_index,
                repeat_index,
                relay,
                state,
                reply,
            } => {
                self.handle_seq_step(run_id, step_index, repeat_index, relay, state, reply)
                    .await;
            }
            Command::SeqFinished { run_id, failed } => {
                self.handle_seq_finished(run_id, failed);
            }
        }
        ControlFlow::Continue(())
    }

    fn teardown(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.handle.abort();
        }
        for entry in self.runs.values_mut() {
            if let Some(handle) = entry.stepper.take() {
                handle.abort();
            }
            if entry.run.status == SequenceStatus::Running {
                entry.run.status = SequenceStatus::Cancelled;
                entry.run.finished_at = Some(Utc::now());
            }
        }
        self.store.set_hardware_ready(false);
        tracing::info!("coordinator stopped");
    }

    // ── Hardware write path ───────────────────────────────────────────

    /// Write one line and, only on success, fold the new state into the
    /// store: either both change or neither is observably changed.
    async fn write_relay(&self, id: RelayId, level: bool) -> Result<()> {
        if !self.store.snapshot().hardware_ready {
            return Err(RelayError::NotInitialized);
        }
        let desc = self.registry.resolve(id)?;
        match tokio::time::timeout(self.io_timeout, desc.line.write(level)).await {
            Ok(Ok(())) => {
                self.store.apply_write(id, level);
                tracing::debug!(relay = id, on = level, "relay written");
                Ok(())
            }
            Ok(Err(source)) => Err(RelayError::HardwareFault { relay: id, source }),
            Err(_) => Err(RelayError::HardwareTimeout { relay: id }),
        }
    }

    /// The one place every set-class mutation goes through. Cancels the
    /// relay's armed auto-off before applying (a later command overriding
    /// a relay must never be resurrected by its stale timer), validates
    /// any requested auto-off duration, writes, then arms.
    async fn handle_set(
        &mut self,
        id: RelayId,
        state: bool,
        duration: Option<Duration>,
        validate_duration: bool,
    ) -> Result<()> {
        self.registry.resolve(id)?;
        if let (Some(d), true) = (duration, validate_duration) {
            self.check_pulse_bounds(d)?;
        }
        self.disarm(id);
        self.write_relay(id, state).await?;
        if let Some(d) = duration {
            self.arm_auto_off(id, d);
        }
        Ok(())
    }

    async fn handle_toggle(&mut self, id: RelayId) -> Result<bool> {
        self.registry.resolve(id)?;
        let current = self
            .store
            .snapshot()
            .relays
            .get(&id)
            .map(|r| r.desired)
            .unwrap_or(false);
        let next = !current;
        self.handle_set(id, next, None, false).await?;
        Ok(next)
    }

    fn check_pulse_bounds(&self, duration: Duration) -> Result<()> {
        let secs = duration.as_secs_f64();
        if secs < self.limits.pulse_min_secs || secs > self.limits.pulse_max_secs {
            return Err(RelayError::InvalidArgument(format!(
                "duration {secs}s outside {}–{}s",
                self.limits.pulse_min_secs, self.limits.pulse_max_secs
            )));
        }
        Ok(())
    }

    // ── Auto-off timers ───────────────────────────────────────────────

    fn disarm(&mut self, id: RelayId) {
        if let Some(armed) = self.armed.remove(&id) {
            armed.handle.abort();
            tracing::debug!(relay = id, "auto-off timer cancelled");
        }
    }

    fn arm_auto_off(&mut self, id: RelayId, duration: Duration) {
        self.next_op += 1;
        let op_id = self.next_op;
        let tx = self.cmd_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(Command::AutoOff { id, op_id }).await;
        });
        self.armed.insert(id, ArmedOff { op_id, handle });
    }

    async fn handle_auto_off(&mut self, id: RelayId, op_id: u64) {
        // A fire that raced with its own cancellation: the op id no
        // longer matches the armed timer, so the OFF must not apply.
        if self.armed.get(&id).map(|a| a.op_id) != Some(op_id) {
            tracing::debug!(relay = id, "stale auto-off ignored");
            return;
        }
        self.armed.remove(&id);
        if let Err(e) = self.write_relay(id, false).await {
            tracing::warn!(relay = id, error = %e, "auto-off write failed");
        }
    }

    // ── Sequences ─────────────────────────────────────────────────────

    fn handle_start_sequence(&mut self, spec: SequenceSpec) -> Result<SequenceId> {
        spec.validate(&self.limits)?;
        for step in &spec.steps {
            self.registry.resolve(step.relay_id)?;
        }
        if !self.store.snapshot().hardware_ready {
            return Err(RelayError::NotInitialized);
        }

        let run_id = Uuid::new_v4();
        let run = SequenceRun::new(run_id, &spec);
        let tx = self.cmd_tx.clone();
        let stepper = tokio::spawn(async move {
            let mut failed = false;
            for repeat_index in 1..=spec.repeat {
                for (step_index, step) in spec.steps.iter().enumerate() {
                    let (reply, result) = oneshot::channel();
                    let sent = tx
                        .send(Command::SeqStep {
                            run_id,
                            step_index,
                            repeat_index,
                            relay: step.relay_id,
                            state: step.state,
                            reply,
                        })
                        .await;
                    if sent.is_err() {
                        return;
                    }
                    match result.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            // One bad step doesn't halt the run.
                            tracing::warn!(%run_id, step = step_index, error = %e, "sequence step failed");
                            failed = true;
                        }
                        Err(_) => return,
                    }
                    tokio::time::sleep(step.hold()).await;
                }
            }
            let _ = tx.send(Command::SeqFinished { run_id, failed }).await;
        });

        self.runs.insert(
            run_id,
            RunEntry {
                run,
                stepper: Some(stepper),
            },
        );
        tracing::info!(%run_id, "sequence started");
        Ok(run_id)
    }

    async fn handle_seq_step(
        &mut self,
        run_id: SequenceId,
        step_index: usize,
        repeat_index: u32,
        relay: RelayId,
        state: bool,
        reply: oneshot::Sender<Result<()>>,
    ) {
        // A step that was already queued when its run got cancelled:
        // drop the reply, the stepper is being torn down.
        let running = self
            .runs
            .get(&run_id)
            .is_some_and(|e| e.run.status == SequenceStatus::Running);
        if !running {
            return;
        }
        let result = self.handle_set(relay, state, None, false).await;
        if let Some(entry) = self.runs.get_mut(&run_id) {
            entry.run.current_step = step_index;
            entry.run.current_repeat = repeat_index;
        }
        let _ = reply.send(result);
    }

    fn handle_seq_finished(&mut self, run_id: SequenceId, failed: bool) {
        if let Some(entry) = self.runs.get_mut(&run_id) {
            if entry.run.status == SequenceStatus::Running {
                entry.run.status = if failed {
                    SequenceStatus::Failed
                } else {
                    SequenceStatus::Completed
                };
                entry.run.finished_at = Some(Utc::now());
            }
            entry.stepper = None;
            tracing::info!(%run_id, status = ?entry.run.status, "sequence finished");
        }
    }

    fn handle_cancel_sequence(&mut self, id: SequenceId) -> Result<SequenceRun> {
        let entry = self
            .runs
            .get_mut(&id)
            .ok_or(RelayError::SequenceNotFound(id))?;
        if entry.run.status == SequenceStatus::Running {
            if let Some(handle) = entry.stepper.take() {
                handle.abort();
            }
            entry.run.status = SequenceStatus::Cancelled;
            entry.run.finished_at = Some(Utc::now());
            tracing::info!(run_id = %id, "sequence cancelled");
        }
        Ok(entry.run.clone())
    }

    fn cancel_all_runs(&mut self) {
        for entry in self.runs.values_mut() {
            if entry.run.status == SequenceStatus::Running {
                if let Some(handle) = entry.stepper.take() {
                    handle.abort();
                }
                entry.run.status = SequenceStatus::Cancelled;
                entry.run.finished_at = Some(Utc::now());
            }
        }
    }

    // ── Bulk operations ───────────────────────────────────────────────

    async fn handle_all_set(&mut self, state: bool) -> Result<BulkOutcome> {
        if !self.store.snapshot().hardware_ready {
            return Err(RelayError::NotInitialized);
        }
        let ids: Vec<RelayId> = self.registry.ids().collect();
        let mut outcome = BulkOutcome::default();
        for id in ids {
            match self.handle_set(id, state, None, false).await {
                Ok(()) => outcome.applied.push(id),
                Err(e) => {
                    tracing::warn!(relay = id, error = %e, "bulk write failed, continuing");
                    outcome.failed.push((id, e));
                }
            }
        }
        Ok(outcome)
    }

    async fn handle_emergency_stop(&mut self) -> Result<BulkOutcome> {
        tracing::warn!("EMERGENCY STOP");
        for (_, armed) in self.armed.drain() {
            armed.handle.abort();
        }
        self.cancel_all_runs();
        let outcome = self.handle_all_set(false).await;
        self.store.set_emergency_stop(true);
        outcome
    }

    // ── Reconciliation ────────────────────────────────────────────────

    async fn handle_reconcile(&mut self) -> Result<Vec<RelayId>> {
        if !self.store.snapshot().hardware_ready {
            return Err(RelayError::NotInitialized);
        }
        let mut drifted = Vec::new();
        for desc in self.registry.descriptors() {
            match tokio::time::timeout(self.io_timeout, desc.line.read()).await {
                Ok(Ok(observed)) => {
                    if self.store.apply_observation(desc.id, observed) {
                        tracing::warn!(
                            relay = desc.id,
                            observed,
                            "drift: hardware diverged from last write"
                        );
                        drifted.push(desc.id);
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(relay = desc.id, error = %e, "reconcile read failed");
                }
                Err(_) => {
                    tracing::warn!(relay = desc.id, "reconcile read timed out");
                }
            }
        }
        Ok(drifted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelayConfig, Timing};
    use crate::hardware::{MemoryLine, WriteJournal};
    use crate::sequence::SequenceStep;
    use crate::store::StateEvent;
    use std::sync::Mutex;

    struct Fixture {
        coordinator: Coordinator,
        store: Arc<StateStore>,
        lines: Vec<Arc<MemoryLine>>,
        events: mpsc::UnboundedReceiver<StateEvent>,
        journal: WriteJournal,
    }

    /// Initialized four-relay bank on memory lines, with the periodic
    /// reconciler parked far in the future so tests control every event.
    async fn fixture() -> Fixture {
        let config = RelayConfig {
            timing: Timing {
                reconcile_interval_ms: 3_600_000,
                ..Timing::default()
            },
            ..RelayConfig::default()
        };
        let journal: WriteJournal = Arc::new(Mutex::new(Vec::new()));
        let mut lines = Vec::new();
        let registry = Arc::new(
            RelayRegistry::build(&config, |def| {
                let line = Arc::new(MemoryLine::with_journal(def.id, journal.clone()));
                lines.push(line.clone());
                Ok(line)
            })
            .unwrap(),
        );
        registry.initialize(config.timing.io_timeout()).await.unwrap();

        let (store, mut events) = StateStore::new(registry.ids());
        let store = Arc::new(store);
        store.set_hardware_ready(true);
        while events.try_recv().is_ok() {}
        journal.lock().unwrap().clear();

        let coordinator = Coordinator::spawn(registry, store.clone(), &config);
        Fixture {
            coordinator,
            store,
            lines,
            events,
            journal,
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<StateEvent>) -> Vec<StateEvent> {
        let mut out = Vec::new();
        while let Ok(e) = events.try_recv() {
            out.push(e);
        }
        out
    }

    fn desired(store: &StateStore, id: RelayId) -> bool {
        store.snapshot().relays[&id].desired
    }

    fn observed(store: &StateStore, id: RelayId) -> bool {
        store.snapshot().relays[&id].last_observed
    }

    #[tokio::test]
    async fn set_on_then_off_two_notifications() {
        let mut fx = fixture().await;
        fx.coordinator.set_relay(1, true, None).await.unwrap();
        fx.coordinator.set_relay(1, false, None).await.unwrap();

        assert!(!desired(&fx.store, 1));
        assert!(!observed(&fx.store, 1));
        assert_eq!(
            drain(&mut fx.events),
            vec![StateEvent::Written(1), StateEvent::Written(1)]
        );
        assert_eq!(fx.lines[0].writes(), vec![false, true, false]);
    }

    #[tokio::test]
    async fn unknown_relay_rejected_before_hardware() {
        let fx = fixture().await;
        assert!(matches!(
            fx.coordinator.set_relay(9, true, None).await,
            Err(RelayError::InvalidRelay(9))
        ));
        // Nothing was actuated anywhere.
        assert!(fx.journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn hardware_fault_leaves_store_untouched() {
        let mut fx = fixture().await;
        fx.lines[0].fail_writes(true);
        assert!(matches!(
            fx.coordinator.set_relay(1, true, None).await,
            Err(RelayError::HardwareFault { relay: 1, .. })
        ));
        assert!(!desired(&fx.store, 1));
        assert!(drain(&mut fx.events).is_empty());

        // The engine survives: the next command proceeds normally.
        fx.lines[0].fail_writes(false);
        fx.coordinator.set_relay(1, true, None).await.unwrap();
        assert!(desired(&fx.store, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_line_surfaces_timeout_not_hang() {
        let mut fx = fixture().await;
        fx.lines[0].hang_writes(true);
        assert!(matches!(
            fx.coordinator.set_relay(1, true, None).await,
            Err(RelayError::HardwareTimeout { relay: 1 })
        ));
        assert!(!desired(&fx.store, 1));
        assert!(drain(&mut fx.events).is_empty());

        // A stuck line must not block unrelated relays.
        fx.coordinator.set_relay(2, true, None).await.unwrap();
        assert!(desired(&fx.store, 2));
    }

    #[tokio::test]
    async fn rapid_toggles_preserve_parity() {
        let fx = fixture().await;
        let n = 7;
        let mut handles = Vec::new();
        for _ in 0..n {
            let coordinator = fx.coordinator.clone();
            handles.push(tokio::spawn(async move { coordinator.toggle(1).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        // initial false XOR (7 mod 2) = true
        assert!(desired(&fx.store, 1));
        // One initialization write plus one per toggle, none lost.
        assert_eq!(fx.lines[0].writes().len(), n + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_turns_on_then_auto_off() {
        let fx = fixture().await;
        fx.coordinator
            .pulse(1, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(desired(&fx.store, 1));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!desired(&fx.store, 1));
        // Initialization OFF, pulse ON, auto-off.
        assert_eq!(fx.lines[0].writes(), vec![false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_set_cancels_armed_pulse_timer() {
        let fx = fixture().await;
        fx.coordinator
            .pulse(1, Duration::from_millis(200))
            .await
            .unwrap();
        // Override before the timer fires; the stale timer must not
        // resurrect the OFF state.
        fx.coordinator.set_relay(1, true, None).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(desired(&fx.store, 1));
        assert_eq!(fx.lines[0].writes(), vec![false, true, true]);
    }

    #[tokio::test]
    async fn pulse_duration_bounds_enforced() {
        let fx = fixture().await;
        assert!(matches!(
            fx.coordinator.pulse(1, Duration::from_millis(10)).await,
            Err(RelayError::InvalidArgument(_))
        ));
        assert!(matches!(
            fx.coordinator.pulse(1, Duration::from_secs(4000)).await,
            Err(RelayError::InvalidArgument(_))
        ));
        assert!(fx.journal.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_applies_steps_in_literal_order() {
        let fx = fixture().await;
        let spec = SequenceSpec {
            steps: vec![
                SequenceStep {
                    relay_id: 1,
                    state: true,
                    duration: 0.1,
                },
                SequenceStep {
                    relay_id: 2,
                    state: false,
                    duration: 0.1,
                },
            ],
            repeat: 2,
        };
        let run_id = fx.coordinator.run_sequence(spec).await.unwrap();
        assert_eq!(
            fx.coordinator.sequence_status(run_id).await.unwrap().status,
            SequenceStatus::Running
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        let run = fx.coordinator.sequence_status(run_id).await.unwrap();
        assert_eq!(run.status, SequenceStatus::Completed);
        assert_eq!(
            *fx.journal.lock().unwrap(),
            vec![(1, true), (2, false), (1, true), (2, false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_cancel_stops_at_step_boundary() {
        let fx = fixture().await;
        let spec = SequenceSpec {
            steps: vec![
                SequenceStep {
                    relay_id: 1,
                    state: true,
                    duration: 10.0,
                },
                SequenceStep {
                    relay_id: 2,
                    state: true,
                    duration: 10.0,
                },
            ],
            repeat: 1,
        };
        let run_id = fx.coordinator.run_sequence(spec).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let run = fx.coordinator.cancel_sequence(run_id).await.unwrap();
        assert_eq!(run.status, SequenceStatus::Cancelled);

        tokio::time::sleep(Duration::from_secs(30)).await;
        // First step applied, second never did.
        assert_eq!(*fx.journal.lock().unwrap(), vec![(1, true)]);
        // Cancelling again is a no-op, not an error.
        let run = fx.coordinator.cancel_sequence(run_id).await.unwrap();
        assert_eq!(run.status, SequenceStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_step_marks_run_failed_but_continues() {
        let fx = fixture().await;
        fx.lines[0].fail_writes(true);
        let spec = SequenceSpec {
            steps: vec![
                SequenceStep {
                    relay_id: 1,
                    state: true,
                    duration: 0.1,
                },
                SequenceStep {
                    relay_id: 2,
                    state: true,
                    duration: 0.1,
                },
            ],
            repeat: 1,
        };
        let run_id = fx.coordinator.run_sequence(spec).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let run = fx.coordinator.sequence_status(run_id).await.unwrap();
        assert_eq!(run.status, SequenceStatus::Failed);
        // Relay 2's step still ran.
        assert!(desired(&fx.store, 2));
    }

    #[tokio::test]
    async fn sequence_with_unknown_relay_rejected_upfront() {
        let fx = fixture().await;
        let spec = SequenceSpec {
            steps: vec![SequenceStep {
                relay_id: 9,
                state: true,
                duration: 0.5,
            }],
            repeat: 1,
        };
        assert!(matches!(
            fx.coordinator.run_sequence(spec).await,
            Err(RelayError::InvalidRelay(9))
        ));
    }

    #[tokio::test]
    async fn all_on_continues_past_one_failure() {
        let fx = fixture().await;
        fx.lines[2].fail_writes(true);
        let outcome = fx.coordinator.all_on().await.unwrap();
        assert_eq!(outcome.applied, vec![1, 2, 4]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, 3);

        assert!(desired(&fx.store, 1));
        assert!(desired(&fx.store, 2));
        assert!(!desired(&fx.store, 3));
        assert!(desired(&fx.store, 4));
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_stop_cancels_everything() {
        let fx = fixture().await;
        fx.coordinator
            .pulse(1, Duration::from_secs(5))
            .await
            .unwrap();
        let spec = SequenceSpec {
            steps: vec![
                SequenceStep {
                    relay_id: 2,
                    state: true,
                    duration: 10.0,
                },
                SequenceStep {
                    relay_id: 3,
                    state: true,
                    duration: 10.0,
                },
            ],
            repeat: 1,
        };
        let run_id = fx.coordinator.run_sequence(spec).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = fx.coordinator.emergency_stop().await.unwrap();
        assert!(outcome.all_applied());

        let snap = fx.store.snapshot();
        assert!(snap.emergency_stop_engaged);
        for relay in snap.relays.values() {
            assert!(!relay.desired);
        }
        assert_eq!(
            fx.coordinator.sequence_status(run_id).await.unwrap().status,
            SequenceStatus::Cancelled
        );

        // Neither the pulse timer nor the sequence resurrects anything.
        tokio::time::sleep(Duration::from_secs(60)).await;
        for relay in fx.store.snapshot().relays.values() {
            assert!(!relay.desired);
        }

        // The flag is observational: activation still works, and clear
        // resets it.
        fx.coordinator.set_relay(1, true, None).await.unwrap();
        assert!(desired(&fx.store, 1));
        fx.coordinator.clear_emergency_stop().await.unwrap();
        assert!(!fx.store.snapshot().emergency_stop_engaged);
    }

    #[tokio::test]
    async fn reconcile_reports_external_drift() {
        let mut fx = fixture().await;
        fx.coordinator.set_relay(2, true, None).await.unwrap();
        drain(&mut fx.events);

        // Someone flips relay 2 behind the coordinator's back.
        fx.lines[1].simulate_external(false);
        let drifted = fx.coordinator.reconcile().await.unwrap();
        assert_eq!(drifted, vec![2]);
        assert_eq!(drain(&mut fx.events), vec![StateEvent::Drift(2)]);

        let snap = fx.store.snapshot();
        assert!(snap.relays[&2].desired);
        assert!(!snap.relays[&2].last_observed);
        // Only the affected relay moved.
        assert!(!snap.relays[&1].last_observed);

        // A second pass with no further change reports nothing.
        assert!(fx.coordinator.reconcile().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconcile_survives_one_bad_line() {
        let fx = fixture().await;
        fx.lines[0].fail_reads(true);
        fx.lines[3].simulate_external(true);
        let drifted = fx.coordinator.reconcile().await.unwrap();
        assert_eq!(drifted, vec![4]);
    }

    #[tokio::test]
    async fn shutdown_rejects_later_commands() {
        let fx = fixture().await;
        fx.coordinator.shutdown().await;
        assert!(matches!(
            fx.coordinator.set_relay(1, true, None).await,
            Err(RelayError::Shutdown)
        ));
        assert!(!fx.store.snapshot().hardware_ready);
    }

    #[tokio::test]
    async fn commands_before_init_fail() {
        let config = RelayConfig::default();
        let registry = Arc::new(
            RelayRegistry::build(&config, |_| Ok(Arc::new(MemoryLine::new()))).unwrap(),
        );
        let (store, _events) = StateStore::new(registry.ids());
        let store = Arc::new(store);
        // hardware_ready never set
        let coordinator = Coordinator::spawn(registry, store, &config);
        assert!(matches!(
            coordinator.set_relay(1, true, None).await,
            Err(RelayError::NotInitialized)
        ));
    }
}
