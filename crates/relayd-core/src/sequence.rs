use crate::config::Limits;
use crate::error::{RelayError, Result};
use crate::registry::RelayId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub type SequenceId = Uuid;

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One timed relay operation inside a sequence run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub relay_id: RelayId,
    pub state: bool,
    /// Seconds to hold before the next step.
    pub duration: f64,
}

impl SequenceStep {
    pub fn hold(&self) -> Duration {
        Duration::from_secs_f64(self.duration)
    }
}

/// A validated sequence request: ordered steps, repeated `repeat` times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSpec {
    pub steps: Vec<SequenceStep>,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

fn default_repeat() -> u32 {
    1
}

impl SequenceSpec {
    /// Bounds check against the configured limits. Relay ids are checked
    /// separately against the registry; this only validates shape.
    pub fn validate(&self, limits: &Limits) -> Result<()> {
        if self.steps.is_empty() {
            return Err(RelayError::InvalidArgument(
                "sequence must contain at least one step".into(),
            ));
        }
        if self.steps.len() > limits.max_steps {
            return Err(RelayError::InvalidArgument(format!(
                "sequence has {} steps, maximum is {}",
                self.steps.len(),
                limits.max_steps
            )));
        }
        if self.repeat == 0 || self.repeat > limits.max_repeat {
            return Err(RelayError::InvalidArgument(format!(
                "repeat must be between 1 and {}",
                limits.max_repeat
            )));
        }
        for (i, step) in self.steps.iter().enumerate() {
            // NaN fails both comparisons, so check finiteness explicitly.
            if !step.duration.is_finite()
                || step.duration < limits.step_min_secs
                || step.duration > limits.step_max_secs
            {
                return Err(RelayError::InvalidArgument(format!(
                    "step {} duration {}s outside {}–{}s",
                    i, step.duration, limits.step_min_secs, limits.step_max_secs
                )));
            }
        }
        Ok(())
    }

    /// Total hold time if every step runs to completion.
    pub fn estimated_duration_secs(&self) -> f64 {
        self.steps.iter().map(|s| s.duration).sum::<f64>() * f64::from(self.repeat)
    }
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SequenceStatus {
    pub fn is_terminal(self) -> bool {
        self != SequenceStatus::Running
    }
}

/// Progress record for one sequence run. Mutated only by the coordinator;
/// retained read-only after the run reaches a terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceRun {
    pub id: SequenceId,
    pub status: SequenceStatus,
    /// Zero-based index of the step most recently applied.
    pub current_step: usize,
    /// One-based repetition currently executing.
    pub current_repeat: u32,
    pub total_steps: usize,
    pub repeat: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SequenceRun {
    pub fn new(id: SequenceId, spec: &SequenceSpec) -> Self {
        Self {
            id,
            status: SequenceStatus::Running,
            current_step: 0,
            current_repeat: 1,
            total_steps: spec.steps.len(),
            repeat: spec.repeat,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
