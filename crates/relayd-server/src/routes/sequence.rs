use axum::extract::{Path, State};
use axum::Json;
use relayd_core::sequence::{SequenceId, SequenceRun, SequenceSpec};

use crate::error::AppError;
use crate::state::AppState;

/// POST /sequence — start a sequence run. Validation happens inside the
/// coordinator; the run executes asynchronously and this returns at once.
pub async fn start(
    State(app): State<AppState>,
    Json(spec): Json<SequenceSpec>,
) -> Result<Json<serde_json::Value>, AppError> {
    let steps = spec.steps.len();
    let repeat = spec.repeat;
    let estimated = spec.estimated_duration_secs();
    let id = app.coordinator.run_sequence(spec).await?;
    Ok(Json(serde_json::json!({
        "message": format!("Sequence started with {steps} steps, {repeat} repetitions"),
        "id": id,
        "steps": steps,
        "repetitions": repeat,
        "estimated_duration": estimated,
    })))
}

/// GET /sequence/{id} — progress of a run, including finished ones.
pub async fn status(
    State(app): State<AppState>,
    Path(id): Path<SequenceId>,
) -> Result<Json<SequenceRun>, AppError> {
    let run = app.coordinator.sequence_status(id).await?;
    Ok(Json(run))
}

/// POST /sequence/{id}/cancel — idempotent; cancelling a finished run
/// just returns its terminal record.
pub async fn cancel(
    State(app): State<AppState>,
    Path(id): Path<SequenceId>,
) -> Result<Json<SequenceRun>, AppError> {
    let run = app.coordinator.cancel_sequence(id).await?;
    Ok(Json(run))
}
