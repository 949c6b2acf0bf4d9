use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::error::AppError;
use crate::state::AppState;

/// POST /emergency/stop — preemptive: jumps ahead of every queued command,
/// cancels all timers and sequence runs, then drives every relay OFF.
pub async fn stop(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = app.coordinator.emergency_stop().await?;
    Ok(Json(serde_json::json!({
        "message": "EMERGENCY STOP - All relays turned OFF",
        "timestamp": Utc::now(),
        "relays": outcome.applied,
        "failed": outcome
            .failed
            .iter()
            .map(|(id, err)| serde_json::json!({ "relay_id": id, "error": err.to_string() }))
            .collect::<Vec<_>>(),
    })))
}

/// POST /emergency/clear — clears the latched flag; relays stay OFF until
/// commanded otherwise.
pub async fn clear(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    app.coordinator.clear_emergency_stop().await?;
    Ok(Json(serde_json::json!({
        "message": "Emergency stop cleared",
        "emergency_stop": false,
    })))
}
