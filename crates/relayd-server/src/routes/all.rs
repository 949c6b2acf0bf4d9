use axum::extract::State;
use axum::Json;
use relayd_core::coordinator::BulkOutcome;

use crate::error::AppError;
use crate::state::AppState;

fn outcome_json(message: &str, outcome: &BulkOutcome) -> serde_json::Value {
    serde_json::json!({
        "message": message,
        "relays": outcome.applied,
        "failed": outcome
            .failed
            .iter()
            .map(|(id, err)| serde_json::json!({ "relay_id": id, "error": err.to_string() }))
            .collect::<Vec<_>>(),
    })
}

/// POST /all/on — drives every relay ON in registry order; a single
/// relay's failure is reported in `failed` without aborting the pass.
pub async fn all_on(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = app.coordinator.all_on().await?;
    Ok(Json(outcome_json("All relays turned ON", &outcome)))
}

/// POST /all/off
pub async fn all_off(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = app.coordinator.all_off().await?;
    Ok(Json(outcome_json("All relays turned OFF", &outcome)))
}
