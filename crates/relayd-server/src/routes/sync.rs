use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// POST /sync — on-demand reconcile pass against the hardware. Returns
/// the ids whose observed state differed from what the store tracked.
pub async fn sync(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let drifted = app.coordinator.reconcile().await?;
    Ok(Json(serde_json::json!({
        "message": "Reconcile pass complete",
        "drifted": drifted,
    })))
}
