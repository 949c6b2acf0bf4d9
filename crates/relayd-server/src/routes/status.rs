use axum::extract::State;
use axum::Json;
use relayd_core::status::StatusReport;

use crate::state::AppState;

/// GET /status — current tracked state of every relay. Reads the store
/// snapshot only; never touches hardware.
pub async fn get_status(State(app): State<AppState>) -> Json<StatusReport> {
    Json(StatusReport::build(&app.registry, &app.store.snapshot()))
}
