use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET / — API information payload.
pub async fn api_info(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "Relay Coordination Engine",
        "version": env!("CARGO_PKG_VERSION"),
        "relays": app.registry.ids().collect::<Vec<_>>(),
        "endpoints": {
            "GET /status": "Get all relay states",
            "POST /relay/on": "Turn relay ON",
            "POST /relay/off": "Turn relay OFF",
            "POST /relay/toggle": "Toggle relay state",
            "POST /relay/pulse": "Pulse relay for duration",
            "POST /sequence": "Run relay sequence",
            "GET /sequence/{id}": "Sequence run status",
            "POST /sequence/{id}/cancel": "Cancel a running sequence",
            "POST /all/on": "Turn all relays ON",
            "POST /all/off": "Turn all relays OFF",
            "POST /emergency/stop": "Emergency stop - turn all relays OFF",
            "POST /emergency/clear": "Clear the emergency stop flag",
            "POST /sync": "Reconcile tracked state with hardware",
            "GET /ws": "WebSocket state feed"
        }
    }))
}
