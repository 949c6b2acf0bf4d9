use axum::extract::State;
use axum::Json;
use relayd_core::registry::RelayId;
use serde::Deserialize;
use std::time::Duration;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RelayControl {
    pub relay_id: RelayId,
    pub duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RelaySelect {
    pub relay_id: RelayId,
}

/// Seconds-as-float from the wire into a `Duration`. NaN, negative, and
/// `Duration`-overflowing values are all rejected here; range limits are
/// enforced by the coordinator.
fn parse_duration(secs: f64) -> Result<Duration, AppError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(AppError::bad_request(format!(
            "duration must be a positive number of seconds, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| AppError::bad_request(format!("duration {secs}s is out of range")))
}

/// POST /relay/on — turn a relay ON, with an optional auto-off duration.
pub async fn turn_on(
    State(app): State<AppState>,
    Json(body): Json<RelayControl>,
) -> Result<Json<serde_json::Value>, AppError> {
    let duration = body.duration.map(parse_duration).transpose()?;
    app.coordinator
        .set_relay(body.relay_id, true, duration)
        .await?;

    let message = match body.duration {
        Some(secs) => format!("Relay {} turned ON for {secs} seconds", body.relay_id),
        None => format!("Relay {} turned ON", body.relay_id),
    };
    Ok(Json(serde_json::json!({
        "message": message,
        "relay_id": body.relay_id,
        "state": true,
        "duration": body.duration,
    })))
}

/// POST /relay/off
pub async fn turn_off(
    State(app): State<AppState>,
    Json(body): Json<RelaySelect>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.coordinator.set_relay(body.relay_id, false, None).await?;
    Ok(Json(serde_json::json!({
        "message": format!("Relay {} turned OFF", body.relay_id),
        "relay_id": body.relay_id,
        "state": false,
    })))
}

/// POST /relay/toggle — read-then-write happens inside the coordinator,
/// so concurrent toggles never race on the current state.
pub async fn toggle(
    State(app): State<AppState>,
    Json(body): Json<RelaySelect>,
) -> Result<Json<serde_json::Value>, AppError> {
    let new_state = app.coordinator.toggle(body.relay_id).await?;
    Ok(Json(serde_json::json!({
        "message": format!(
            "Relay {} toggled to {}",
            body.relay_id,
            if new_state { "ON" } else { "OFF" }
        ),
        "relay_id": body.relay_id,
        "previous_state": !new_state,
        "new_state": new_state,
    })))
}

/// POST /relay/pulse — ON now, OFF after `duration`. Returns immediately;
/// the auto-off runs as a coordinator timer rather than blocking the
/// request for the pulse width.
pub async fn pulse(
    State(app): State<AppState>,
    Json(body): Json<RelayControl>,
) -> Result<Json<serde_json::Value>, AppError> {
    let secs = body
        .duration
        .ok_or_else(|| AppError::bad_request("duration is required for pulse operation"))?;
    let duration = parse_duration(secs)?;
    app.coordinator.pulse(body.relay_id, duration).await?;
    Ok(Json(serde_json::json!({
        "message": format!("Relay {} pulsed for {secs} seconds", body.relay_id),
        "relay_id": body.relay_id,
        "duration": secs,
    })))
}
