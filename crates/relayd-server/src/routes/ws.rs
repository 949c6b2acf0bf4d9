use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use relayd_core::status::StatusReport;
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;

/// GET /ws — push-based state feed. Each connection gets the current
/// report immediately, then one report per state change or heartbeat.
pub async fn ws_handler(State(app): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(socket, app))
}

async fn send_report(socket: &mut WebSocket, report: &StatusReport) -> Result<(), axum::Error> {
    let text = serde_json::to_string(report).map_err(axum::Error::new)?;
    socket.send(Message::Text(text.into())).await
}

async fn session(mut socket: WebSocket, app: AppState) {
    let mut reports = app.broadcaster.subscribe();

    if send_report(&mut socket, &app.broadcaster.current())
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            update = reports.recv() => {
                let report = match update {
                    Ok(report) => report,
                    // Slow consumer: skip the backlog, resync to latest.
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "subscriber lagged, resyncing");
                        app.broadcaster.current()
                    }
                    Err(RecvError::Closed) => break,
                };
                if send_report(&mut socket, &report).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match text.as_str() {
                            "get_status" => {
                                if send_report(&mut socket, &app.broadcaster.current())
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                                continue;
                            }
                            "ping" => Message::Text("pong".into()),
                            _ => Message::Text(text),
                        };
                        if socket.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
