pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use state::AppState;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::root::api_info))
        .route("/status", get(routes::status::get_status))
        // Single-relay commands
        .route("/relay/on", post(routes::relay::turn_on))
        .route("/relay/off", post(routes::relay::turn_off))
        .route("/relay/toggle", post(routes::relay::toggle))
        .route("/relay/pulse", post(routes::relay::pulse))
        // Sequences
        .route("/sequence", post(routes::sequence::start))
        .route("/sequence/{id}", get(routes::sequence::status))
        .route("/sequence/{id}/cancel", post(routes::sequence::cancel))
        // Bulk
        .route("/all/on", post(routes::all::all_on))
        .route("/all/off", post(routes::all::all_off))
        // Emergency stop
        .route("/emergency/stop", post(routes::emergency::stop))
        .route("/emergency/clear", post(routes::emergency::clear))
        // Reconciliation
        .route("/sync", post(routes::sync::sync))
        // Subscribers
        .route("/ws", get(routes::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Bind and serve until the returned future is dropped or the listener
/// fails.
pub async fn serve(app_state: AppState, listen: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    serve_on(app_state, listener).await
}

/// Serve on a pre-bound listener so the caller can read the actual port
/// first (useful when the configured port is 0).
pub async fn serve_on(
    app_state: AppState,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let app = build_router(app_state);

    tracing::info!("relay engine listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
