use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::state::AppState;
use crate::ws::handler as ws_handler;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    identities: usize,
    sessions: usize,
}

/// Build the axum Router.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (auth via query param)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_export));

    Router::new()
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// Liveness plus a count of connected clients
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        identities: state.registry.identity_count().await,
        sessions: state.registry.session_count().await,
    })
}

/// Prometheus text exposition
async fn metrics_export(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
