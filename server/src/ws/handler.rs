use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::observability::CONNECTIONS;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// GET /ws?token=<credential>
/// The credential is resolved before the upgrade; a missing or rejected
/// credential gets 401 and no session is created.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.token.filter(|t| !t.is_empty()) else {
        tracing::debug!("WebSocket upgrade without token");
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };

    match state.validator.validate(&token).await {
        Ok(identity) => {
            tracing::info!(
                account_id = identity.id,
                name = %identity.name,
                "WebSocket connection authenticated"
            );
            metrics::counter!(CONNECTIONS).increment(1);
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, identity))
        }
        Err(err) => {
            tracing::warn!(error = %err, "WebSocket auth failed");
            (StatusCode::UNAUTHORIZED, err.to_string()).into_response()
        }
    }
}
