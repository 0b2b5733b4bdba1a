//! Integration tests for token validation at the WebSocket handshake.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, routing::post, Json, Router};
use common::*;
use huddle_gateway::auth::remote::RemoteValidator;
use huddle_gateway::auth::TokenValidator;
use huddle_gateway::broker::MemoryHub;
use huddle_gateway::error::GatewayError;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite;

/// Stand-in account service: "T1" is alice, "T0" maps to a non-positive id,
/// "BAD" returns an unparseable body, anything else is refused.
async fn start_account_service() -> SocketAddr {
    async fn validate(Json(body): Json<Value>) -> (StatusCode, String) {
        match body["token"].as_str() {
            Some("T1") => (StatusCode::OK, json!({"id": 42, "name": "alice"}).to_string()),
            Some("T0") => (StatusCode::OK, json!({"id": 0, "name": "nobody"}).to_string()),
            Some("BAD") => (StatusCode::OK, "not json".to_string()),
            _ => (StatusCode::UNAUTHORIZED, String::new()),
        }
    }

    let app = Router::new().route("/validate", post(validate));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn remote_validator(addr: SocketAddr) -> RemoteValidator {
    RemoteValidator::new(
        format!("http://{}/validate", addr),
        Duration::from_secs(2),
    )
    .unwrap()
}

#[tokio::test]
async fn test_remote_validator_accepts_known_token() {
    let addr = start_account_service().await;
    let validator = remote_validator(addr);

    assert_eq!(validator.validate("T1").await.unwrap(), identity(42, "alice"));
}

#[tokio::test]
async fn test_remote_validator_fails_closed() {
    let addr = start_account_service().await;
    let validator = remote_validator(addr);

    for token in ["nope", "T0", "BAD"] {
        assert!(
            matches!(validator.validate(token).await, Err(GatewayError::Auth(_))),
            "token {:?} should be rejected",
            token
        );
    }
}

#[tokio::test]
async fn test_unreachable_validator_is_auth_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let validator = remote_validator(addr);
    assert!(matches!(
        validator.validate("T1").await,
        Err(GatewayError::Auth(_))
    ));
}

#[tokio::test]
async fn test_handshake_uses_remote_validator() {
    let accounts = start_account_service().await;
    let server = start_test_server_with(
        Arc::new(MemoryHub::default().connect()),
        Arc::new(remote_validator(accounts)),
    )
    .await;

    let (_ws, _) = tokio_tungstenite::connect_async(server.ws_url("T1"))
        .await
        .expect("T1 should be accepted");
    server.wait_for_sessions(1).await;
    assert_eq!(server.state.registry.snapshot_for(42).await.len(), 1);

    let err = tokio_tungstenite::connect_async(server.ws_url("T2"))
        .await
        .expect_err("T2 should be refused");
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("Expected HTTP 401, got {:?}", other),
    }
    assert_eq!(server.state.registry.session_count().await, 1);
}

#[tokio::test]
async fn test_expired_jwt_is_refused() {
    let server = start_test_server(Arc::new(MemoryHub::default().connect())).await;
    let token = huddle_gateway::auth::jwt::issue_access_token(
        SECRET,
        &identity(42, "alice"),
        -3600,
    )
    .unwrap();

    let err = tokio_tungstenite::connect_async(server.ws_url(&token))
        .await
        .expect_err("Expired token should be refused");
    assert!(matches!(err, tungstenite::Error::Http(_)));
    assert_eq!(server.state.registry.session_count().await, 0);
}
