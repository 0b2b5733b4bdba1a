use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::auth::Identity;
use crate::chat::MessageRouter;
use crate::config::SessionConfig;
use crate::error::GatewayError;
use crate::observability::{MESSAGES_RECEIVED, RESPONSES};
use crate::state::AppState;
use crate::ws::protocol::{self, CloseKind, InboundEnvelope, OutboundEnvelope, ReadEvent};
use crate::ws::session::Session;

/// Close code sent when the client stops answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Run one authenticated connection until it closes.
///
/// The read half stays in this task. The write half moves into a `Session`
/// that is registered so fan-out can reach it from other tasks.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (sink, mut stream) = socket.split();
    let session = Session::with_write_timeout(
        identity,
        Box::pin(sink),
        Duration::from_secs(state.session.write_timeout_secs),
    );
    let account_id = session.identity().id;
    let session_id = session.id();

    state.registry.register(session.clone()).await;
    tracing::info!(account_id, session_id = %session_id, "WebSocket actor started");

    // One slot is enough to mark "a pong arrived"; extras are dropped.
    let (pong_tx, pong_rx) = mpsc::channel::<()>(1);
    let keepalive_handle = (state.session.ping_interval_secs > 0)
        .then(|| tokio::spawn(keepalive(session.clone(), state.session.clone(), pong_rx)));

    let close = loop {
        let event = tokio::select! {
            _ = session.closed() => break CloseKind::Unexpected("closed by server".to_string()),
            event = protocol::read_envelope(&mut stream) => event,
        };

        match event {
            ReadEvent::Envelope(envelope) => {
                metrics::counter!(MESSAGES_RECEIVED, "type" => envelope.tag()).increment(1);
                if state.session.ordered_dispatch {
                    handle_frame(state.router.clone(), session.clone(), envelope).await;
                } else {
                    tokio::spawn(handle_frame(state.router.clone(), session.clone(), envelope));
                }
            }
            ReadEvent::Rejected(err) => {
                metrics::counter!(MESSAGES_RECEIVED, "type" => "rejected").increment(1);
                tracing::debug!(account_id, error = %err, "Rejected inbound frame");
                respond(&session, Err(err)).await;
            }
            // Pings are answered by the WebSocket layer itself.
            ReadEvent::Ping => {}
            ReadEvent::Pong => {
                let _ = pong_tx.try_send(());
            }
            ReadEvent::Closed(kind) => break kind,
        }
    };

    if let Some(handle) = keepalive_handle {
        handle.abort();
    }
    state.registry.unregister(&session).await;

    match close {
        CloseKind::Graceful => {
            tracing::info!(account_id, session_id = %session_id, "WebSocket closed")
        }
        CloseKind::Unexpected(reason) => tracing::warn!(
            account_id,
            session_id = %session_id,
            reason = %reason,
            "WebSocket closed unexpectedly"
        ),
    }
}

/// Apply one frame and answer on the originating session.
async fn handle_frame(router: MessageRouter, session: Arc<Session>, envelope: InboundEnvelope) {
    let tag = envelope.tag();
    let result = router.handle(session.identity(), envelope).await;
    if let Err(err) = &result {
        tracing::debug!(
            account_id = session.identity().id,
            tag,
            error = %err,
            "Inbound frame failed"
        );
    }
    respond(&session, result).await;
}

async fn respond(session: &Session, result: Result<(), GatewayError>) {
    let envelope = match &result {
        Ok(()) => OutboundEnvelope::success(),
        Err(err) => OutboundEnvelope::error(err),
    };
    if let OutboundEnvelope::Response { status, .. } = &envelope {
        metrics::counter!(RESPONSES, "status" => status.as_str()).increment(1);
    }
    if let Err(e) = session.write_envelope(&envelope).await {
        tracing::debug!(session_id = %session.id(), error = %e, "Failed to write response");
    }
}

/// Ping periodically; close the session if a pong does not come back in time.
async fn keepalive(
    session: Arc<Session>,
    config: SessionConfig,
    mut pong_rx: mpsc::Receiver<()>,
) {
    let mut ping_timer = interval(Duration::from_secs(config.ping_interval_secs));
    let pong_timeout = Duration::from_secs(config.pong_timeout_secs);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Unsolicited pongs don't count for this round.
        while pong_rx.try_recv().is_ok() {}

        if session.write_frame(Message::Ping(vec![1, 2, 3, 4].into())).await.is_err() {
            break;
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(session_id = %session.id(), "Pong timeout, closing connection");
                session.close(CLOSE_GOING_AWAY, "Pong timeout").await;
                break;
            }
        }
    }
}
