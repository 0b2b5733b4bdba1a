use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use futures_util::{Sink, SinkExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::GatewayError;
use crate::ws::protocol::OutboundEnvelope;

/// Upper bound on a single write when none is configured.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Write half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// One live connection and its write-serialization state.
///
/// The read half is owned by the connection's actor; this struct only
/// carries what other tasks need in order to push frames to the client.
pub struct Session {
    id: Uuid,
    identity: Identity,
    sink: Mutex<FrameSink>,
    closed: CancellationToken,
    write_timeout: Duration,
}

impl Session {
    pub fn new(identity: Identity, sink: FrameSink) -> Arc<Self> {
        Self::with_write_timeout(identity, sink, DEFAULT_WRITE_TIMEOUT)
    }

    /// A write (including the wait for the sink lock) that takes longer
    /// than `write_timeout` fails and closes the session.
    pub fn with_write_timeout(
        identity: Identity,
        sink: FrameSink,
        write_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::now_v7(),
            identity,
            sink: Mutex::new(sink),
            closed: CancellationToken::new(),
            write_timeout,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Serialize and write one envelope as a text frame.
    pub async fn write_envelope(&self, envelope: &OutboundEnvelope) -> Result<(), GatewayError> {
        let text = serde_json::to_string(envelope).map_err(GatewayError::Encode)?;
        self.write_frame(Message::Text(text.into())).await
    }

    /// Write a raw frame. A failed or timed-out write trips the close
    /// signal so the read loop tears the session down. Writers queued
    /// behind a stuck one give up as soon as the signal trips.
    pub async fn write_frame(&self, frame: Message) -> Result<(), GatewayError> {
        if self.closed.is_cancelled() {
            return Err(GatewayError::Transport("session closed".to_string()));
        }

        let write = async {
            let mut sink = self.sink.lock().await;
            if self.closed.is_cancelled() {
                return Err(GatewayError::Transport("session closed".to_string()));
            }
            sink.send(frame).await.map_err(|e| {
                self.closed.cancel();
                GatewayError::Transport(e.to_string())
            })
        };

        let result = tokio::select! {
            _ = self.closed.cancelled() => {
                return Err(GatewayError::Transport("session closed".to_string()));
            }
            result = timeout(self.write_timeout, write) => result,
        };

        result.unwrap_or_else(|_| {
            tracing::warn!(
                session_id = %self.id,
                account_id = self.identity.id,
                timeout_ms = self.write_timeout.as_millis() as u64,
                "Write timed out, closing session"
            );
            self.closed.cancel();
            Err(GatewayError::Transport("write timed out".to_string()))
        })
    }

    /// Send a close frame (best effort, bounded by the write timeout) and
    /// trip the close signal.
    pub async fn close(&self, code: u16, reason: &str) {
        if self.closed.is_cancelled() {
            return;
        }
        let frame = Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        }));
        let send = async {
            let mut sink = self.sink.lock().await;
            let _ = sink.send(frame).await;
        };
        let _ = timeout(self.write_timeout, send).await;
        self.closed.cancel();
    }

    /// Resolves once the session has been closed or a write failed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
