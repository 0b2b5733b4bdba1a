//! JSON wire protocol spoken over the WebSocket.

use axum::extract::ws::Message;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::db::models::{ContentType, Notification, NotificationType};
use crate::error::GatewayError;

/// Inbound tag for submitting a chat message.
pub const TAG_NEW_MESSAGE: &str = "message-new";
/// Inbound tag for acknowledging notifications as read.
pub const TAG_MARK_READ: &str = "notification-read";

/// Close codes that count as an orderly shutdown.
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_NO_STATUS: u16 = 1005;

/// Payload of a `message-new` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewMessage {
    pub group_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
}

/// Payload of a `notification-read` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarkNotificationRead {
    pub group_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
}

/// A decoded and field-validated client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEnvelope {
    NewMessage(NewMessage),
    MarkNotificationRead(MarkNotificationRead),
}

impl InboundEnvelope {
    pub fn tag(&self) -> &'static str {
        match self {
            InboundEnvelope::NewMessage(_) => TAG_NEW_MESSAGE,
            InboundEnvelope::MarkNotificationRead(_) => TAG_MARK_READ,
        }
    }

    pub fn group_id(&self) -> &str {
        match self {
            InboundEnvelope::NewMessage(m) => &m.group_id,
            InboundEnvelope::MarkNotificationRead(m) => &m.group_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Success => "success",
            ResponseStatus::Error => "error",
        }
    }
}

/// Frames the gateway sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundEnvelope {
    Response {
        status: ResponseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Notification {
        notification: Notification,
    },
}

impl OutboundEnvelope {
    pub fn success() -> Self {
        OutboundEnvelope::Response {
            status: ResponseStatus::Success,
            content: None,
        }
    }

    pub fn error(err: &GatewayError) -> Self {
        OutboundEnvelope::Response {
            status: ResponseStatus::Error,
            content: Some(err.to_string()),
        }
    }

    pub fn notification(notification: Notification) -> Self {
        OutboundEnvelope::Notification { notification }
    }

    /// Wire tag, as written in the `type` field.
    pub fn tag(&self) -> &'static str {
        match self {
            OutboundEnvelope::Response { .. } => "response",
            OutboundEnvelope::Notification { .. } => "notification",
        }
    }
}

/// Outer shape shared by every inbound frame. The payload is decoded
/// only after the tag is known to be supported.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decode and validate one inbound frame.
pub fn decode_envelope(bytes: &[u8]) -> Result<InboundEnvelope, GatewayError> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| GatewayError::Validation(format!("malformed frame: {}", e)))?;

    let envelope = match raw.kind.as_str() {
        TAG_NEW_MESSAGE => {
            let msg: NewMessage = serde_json::from_value(raw.data).map_err(|e| {
                GatewayError::Validation(format!("invalid {} payload: {}", TAG_NEW_MESSAGE, e))
            })?;
            InboundEnvelope::NewMessage(msg)
        }
        TAG_MARK_READ => {
            let mark: MarkNotificationRead = serde_json::from_value(raw.data).map_err(|e| {
                GatewayError::Validation(format!("invalid {} payload: {}", TAG_MARK_READ, e))
            })?;
            InboundEnvelope::MarkNotificationRead(mark)
        }
        other => {
            return Err(GatewayError::UnsupportedType(format!(
                "unsupported message type {:?} (expected {:?} or {:?})",
                other, TAG_NEW_MESSAGE, TAG_MARK_READ
            )))
        }
    };

    validate(&envelope)?;
    Ok(envelope)
}

fn validate(envelope: &InboundEnvelope) -> Result<(), GatewayError> {
    if envelope.group_id().trim().is_empty() {
        return Err(GatewayError::Validation("group_id is required".to_string()));
    }

    if let InboundEnvelope::NewMessage(msg) = envelope {
        if msg.content.is_empty() {
            return Err(GatewayError::Validation(
                "content must not be empty".to_string(),
            ));
        }
        if !msg.content_type.is_client_submittable() {
            return Err(GatewayError::Validation(format!(
                "message type {} cannot be submitted",
                msg.content_type.as_str()
            )));
        }
    }

    Ok(())
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseKind {
    Graceful,
    Unexpected(String),
}

/// Result of waiting for the next client frame.
#[derive(Debug)]
pub enum ReadEvent {
    Envelope(InboundEnvelope),
    /// Frame was rejected; the connection stays open.
    Rejected(GatewayError),
    Ping,
    Pong,
    /// The connection is finished. Fatal to the session.
    Closed(CloseKind),
}

/// Wait for the next frame and classify it.
pub async fn read_envelope<S>(stream: &mut S) -> ReadEvent
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    match stream.next().await {
        Some(Ok(Message::Text(text))) => into_event(decode_envelope(text.as_str().as_bytes())),
        Some(Ok(Message::Binary(data))) => into_event(decode_envelope(&data)),
        Some(Ok(Message::Ping(_))) => ReadEvent::Ping,
        Some(Ok(Message::Pong(_))) => ReadEvent::Pong,
        Some(Ok(Message::Close(frame))) => ReadEvent::Closed(classify_close(frame.map(|f| f.code))),
        Some(Err(e)) => ReadEvent::Closed(CloseKind::Unexpected(e.to_string())),
        None => ReadEvent::Closed(CloseKind::Graceful),
    }
}

fn into_event(result: Result<InboundEnvelope, GatewayError>) -> ReadEvent {
    match result {
        Ok(envelope) => ReadEvent::Envelope(envelope),
        Err(err) => ReadEvent::Rejected(err),
    }
}

fn classify_close(code: Option<u16>) -> CloseKind {
    match code {
        None | Some(CLOSE_NORMAL) | Some(CLOSE_GOING_AWAY) | Some(CLOSE_NO_STATUS) => {
            CloseKind::Graceful
        }
        Some(code) => CloseKind::Unexpected(format!("close code {}", code)),
    }
}
