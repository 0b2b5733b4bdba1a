//! Record types stored by the gateway.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs,
//! and double as the JSON shapes sent to clients and across the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::StoreError;

/// Numeric account identifier issued by the account service.
pub type AccountId = i64;

/// Group identifier (opaque string, usually a UUID).
pub type GroupId = String;

/// Kind of a chat message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Message,
    File,
    Event,
    Other,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Message => "Message",
            ContentType::File => "File",
            ContentType::Event => "Event",
            ContentType::Other => "Other",
        }
    }

    /// Only these may be submitted by clients over the socket.
    pub fn is_client_submittable(&self) -> bool {
        matches!(self, ContentType::Message | ContentType::File)
    }
}

impl FromStr for ContentType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Message" => Ok(ContentType::Message),
            "File" => Ok(ContentType::File),
            "Event" => Ok(ContentType::Event),
            "Other" => Ok(ContentType::Other),
            other => Err(StoreError::InvalidValue {
                kind: "content type",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationType {
    GroupEvent,
    GroupRequest,
    Other,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::GroupEvent => "GroupEvent",
            NotificationType::GroupRequest => "GroupRequest",
            NotificationType::Other => "Other",
        }
    }
}

impl FromStr for NotificationType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GroupEvent" => Ok(NotificationType::GroupEvent),
            "GroupRequest" => Ok(NotificationType::GroupRequest),
            "Other" => Ok(NotificationType::Other),
            other => Err(StoreError::InvalidValue {
                kind: "notification type",
                value: other.to_string(),
            }),
        }
    }
}

/// Group record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub visibility: bool,
    pub created_at: DateTime<Utc>,
}

/// Membership of an account in a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub group_id: GroupId,
    pub account_id: AccountId,
    pub joined_at: DateTime<Utc>,
    pub notify: bool,
    pub role: String,
}

/// A persisted chat message. Also the payload published on the message stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub group_id: GroupId,
    pub sender_id: AccountId,
    pub sender_name: String,
    pub group_name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
}

/// One recipient's copy of a group event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: AccountId,
    pub sender_id: AccountId,
    pub group_id: GroupId,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Build the notification `recipient` receives for a chat message.
    pub fn for_message(message: &ChatMessage, recipient: AccountId) -> Self {
        Self {
            recipient_id: recipient,
            sender_id: message.sender_id,
            group_id: message.group_id.clone(),
            notification_type: NotificationType::GroupEvent,
            content: format!("{}: {}", message.sender_name, message.content),
            created_at: message.created_at,
        }
    }
}

/// Read acknowledgement for a group's notifications of one type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSeenMark {
    pub account_id: AccountId,
    pub group_id: GroupId,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub created_at: DateTime<Utc>,
    pub seen_at: DateTime<Utc>,
}
