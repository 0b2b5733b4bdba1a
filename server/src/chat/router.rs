use std::sync::Arc;

use chrono::Utc;

use crate::auth::Identity;
use crate::chat::fanout::{FanoutEngine, Origin};
use crate::db::models::{ChatMessage, NotificationSeenMark};
use crate::db::Store;
use crate::error::{GatewayError, NotFound};
use crate::ws::protocol::{InboundEnvelope, MarkNotificationRead, NewMessage};

/// Applies validated client frames. Holds no per-connection state.
#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<dyn Store>,
    fanout: FanoutEngine,
}

impl MessageRouter {
    pub fn new(store: Arc<dyn Store>, fanout: FanoutEngine) -> Self {
        Self { store, fanout }
    }

    /// Handle one frame from `sender`. Any stage that fails stops the
    /// stages after it.
    pub async fn handle(
        &self,
        sender: &Identity,
        envelope: InboundEnvelope,
    ) -> Result<(), GatewayError> {
        match envelope {
            InboundEnvelope::NewMessage(msg) => self.new_message(sender, msg).await,
            InboundEnvelope::MarkNotificationRead(mark) => self.mark_read(sender, mark).await,
        }
    }

    async fn new_message(&self, sender: &Identity, msg: NewMessage) -> Result<(), GatewayError> {
        let group = self
            .store
            .get_group(&msg.group_id)
            .await?
            .ok_or(GatewayError::NotFound(NotFound::Group))?;

        self.store
            .check_participant(sender.id, &group.id)
            .await?
            .ok_or(GatewayError::NotFound(NotFound::NotAParticipant))?;

        let message = ChatMessage {
            group_id: group.id,
            sender_id: sender.id,
            sender_name: sender.name.clone(),
            group_name: group.name,
            content: msg.content,
            content_type: msg.content_type,
            created_at: Utc::now(),
        };
        self.store.append_message(&message).await?;

        self.fanout.dispatch(&message, Origin::Local).await;
        Ok(())
    }

    async fn mark_read(
        &self,
        sender: &Identity,
        mark: MarkNotificationRead,
    ) -> Result<(), GatewayError> {
        let now = Utc::now();
        let seen = NotificationSeenMark {
            account_id: sender.id,
            group_id: mark.group_id,
            notification_type: mark.notification_type,
            created_at: now,
            seen_at: now,
        };
        self.store.append_seen_mark(&seen).await?;

        tracing::debug!(
            account_id = sender.id,
            group_id = %seen.group_id,
            notification_type = seen.notification_type.as_str(),
            "Notifications marked as read"
        );
        Ok(())
    }
}
