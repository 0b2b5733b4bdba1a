//! Cross-instance notification fan-out.
//!
//! A message is fanned out once per instance: the instance that accepted it
//! (`Origin::Local`) persists notifications, pushes to its own sessions and
//! publishes to the broker. Every other instance receives the publication
//! through the bridge and runs the same steps as `Origin::Remote`, minus the
//! publish. Republishing a remote message would loop between instances.

use std::sync::Arc;

use futures_util::future::join_all;

use crate::broker::Broker;
use crate::db::models::{ChatMessage, Notification};
use crate::db::Store;
use crate::ws::protocol::OutboundEnvelope;
use crate::ws::registry::ConnectionRegistry;

/// Where a message entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Accepted and persisted by this instance.
    Local,
    /// Received from another instance via the broker.
    Remote,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Remote => write!(f, "remote"),
        }
    }
}

/// What one fan-out pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Participants resolved for the group
    pub recipients: usize,
    /// Notifications written to the store
    pub persisted: usize,
    /// Frames written to local sessions
    pub delivered: usize,
    /// Whether the message went out on the broker
    pub published: bool,
}

#[derive(Clone)]
pub struct FanoutEngine {
    store: Arc<dyn Store>,
    registry: ConnectionRegistry,
    broker: Arc<dyn Broker>,
    message_stream: String,
}

impl FanoutEngine {
    pub fn new(
        store: Arc<dyn Store>,
        registry: ConnectionRegistry,
        broker: Arc<dyn Broker>,
        message_stream: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            broker,
            message_stream: message_stream.into(),
        }
    }

    /// Fan a persisted message out to its group.
    ///
    /// Infallible by signature: failures are isolated per recipient and
    /// logged, since the sender's response has already been decided.
    pub async fn dispatch(&self, message: &ChatMessage, origin: Origin) -> FanoutReport {
        let mut report = FanoutReport::default();

        let participants = match self.store.participant_ids(&message.group_id).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(
                    group_id = %message.group_id,
                    %origin,
                    error = %e,
                    "Failed to resolve participants, fan-out aborted"
                );
                return report;
            }
        };

        if participants.is_empty() {
            tracing::info!(
                group_id = %message.group_id,
                %origin,
                "Group has no participants, nothing to fan out"
            );
            return report;
        }
        report.recipients = participants.len();

        let notifications: Vec<Notification> = participants
            .iter()
            .map(|id| Notification::for_message(message, *id))
            .collect();

        // Each recipient's write stands alone.
        let writes = join_all(
            notifications
                .iter()
                .map(|n| self.store.append_notification(n)),
        )
        .await;
        for (notification, result) in notifications.iter().zip(writes) {
            match result {
                Ok(()) => report.persisted += 1,
                Err(e) => tracing::warn!(
                    group_id = %message.group_id,
                    recipient_id = notification.recipient_id,
                    error = %e,
                    "Failed to persist notification"
                ),
            }
        }

        // Publishing does not wait on local delivery.
        let deliver = join_all(notifications.into_iter().map(|n| {
            let recipient = n.recipient_id;
            let envelope = OutboundEnvelope::notification(n);
            async move { (recipient, self.registry.send_to(recipient, &envelope).await) }
        }));
        let publish = async {
            match origin {
                Origin::Local => self.publish(message).await,
                Origin::Remote => false,
            }
        };
        let (sends, published) = tokio::join!(deliver, publish);

        for (recipient, result) in sends {
            match result {
                Ok(delivery) => report.delivered += delivery.delivered,
                Err(e) => tracing::warn!(
                    recipient_id = recipient,
                    error = %e,
                    "Failed to push notification"
                ),
            }
        }
        report.published = published;

        tracing::debug!(
            group_id = %message.group_id,
            %origin,
            recipients = report.recipients,
            persisted = report.persisted,
            delivered = report.delivered,
            published = report.published,
            "Fan-out complete"
        );
        report
    }

    async fn publish(&self, message: &ChatMessage) -> bool {
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode message for broker");
                return false;
            }
        };

        match self.broker.publish(&self.message_stream, payload).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    group_id = %message.group_id,
                    stream = %self.message_stream,
                    error = %e,
                    "Failed to publish message to broker"
                );
                false
            }
        }
    }
}
