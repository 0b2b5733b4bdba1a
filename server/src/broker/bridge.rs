use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::Broker;
use crate::chat::fanout::{FanoutEngine, Origin};
use crate::db::models::ChatMessage;
use crate::error::{BrokerError, GatewayError};

/// Feeds messages published by other instances into the local fan-out.
pub struct BrokerBridge {
    broker: Arc<dyn Broker>,
    fanout: FanoutEngine,
    message_stream: String,
    notification_stream: String,
}

impl BrokerBridge {
    pub fn new(
        broker: Arc<dyn Broker>,
        fanout: FanoutEngine,
        message_stream: impl Into<String>,
        notification_stream: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            fanout,
            message_stream: message_stream.into(),
            notification_stream: notification_stream.into(),
        }
    }

    /// Consume until `shutdown` fires or both subscriptions end.
    /// Deliveries already being fanned out are awaited before returning.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BrokerError> {
        let mut messages = self.broker.subscribe(&self.message_stream).await?;
        let mut notifications = self.broker.subscribe(&self.notification_stream).await?;
        let mut messages_open = true;
        let mut notifications_open = true;
        let mut in_flight = JoinSet::new();

        tracing::info!(
            message_stream = %self.message_stream,
            notification_stream = %self.notification_stream,
            "Broker bridge started"
        );

        while messages_open || notifications_open {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    tracing::info!("Broker bridge stopping");
                    break;
                }

                delivery = messages.next(), if messages_open => match delivery {
                    Some(payload) => self.accept(&mut in_flight, &payload),
                    None => {
                        tracing::warn!(stream = %self.message_stream, "Message subscription ended");
                        messages_open = false;
                    }
                },

                // Reserved stream; nothing consumes it yet.
                delivery = notifications.next(), if notifications_open => match delivery {
                    Some(payload) => tracing::debug!(
                        stream = %self.notification_stream,
                        bytes = payload.len(),
                        "Ignoring notification stream delivery"
                    ),
                    None => notifications_open = false,
                },

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                }
            }
        }

        let pending = in_flight.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for in-flight remote fan-outs");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }

        tracing::info!("Broker bridge stopped");
        Ok(())
    }

    fn accept(&self, in_flight: &mut JoinSet<()>, payload: &[u8]) {
        let message = match decode_message(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    stream = %self.message_stream,
                    bytes = payload.len(),
                    error = %e,
                    "Dropping undecodable broker payload"
                );
                return;
            }
        };

        let fanout = self.fanout.clone();
        in_flight.spawn(async move {
            fanout.dispatch(&message, Origin::Remote).await;
        });
    }
}

/// Decode a broker payload into the message shape used locally.
pub fn decode_message(payload: &[u8]) -> Result<ChatMessage, GatewayError> {
    serde_json::from_slice(payload).map_err(GatewayError::Decode)
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Remote fan-out task failed");
    }
}
