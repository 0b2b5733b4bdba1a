use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures_util::future::join_all;
use tokio::sync::RwLock;

use crate::db::models::AccountId;
use crate::error::GatewayError;
use crate::observability::MESSAGES_SENT;
use crate::ws::protocol::OutboundEnvelope;
use crate::ws::session::Session;

/// Outcome of pushing one envelope to a set of sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for Delivery {
    fn add_assign(&mut self, rhs: Self) {
        self.delivered += rhs.delivered;
        self.failed += rhs.failed;
    }
}

/// Tracks all live sessions per account.
/// An account can hold several sessions at once (multiple devices/tabs).
///
/// One lock covers the whole map so that removing the last session of an
/// account and dropping its entry happen as a single step.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<AccountId, Vec<Arc<Session>>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: Arc<Session>) {
        let account_id = session.identity().id;
        let mut map = self.inner.write().await;
        let sessions = map.entry(account_id).or_default();
        sessions.push(session);

        tracing::debug!(
            account_id,
            connections = sessions.len(),
            "Connection registered"
        );
    }

    /// Remove a session. Returns false if it was not registered.
    pub async fn unregister(&self, session: &Session) -> bool {
        let account_id = session.identity().id;
        let mut map = self.inner.write().await;

        let Some(sessions) = map.get_mut(&account_id) else {
            return false;
        };
        let before = sessions.len();
        sessions.retain(|s| s.id() != session.id());
        let removed = sessions.len() != before;

        if sessions.is_empty() {
            map.remove(&account_id);
        }

        if removed {
            tracing::debug!(account_id, session_id = %session.id(), "Connection unregistered");
        }
        removed
    }

    /// Copy of the sessions currently registered for an account.
    pub async fn snapshot_for(&self, account_id: AccountId) -> Vec<Arc<Session>> {
        self.inner
            .read()
            .await
            .get(&account_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Send an envelope to every session of one account.
    /// An account with no sessions is a no-op.
    pub async fn send_to(
        &self,
        account_id: AccountId,
        envelope: &OutboundEnvelope,
    ) -> Result<Delivery, GatewayError> {
        let frame = encode(envelope)?;
        let delivery = self.send_frame_to(account_id, frame).await;
        record_sent(envelope, delivery);
        Ok(delivery)
    }

    pub async fn send_to_many(
        &self,
        account_ids: &[AccountId],
        envelope: &OutboundEnvelope,
    ) -> Result<Delivery, GatewayError> {
        let frame = encode(envelope)?;
        let results = join_all(
            account_ids
                .iter()
                .map(|id| self.send_frame_to(*id, frame.clone())),
        )
        .await;

        let mut total = Delivery::default();
        for delivery in results {
            total += delivery;
        }
        record_sent(envelope, total);
        Ok(total)
    }

    pub async fn send_to_all(&self, envelope: &OutboundEnvelope) -> Result<Delivery, GatewayError> {
        let account_ids: Vec<AccountId> = self.inner.read().await.keys().copied().collect();
        self.send_to_many(&account_ids, envelope).await
    }

    /// Number of accounts with at least one session.
    pub async fn identity_count(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.values().map(Vec::len).sum()
    }

    async fn send_frame_to(&self, account_id: AccountId, frame: Message) -> Delivery {
        // Lock is released before any write starts.
        let sessions = self.snapshot_for(account_id).await;
        if sessions.is_empty() {
            return Delivery::default();
        }

        let results = join_all(sessions.iter().map(|s| s.write_frame(frame.clone()))).await;

        let mut delivery = Delivery::default();
        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    delivery.failed += 1;
                    tracing::warn!(
                        account_id,
                        session_id = %session.id(),
                        error = %e,
                        "Failed to deliver frame"
                    );
                }
            }
        }
        delivery
    }
}

fn record_sent(envelope: &OutboundEnvelope, delivery: Delivery) {
    if delivery.delivered > 0 {
        metrics::counter!(MESSAGES_SENT, "type" => envelope.tag())
            .increment(delivery.delivered as u64);
    }
}

fn encode(envelope: &OutboundEnvelope) -> Result<Message, GatewayError> {
    let text = serde_json::to_string(envelope).map_err(GatewayError::Encode)?;
    Ok(Message::Text(text.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::ws::session::FrameSink;
    use futures_util::sink;
    use tokio::sync::mpsc;

    fn identity(id: AccountId) -> Identity {
        Identity {
            id,
            name: format!("user{}", id),
        }
    }

    /// Session whose writes land in a channel.
    fn channel_session(id: AccountId) -> (Arc<Session>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: FrameSink = Box::pin(sink::unfold(tx, |tx, msg: Message| async move {
            tx.send(msg).map_err(axum::Error::new)?;
            Ok::<_, axum::Error>(tx)
        }));
        (Session::new(identity(id), sink), rx)
    }

    /// Session whose every write fails.
    fn broken_session(id: AccountId) -> Arc<Session> {
        let sink: FrameSink = Box::pin(sink::unfold((), |_, _msg: Message| async move {
            Err::<(), _>(axum::Error::new(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "connection reset",
            )))
        }));
        Session::new(identity(id), sink)
    }

    #[tokio::test]
    async fn test_send_to_unknown_identity_is_noop() {
        let registry = ConnectionRegistry::new();
        let delivery = registry
            .send_to(7, &OutboundEnvelope::success())
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::default());
    }

    #[tokio::test]
    async fn test_unregister_drops_entry_and_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (session, _rx) = channel_session(1);

        registry.register(session.clone()).await;
        assert_eq!(registry.identity_count().await, 1);

        assert!(registry.unregister(&session).await);
        assert_eq!(registry.identity_count().await, 0);
        assert!(registry.snapshot_for(1).await.is_empty());

        assert!(!registry.unregister(&session).await);
        assert_eq!(registry.identity_count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_keeps_sibling_sessions() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = channel_session(1);
        let (second, _rx2) = channel_session(1);
        registry.register(first.clone()).await;
        registry.register(second.clone()).await;

        assert!(registry.unregister(&first).await);
        let remaining = registry.snapshot_for(1).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), second.id());
    }

    #[tokio::test]
    async fn test_both_sessions_of_identity_receive() {
        let registry = ConnectionRegistry::new();
        let (first, mut rx1) = channel_session(1);
        let (second, mut rx2) = channel_session(1);
        registry.register(first).await;
        registry.register(second).await;

        let delivery = registry
            .send_to(1, &OutboundEnvelope::success())
            .await
            .unwrap();
        assert_eq!(delivery.delivered, 2);

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await {
                Some(Message::Text(text)) => assert!(text.as_str().contains("\"success\"")),
                other => panic!("expected text frame, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_failed_write_does_not_block_others() {
        let registry = ConnectionRegistry::new();
        let broken = broken_session(1);
        let (healthy, mut rx) = channel_session(1);
        registry.register(broken.clone()).await;
        registry.register(healthy).await;

        let delivery = registry
            .send_to(1, &OutboundEnvelope::success())
            .await
            .unwrap();
        assert_eq!(delivery, Delivery { delivered: 1, failed: 1 });
        assert!(rx.recv().await.is_some());

        // Teardown is left to the session's own read loop.
        assert!(broken.is_closed());
        assert_eq!(registry.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_send_to_all_reaches_every_identity() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = channel_session(1);
        let (b, mut rx_b) = channel_session(2);
        registry.register(a).await;
        registry.register(b).await;

        let delivery = registry
            .send_to_all(&OutboundEnvelope::success())
            .await
            .unwrap();
        assert_eq!(delivery.delivered, 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }
}
