//! In-process broker hub.
//!
//! Every `MemoryBroker` handed out by a hub behaves like a separate gateway
//! instance: it sees publications from all the others but never its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;

use super::{Broker, Subscription};
use crate::error::BrokerError;

/// Default per-stream channel capacity. Receivers that fall further behind
/// skip deliveries (RecvError::Lagged).
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Published {
    origin: u64,
    payload: Arc<[u8]>,
}

struct HubInner {
    capacity: usize,
    streams: Mutex<HashMap<String, broadcast::Sender<Published>>>,
    next_instance: AtomicU64,
}

/// Shared hub; clone freely.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                capacity: capacity.max(1),
                streams: Mutex::new(HashMap::new()),
                next_instance: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a new instance to the hub.
    pub fn connect(&self) -> MemoryBroker {
        MemoryBroker {
            hub: self.clone(),
            instance: self.inner.next_instance.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn sender(&self, stream: &str) -> broadcast::Sender<Published> {
        let mut streams = self
            .inner
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        streams
            .entry(stream.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One instance's handle on a `MemoryHub`.
#[derive(Clone)]
pub struct MemoryBroker {
    hub: MemoryHub,
    instance: u64,
}

impl MemoryBroker {
    pub fn instance_id(&self) -> u64 {
        self.instance
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, stream: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let published = Published {
            origin: self.instance,
            payload: payload.into(),
        };
        // Err only means nobody is subscribed right now.
        match self.hub.sender(stream).send(published) {
            Ok(receivers) => {
                tracing::debug!(stream, receivers, "Published to memory broker")
            }
            Err(_) => tracing::debug!(stream, "Published to memory broker with no subscribers"),
        }
        Ok(())
    }

    async fn subscribe(&self, stream: &str) -> Result<Subscription, BrokerError> {
        let rx = self.hub.sender(stream).subscribe();
        let me = self.instance;
        let name = stream.to_string();

        let deliveries = futures_util::stream::unfold((rx, name), move |(mut rx, name)| async move {
            loop {
                match rx.recv().await {
                    Ok(published) if published.origin == me => continue,
                    Ok(published) => return Some((published.payload.to_vec(), (rx, name))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(stream = %name, skipped, "Memory broker subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(deliveries.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_other_instances_receive() {
        let hub = MemoryHub::default();
        let a = hub.connect();
        let b = hub.connect();

        let mut sub = b.subscribe("chat.messages").await.unwrap();
        a.publish("chat.messages", b"hello".to_vec()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap();
        assert_eq!(got, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_own_publications_not_echoed() {
        let hub = MemoryHub::default();
        let a = hub.connect();
        let b = hub.connect();

        let mut own = a.subscribe("chat.messages").await.unwrap();
        a.publish("chat.messages", b"mine".to_vec()).await.unwrap();
        b.publish("chat.messages", b"theirs".to_vec()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), own.next())
            .await
            .unwrap();
        assert_eq!(got, Some(b"theirs".to_vec()));
    }

    #[tokio::test]
    async fn test_streams_are_separate() {
        let hub = MemoryHub::default();
        let a = hub.connect();
        let b = hub.connect();

        let mut notifications = b.subscribe("chat.notifications").await.unwrap();
        a.publish("chat.messages", b"msg".to_vec()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_millis(100), notifications.next()).await;
        assert!(got.is_err(), "no delivery expected on another stream");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let hub = MemoryHub::default();
        assert!(hub.connect().publish("nobody", vec![1]).await.is_ok());
    }
}
