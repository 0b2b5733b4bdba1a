//! Publish/subscribe plumbing between gateway instances.

pub mod bridge;
pub mod memory;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::BrokerError;

pub use bridge::BrokerBridge;
pub use memory::{MemoryBroker, MemoryHub};

/// Payloads delivered on one subscribed stream.
pub type Subscription = BoxStream<'static, Vec<u8>>;

/// Shared broker used to reach other gateway instances.
///
/// Delivery is at-least-once with no ordering across publishers. An
/// instance never receives its own publications back.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, stream: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    async fn subscribe(&self, stream: &str) -> Result<Subscription, BrokerError>;
}
