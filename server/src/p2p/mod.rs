//! libp2p gossipsub mesh used as the cross-instance broker.
//!
//! Each gateway instance runs one node. Broker streams map 1:1 to gossipsub
//! topics; gossipsub never hands a node its own publications.

pub mod behaviour;
pub mod config;
pub mod identity;
pub mod swarm;

use async_trait::async_trait;
use futures_util::StreamExt;
use libp2p::PeerId;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Subscription};
use crate::error::BrokerError;

pub use config::P2pConfig;
pub use swarm::SwarmCommand;

/// Broker handle backed by the node's Swarm event loop.
#[derive(Clone)]
pub struct GossipBroker {
    cmd_tx: mpsc::UnboundedSender<SwarmCommand>,
    peer_id: PeerId,
}

impl GossipBroker {
    /// Build the node, start listening, dial bootstrap peers and spawn the
    /// event loop. The loop exits when `shutdown` fires.
    pub fn start(
        config: &P2pConfig,
        data_dir: &str,
        shutdown: CancellationToken,
    ) -> Result<Self, BrokerError> {
        let keypair = identity::node_keypair(data_dir)?;
        let peer_id = PeerId::from(keypair.public());

        let mut swarm = swarm::build_swarm(keypair, config)?;
        swarm::start_networking(&mut swarm, config)?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(swarm::run_swarm_loop(swarm, cmd_rx, shutdown));

        tracing::info!(%peer_id, port = config.listen_port, "Gossip broker started");
        Ok(Self { cmd_tx, peer_id })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

#[async_trait]
impl Broker for GossipBroker {
    async fn publish(&self, stream: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SwarmCommand::Publish {
                topic: stream.to_string(),
                data: payload,
                reply,
            })
            .map_err(|_| BrokerError::Closed)?;
        rx.await.map_err(|_| BrokerError::Closed)?
    }

    async fn subscribe(&self, stream: &str) -> Result<Subscription, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SwarmCommand::Subscribe {
                topic: stream.to_string(),
                reply,
            })
            .map_err(|_| BrokerError::Closed)?;
        let deliveries = rx.await.map_err(|_| BrokerError::Closed)??;

        Ok(futures_util::stream::unfold(deliveries, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        })
        .boxed())
    }
}
