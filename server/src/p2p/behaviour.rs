use libp2p::{gossipsub, identify, identity, ping, swarm::NetworkBehaviour};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::config::P2pConfig;

/// Protocol string advertised via identify.
const PROTOCOL_VERSION: &str = "/huddle-gateway/1.0.0";

/// Composed NetworkBehaviour for a gateway node:
/// gossipsub (pub/sub), identify (peer info exchange) and ping (liveness).
#[derive(NetworkBehaviour)]
pub struct GatewayBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

pub fn build_behaviour(
    keypair: &identity::Keypair,
    config: &P2pConfig,
) -> Result<GatewayBehaviour, Box<dyn std::error::Error + Send + Sync>> {
    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .mesh_n(config.gossipsub_mesh_n)
        .mesh_n_low(config.gossipsub_mesh_n_low)
        .mesh_n_high(config.gossipsub_mesh_n_high)
        .heartbeat_interval(Duration::from_millis(config.heartbeat_ms))
        .max_transmit_size(config.gossipsub_max_transmit_size)
        .validation_mode(gossipsub::ValidationMode::Strict)
        .flood_publish(true)
        .message_id_fn(|msg| {
            // Identical payloads share an id, so redelivery is dropped.
            let mut hasher = Sha256::new();
            hasher.update(&msg.data);
            gossipsub::MessageId::from(hasher.finalize().to_vec())
        })
        .build()?;

    let gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(keypair.clone()),
        gossipsub_config,
    )?;

    Ok(GatewayBehaviour {
        gossipsub,
        identify: identify::Behaviour::new(identify::Config::new(
            PROTOCOL_VERSION.to_string(),
            keypair.public(),
        )),
        ping: ping::Behaviour::default(),
    })
}
