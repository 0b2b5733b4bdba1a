use futures_util::StreamExt;
use libp2p::{gossipsub, identify, identity, noise, tcp, yamux, Multiaddr, Swarm, SwarmBuilder};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::behaviour::{build_behaviour, GatewayBehaviour, GatewayBehaviourEvent};
use super::config::P2pConfig;
use crate::error::BrokerError;

/// Commands sent from broker handles to the Swarm event loop.
pub enum SwarmCommand {
    /// Subscribe to a topic; the reply carries the delivery channel.
    Subscribe {
        topic: String,
        reply: oneshot::Sender<Result<mpsc::UnboundedReceiver<Vec<u8>>, BrokerError>>,
    },
    /// Publish data to a topic.
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), BrokerError>>,
    },
}

/// Local consumers of each subscribed topic.
type Subscribers = HashMap<gossipsub::TopicHash, Vec<mpsc::UnboundedSender<Vec<u8>>>>;

/// Build the libp2p Swarm over TCP with noise and yamux.
pub fn build_swarm(
    keypair: identity::Keypair,
    config: &P2pConfig,
) -> Result<Swarm<GatewayBehaviour>, BrokerError> {
    let config = config.clone();

    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| BrokerError::Transport(e.to_string()))?
        .with_behaviour(|key| build_behaviour(key, &config))
        .map_err(|e| BrokerError::Transport(e.to_string()))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    Ok(swarm)
}

/// Run the Swarm event loop until `shutdown` fires or every handle is gone.
pub async fn run_swarm_loop(
    mut swarm: Swarm<GatewayBehaviour>,
    mut cmd_rx: mpsc::UnboundedReceiver<SwarmCommand>,
    shutdown: CancellationToken,
) {
    let mut subscribers = Subscribers::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Swarm loop stopping");
                break;
            }
            event = swarm.select_next_some() => {
                handle_swarm_event(event, &mut subscribers);
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => handle_swarm_command(&mut swarm, &mut subscribers, cmd),
                    None => {
                        tracing::info!("Swarm command channel closed, shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Start listening and dial configured peers.
pub fn start_networking(
    swarm: &mut Swarm<GatewayBehaviour>,
    config: &P2pConfig,
) -> Result<(), BrokerError> {
    let listen_addr = format!("/ip4/0.0.0.0/tcp/{}", config.listen_port)
        .parse::<Multiaddr>()
        .map_err(|e| BrokerError::Transport(e.to_string()))?;
    swarm
        .listen_on(listen_addr.clone())
        .map_err(|e| BrokerError::Transport(format!("failed to listen on {}: {}", listen_addr, e)))?;

    for peer in &config.bootstrap_peers {
        match peer.parse::<Multiaddr>() {
            Ok(addr) => match swarm.dial(addr.clone()) {
                Ok(()) => tracing::info!("Dialing bootstrap peer {}", addr),
                Err(e) => tracing::warn!("Failed to dial bootstrap peer {}: {}", addr, e),
            },
            Err(e) => tracing::warn!("Ignoring invalid bootstrap peer {:?}: {}", peer, e),
        }
    }
    Ok(())
}

fn handle_swarm_event(
    event: libp2p::swarm::SwarmEvent<GatewayBehaviourEvent>,
    subscribers: &mut Subscribers,
) {
    use libp2p::swarm::SwarmEvent as LibSwarmEvent;

    match event {
        LibSwarmEvent::Behaviour(GatewayBehaviourEvent::Gossipsub(gossipsub::Event::Message {
            propagation_source,
            message,
            ..
        })) => {
            tracing::debug!(
                "Gossipsub message from {} on topic {}, {} bytes",
                propagation_source,
                message.topic,
                message.data.len()
            );
            if let Some(local) = subscribers.get_mut(&message.topic) {
                local.retain(|tx| tx.send(message.data.clone()).is_ok());
            }
        }
        LibSwarmEvent::Behaviour(GatewayBehaviourEvent::Gossipsub(
            gossipsub::Event::Subscribed { peer_id, topic },
        )) => {
            tracing::debug!("Peer {} subscribed to {}", peer_id, topic);
        }
        LibSwarmEvent::Behaviour(GatewayBehaviourEvent::Identify(identify::Event::Received {
            peer_id,
            info,
            ..
        })) => {
            tracing::debug!(
                "Identify: {} runs {} with {} listen addrs",
                peer_id,
                info.protocol_version,
                info.listen_addrs.len()
            );
        }
        LibSwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
            tracing::info!("P2P peer connected: {} via {:?}", peer_id, endpoint);
        }
        LibSwarmEvent::ConnectionClosed { peer_id, .. } => {
            tracing::info!("P2P peer disconnected: {}", peer_id);
        }
        LibSwarmEvent::NewListenAddr { address, .. } => {
            tracing::info!("libp2p listening on: {}", address);
        }
        _ => {}
    }
}

fn handle_swarm_command(
    swarm: &mut Swarm<GatewayBehaviour>,
    subscribers: &mut Subscribers,
    cmd: SwarmCommand,
) {
    match cmd {
        SwarmCommand::Subscribe { topic, reply } => {
            let gossip_topic = gossipsub::IdentTopic::new(&topic);
            let result = match swarm.behaviour_mut().gossipsub.subscribe(&gossip_topic) {
                Ok(_) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    subscribers.entry(gossip_topic.hash()).or_default().push(tx);
                    tracing::info!("Subscribed to gossipsub topic: {}", topic);
                    Ok(rx)
                }
                Err(e) => Err(BrokerError::Subscribe {
                    stream: topic,
                    reason: format!("{:?}", e),
                }),
            };
            let _ = reply.send(result);
        }
        SwarmCommand::Publish { topic, data, reply } => {
            let gossip_topic = gossipsub::IdentTopic::new(&topic);
            let hash = gossip_topic.hash();
            let has_peers = swarm
                .behaviour()
                .gossipsub
                .all_peers()
                .any(|(_, topics)| topics.contains(&&hash));

            // Nobody else is listening; not an error for a lone instance.
            let result = if !has_peers {
                tracing::debug!("No peers on {}, publish skipped", topic);
                Ok(())
            } else {
                match swarm.behaviour_mut().gossipsub.publish(gossip_topic, data) {
                    Ok(msg_id) => {
                        tracing::debug!("Published to {}, message_id: {}", topic, msg_id);
                        Ok(())
                    }
                    Err(e) => Err(BrokerError::Publish {
                        stream: topic,
                        reason: e.to_string(),
                    }),
                }
            };
            let _ = reply.send(result);
        }
    }
}
