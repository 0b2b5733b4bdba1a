use serde::{Deserialize, Serialize};

/// Gossipsub mesh configuration for cross-instance delivery.
/// Exposed in `gateway.toml` under the `[broker.gossip]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    /// TCP port for inter-gateway traffic (default 1985)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Multiaddrs of other gateway instances to dial at start-up,
    /// e.g. "/ip4/10.0.0.2/tcp/1985".
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Target number of mesh peers per topic
    #[serde(default = "default_gossipsub_mesh_n")]
    pub gossipsub_mesh_n: usize,

    /// Graft more peers below this
    #[serde(default = "default_gossipsub_mesh_n_low")]
    pub gossipsub_mesh_n_low: usize,

    /// Prune peers above this
    #[serde(default = "default_gossipsub_mesh_n_high")]
    pub gossipsub_mesh_n_high: usize,

    /// Largest message payload accepted on the mesh, in bytes.
    /// Chat messages are published whole, so this caps message size
    /// across instances.
    #[serde(default = "default_gossipsub_max_transmit_size")]
    pub gossipsub_max_transmit_size: usize,

    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            bootstrap_peers: Vec::new(),
            gossipsub_mesh_n: default_gossipsub_mesh_n(),
            gossipsub_mesh_n_low: default_gossipsub_mesh_n_low(),
            gossipsub_mesh_n_high: default_gossipsub_mesh_n_high(),
            gossipsub_max_transmit_size: default_gossipsub_max_transmit_size(),
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

fn default_listen_port() -> u16 {
    1985
}
fn default_gossipsub_mesh_n() -> usize {
    4
}
fn default_gossipsub_mesh_n_low() -> usize {
    3
}
fn default_gossipsub_mesh_n_high() -> usize {
    8
}
fn default_gossipsub_max_transmit_size() -> usize {
    65536
}
fn default_heartbeat_ms() -> u64 {
    1000
}
