use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::p2p::config::P2pConfig;

/// Command-line flags. Only flags that were actually given are layered
/// over the config file, so an omitted flag never masks a TOML value.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "huddle-gateway", version, about = "Real-time chat and notification gateway")]
pub struct Cli {
    /// Path to TOML config file
    #[arg(long, env = "GATEWAY_CONFIG", default_value = "./gateway.toml")]
    #[serde(skip)]
    pub config: String,

    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Data directory for persistent state (DB, keys)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Enable structured JSON logging
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,
}

/// Gateway configuration after all layers are merged.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub json_logs: bool,

    /// Set from the CLI only
    #[serde(skip)]
    pub generate_config: bool,

    /// Per-connection behaviour (loaded from [session] section in TOML)
    #[serde(default)]
    pub session: SessionConfig,

    /// Token validation (loaded from [auth] section in TOML)
    #[serde(default)]
    pub auth: AuthConfig,

    /// Cross-instance broker (loaded from [broker] section in TOML)
    #[serde(default)]
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Process a connection's frames one at a time, in arrival order.
    /// When false each frame runs as its own task and responses may
    /// complete out of order.
    #[serde(default)]
    pub ordered_dispatch: bool,

    /// Seconds between server pings; 0 disables keepalive.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing the connection.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Seconds a single write to a client may take before the session is
    /// closed. Bounds how long a stalled client can hold up fan-out.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ordered_dispatch: false,
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// HS256 tokens signed with the secret in `{data_dir}/jwt_secret`
    Jwt,
    /// POST the token to `validate_url`
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_mode")]
    pub mode: AuthMode,

    #[serde(default)]
    pub validate_url: Option<String>,

    #[serde(default = "default_auth_timeout")]
    pub timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
            validate_url: None,
            timeout_secs: default_auth_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    /// In-process hub; a single instance only
    Memory,
    /// libp2p gossipsub mesh between instances
    Gossip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_mode")]
    pub mode: BrokerMode,

    #[serde(default = "default_message_stream")]
    pub message_stream: String,

    #[serde(default = "default_notification_stream")]
    pub notification_stream: String,

    /// Per-stream buffer of the memory broker
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    #[serde(default)]
    pub gossip: P2pConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: default_broker_mode(),
            message_stream: default_message_stream(),
            notification_stream: default_notification_stream(),
            memory_capacity: default_memory_capacity(),
            gossip: P2pConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    8080
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_ping_interval() -> u64 {
    30
}
fn default_pong_timeout() -> u64 {
    10
}
fn default_write_timeout() -> u64 {
    10
}
fn default_auth_mode() -> AuthMode {
    AuthMode::Jwt
}
fn default_auth_timeout() -> u64 {
    5
}
fn default_broker_mode() -> BrokerMode {
    BrokerMode::Memory
}
fn default_message_stream() -> String {
    "chat.messages".to_string()
}
fn default_notification_stream() -> String {
    "chat.notifications".to_string()
}
fn default_memory_capacity() -> usize {
    crate::broker::memory::DEFAULT_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            data_dir: default_data_dir(),
            json_logs: false,
            generate_config: false,
            session: SessionConfig::default(),
            auth: AuthConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (GATEWAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, figment::Error> {
        let generate_config = cli.generate_config;
        let mut config: Config = Self::figment(&cli).extract()?;
        config.generate_config = generate_config;
        Ok(config)
    }

    /// Nested keys use a double underscore in env vars,
    /// e.g. GATEWAY_BROKER__MODE=gossip.
    pub fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("GATEWAY_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# huddle-gateway configuration
# Place this file at ./gateway.toml or specify with --config <path>
# All settings can be overridden via environment variables (GATEWAY_PORT,
# GATEWAY_BROKER__MODE, etc.) or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for production
# json_logs = false

# Data directory for the SQLite database and key material
# data_dir = "./data"

# ---- Sessions ----
# [session]
# Process each connection's frames strictly in arrival order.
# When false, frames are handled concurrently and responses may be reordered.
# ordered_dispatch = false
# ping_interval_secs = 30   # 0 disables keepalive
# pong_timeout_secs = 10
# write_timeout_secs = 10   # a client slower than this is disconnected

# ---- Authentication ----
# [auth]
# "jwt": HS256 tokens signed with data_dir/jwt_secret
# "remote": POST {"token": ...} to validate_url, expects {"id": ..., "name": ...}
# mode = "jwt"
# validate_url = "http://accounts.internal/validate"
# timeout_secs = 5

# ---- Broker ----
# [broker]
# "memory": single instance, in-process
# "gossip": libp2p gossipsub mesh between gateway instances
# mode = "memory"
# message_stream = "chat.messages"
# notification_stream = "chat.notifications"
# memory_capacity = 1024

# [broker.gossip]
# listen_port = 1985
# bootstrap_peers = ["/ip4/10.0.0.2/tcp/1985"]
# gossipsub_mesh_n = 4
# gossipsub_mesh_n_low = 3
# gossipsub_mesh_n_high = 8
# gossipsub_max_transmit_size = 65536
# heartbeat_ms = 1000
"#
    .to_string()
}
