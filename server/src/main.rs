use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use huddle_gateway::auth::jwt::{load_or_generate_jwt_secret, JwtValidator};
use huddle_gateway::auth::remote::RemoteValidator;
use huddle_gateway::auth::TokenValidator;
use huddle_gateway::broker::{Broker, BrokerBridge, MemoryHub};
use huddle_gateway::config::{generate_config_template, AuthMode, BrokerMode, Config};
use huddle_gateway::db::{self, SqliteStore, Store};
use huddle_gateway::p2p::GossipBroker;
use huddle_gateway::{observability, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    init_tracing(config.json_logs);

    tracing::info!("huddle-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db));

    let validator: Arc<dyn TokenValidator> = match config.auth.mode {
        AuthMode::Jwt => {
            let secret = load_or_generate_jwt_secret(&config.data_dir)?;
            Arc::new(JwtValidator::new(secret))
        }
        AuthMode::Remote => {
            let url = config
                .auth
                .validate_url
                .clone()
                .ok_or("auth.validate_url is required when auth.mode = \"remote\"")?;
            tracing::info!("Validating tokens against {}", url);
            Arc::new(RemoteValidator::new(
                url,
                Duration::from_secs(config.auth.timeout_secs),
            )?)
        }
    };

    let shutdown = CancellationToken::new();

    let broker: Arc<dyn Broker> = match config.broker.mode {
        BrokerMode::Memory => {
            tracing::info!("Using in-process broker (single instance)");
            Arc::new(MemoryHub::new(config.broker.memory_capacity).connect())
        }
        BrokerMode::Gossip => Arc::new(GossipBroker::start(
            &config.broker.gossip,
            &config.data_dir,
            shutdown.clone(),
        )?),
    };

    let app_state = state::AppState::new(
        store,
        validator,
        broker.clone(),
        &config.broker.message_stream,
        config.session.clone(),
    )
    .with_metrics(observability::install_recorder()?);

    if config.session.ordered_dispatch {
        tracing::info!("Ordered dispatch enabled: frames are handled one at a time per connection");
    }

    let bridge = BrokerBridge::new(
        broker,
        app_state.fanout.clone(),
        config.broker.message_stream.clone(),
        config.broker.notification_stream.clone(),
    );
    let bridge_handle = tokio::spawn(bridge.run(shutdown.clone()));

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // Let remote fan-outs already in progress finish.
    shutdown.cancel();
    match bridge_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Broker bridge failed: {}", e),
        Err(e) => tracing::error!("Broker bridge task panicked: {}", e),
    }

    tracing::info!("huddle-gateway stopped");
    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("huddle_gateway=info"))
    };

    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter()).init();
    }
}
