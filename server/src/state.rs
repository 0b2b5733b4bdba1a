use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::auth::TokenValidator;
use crate::broker::Broker;
use crate::chat::{FanoutEngine, MessageRouter};
use crate::config::SessionConfig;
use crate::db::Store;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Live sessions per account
    pub registry: ConnectionRegistry,
    /// Resolves `?token=` to an identity before upgrade
    pub validator: Arc<dyn TokenValidator>,
    /// Applies inbound frames
    pub router: MessageRouter,
    /// Shared with the broker bridge for remote-origin fan-out
    pub fanout: FanoutEngine,
    pub session: SessionConfig,
    /// Renders `/metrics`; the route answers 404 without it
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire the core components around the given collaborators.
    pub fn new(
        store: Arc<dyn Store>,
        validator: Arc<dyn TokenValidator>,
        broker: Arc<dyn Broker>,
        message_stream: &str,
        session: SessionConfig,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let fanout = FanoutEngine::new(store.clone(), registry.clone(), broker, message_stream);
        let router = MessageRouter::new(store, fanout.clone());
        Self {
            registry,
            validator,
            router,
            fanout,
            session,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
