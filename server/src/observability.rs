//! Prometheus counters for connections and frames.
//!
//! The recorder is process-global. `install_recorder` can be called more
//! than once (every test server does); later calls get the first handle.

use std::sync::{Mutex, PoisonError};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Inbound frames, labelled by `type` (the envelope tag, or `rejected`).
pub const MESSAGES_RECEIVED: &str = "messages_received_total";
/// Outbound frames written to a session, labelled by `type`.
pub const MESSAGES_SENT: &str = "messages_sent_total";
/// Responses written to a session, labelled by `status`.
pub const RESPONSES: &str = "responses_total";
/// Upgrades that passed token validation.
pub const CONNECTIONS: &str = "successful_websocket_connections_total";

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Install the Prometheus recorder, or return the one already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let mut slot = HANDLE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *slot = Some(handle.clone());
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_installs_once() {
        let first = install_recorder().unwrap();
        let second = install_recorder().unwrap();

        metrics::counter!(CONNECTIONS).increment(1);
        assert!(first.render().contains(CONNECTIONS));
        assert!(second.render().contains(CONNECTIONS));
    }
}
