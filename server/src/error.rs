use thiserror::Error;

/// Which lookup came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NotFound {
    #[error("group not found")]
    Group,

    #[error("not a participant of this group")]
    NotAParticipant,
}

/// Failure surfaced by a `Store` implementation.
/// A failed call means nothing was committed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("unknown {kind} value in store: {value}")]
    InvalidValue { kind: &'static str, value: String },
}

/// Gateway-level error. Every variant that reaches a session is rendered
/// into a `Response{status: "error"}` envelope via its Display text.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    UnsupportedType(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("{0}")]
    NotFound(NotFound),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Failure talking to the cross-instance broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is closed")]
    Closed,

    #[error("publish to {stream} failed: {reason}")]
    Publish { stream: String, reason: String },

    #[error("subscribe to {stream} failed: {reason}")]
    Subscribe { stream: String, reason: String },

    #[error("broker transport setup failed: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_renders_reason() {
        let err = GatewayError::NotFound(NotFound::NotAParticipant);
        assert_eq!(err.to_string(), "not a participant of this group");
        assert_eq!(
            GatewayError::NotFound(NotFound::Group).to_string(),
            "group not found"
        );
    }
}
