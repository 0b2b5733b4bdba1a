pub mod jwt;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::models::AccountId;
use crate::error::GatewayError;

/// Authenticated account behind a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: AccountId,
    pub name: String,
}

/// Resolves a bearer credential to an identity.
///
/// Any failure, including the validator being unreachable, must come back
/// as `GatewayError::Auth`.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Identity, GatewayError>;
}
