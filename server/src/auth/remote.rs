use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Identity, TokenValidator};
use crate::db::models::AccountId;
use crate::error::GatewayError;

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    id: AccountId,
    #[serde(default)]
    name: String,
}

/// Delegates token checks to an external account service over HTTP.
///
/// Fails closed: a non-2xx status, an unreachable service, a malformed body
/// or a non-positive account id all count as an invalid token.
pub struct RemoteValidator {
    client: reqwest::Client,
    url: String,
}

impl RemoteValidator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Auth(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TokenValidator for RemoteValidator {
    async fn validate(&self, token: &str) -> Result<Identity, GatewayError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&ValidateRequest { token })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, url = %self.url, "Token validation service unreachable");
                GatewayError::Auth("token validation unavailable".to_string())
            })?;

        if !resp.status().is_success() {
            tracing::debug!(status = %resp.status(), "Token rejected by validation service");
            return Err(GatewayError::Auth("token invalid".to_string()));
        }

        let body: ValidateResponse = resp.json().await.map_err(|e| {
            tracing::warn!(error = %e, "Malformed token validation response");
            GatewayError::Auth("token invalid".to_string())
        })?;

        if body.id <= 0 {
            return Err(GatewayError::Auth("token invalid".to_string()));
        }

        Ok(Identity {
            id: body.id,
            name: body.name,
        })
    }
}
