use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Identity, TokenValidator};
use crate::error::GatewayError;

/// Access token lifetime for tokens issued by `issue_access_token`.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 900;

/// JWT claims carried by a gateway access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id as a decimal string
    pub sub: String,
    /// Display name
    pub name: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> std::io::Result<Vec<u8>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    std::fs::create_dir_all(data_dir)?;
    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue an HS256 access token for `identity`.
pub fn issue_access_token(
    secret: &[u8],
    identity: &Identity,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: identity.id.to_string(),
        name: identity.name.clone(),
        iat: now,
        exp: now + ttl_secs,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Validate an access token and return its claims.
pub fn validate_access_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

/// Validates tokens signed with the gateway's own secret.
pub struct JwtValidator {
    secret: Vec<u8>,
}

impl JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl TokenValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<Identity, GatewayError> {
        let claims = validate_access_token(&self.secret, token).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                GatewayError::Auth("token expired".to_string())
            }
            _ => GatewayError::Auth("token invalid".to_string()),
        })?;

        let id = claims
            .sub
            .parse()
            .map_err(|_| GatewayError::Auth("token subject is not an account id".to_string()))?;

        Ok(Identity {
            id,
            name: claims.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issued_token_validates() {
        let secret = b"0123456789abcdef0123456789abcdef".to_vec();
        let alice = Identity {
            id: 42,
            name: "alice".to_string(),
        };
        let token = issue_access_token(&secret, &alice, ACCESS_TOKEN_TTL_SECS).unwrap();

        let validator = JwtValidator::new(secret);
        assert_eq!(validator.validate(&token).await.unwrap(), alice);
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let alice = Identity {
            id: 42,
            name: "alice".to_string(),
        };
        let token = issue_access_token(b"secret-one", &alice, ACCESS_TOKEN_TTL_SECS).unwrap();

        let validator = JwtValidator::new(b"secret-two".to_vec());
        assert!(matches!(
            validator.validate(&token).await,
            Err(GatewayError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let secret = b"0123456789abcdef0123456789abcdef".to_vec();
        let alice = Identity {
            id: 42,
            name: "alice".to_string(),
        };
        // Well past the default 60s leeway
        let token = issue_access_token(&secret, &alice, -3600).unwrap();

        let validator = JwtValidator::new(secret);
        match validator.validate(&token).await {
            Err(GatewayError::Auth(reason)) => assert_eq!(reason, "token expired"),
            other => panic!("expected expired token error, got {:?}", other),
        }
    }
}
