use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::clock::Clock;
use crate::error::{ServiceError, ServiceResult};

/// How long a session token stays valid after issuance.
pub const CREDENTIAL_LIFETIME: Duration = Duration::days(7);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "userId")]
    pub user_id: i64,
    /// Unix seconds.
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and checks HS256 session tokens.
#[derive(Clone)]
pub struct CredentialIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl CredentialIssuer {
    pub fn new(secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        assert!(secret.len() >= 16, "Token secret too short");
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            clock,
        }
    }

    pub fn issue(&self, user_id: i64) -> ServiceResult<AccessToken> {
        let expires_at = self.clock.now() + CREDENTIAL_LIFETIME;
        let claims = SessionClaims {
            user_id,
            exp: expires_at.timestamp(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| {
                error!("Failed to sign session token for user {user_id}: {err}");
                ServiceError::InternalError
            })?;
        Ok(AccessToken { token, expires_at })
    }

    /// Returns the user id bound to `token`.
    pub fn verify(&self, token: &str) -> ServiceResult<i64> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|err| {
                warn!("Rejected session token: {err}");
                ServiceError::InvalidCredential
            })?;
        if data.claims.exp <= self.clock.now().timestamp() {
            warn!("Rejected expired session token for user {}", data.claims.user_id);
            return Err(ServiceError::InvalidCredential);
        }
        Ok(data.claims.user_id)
    }
}
