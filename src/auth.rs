//! Bearer credential verification and session token issuance.
//!
//! Session tokens are HS256 JWTs signed with the shared secret. Tokens
//! carrying any other algorithm are rejected before the signature is
//! looked at.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

const BEARER_PREFIX: &str = "Bearer ";

/// Session token lifetime (72 hours).
pub const SESSION_LIFETIME_SECS: i64 = 72 * 3600;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("token has no subject")]
    MissingSubject,
}

/// Session token claims. A token must carry a non-empty `sub` and an
/// unexpired `exp`; `iat` is informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
}

/// What an `Authorization` header amounted to.
///
/// `Absent` and `Invalid` are kept apart on purpose: callers may fall back
/// to an anonymous identity for the former but must reject the latter.
#[derive(Debug)]
pub enum Credential {
    Absent,
    Verified(String),
    Invalid(AuthError),
}

pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Classify a raw `Authorization` header value.
    pub fn resolve(&self, header: Option<&str>) -> Credential {
        let Some(token) = header.and_then(|h| h.strip_prefix(BEARER_PREFIX)) else {
            return Credential::Absent;
        };

        match self.verify(token) {
            Ok(subject) => Credential::Verified(subject),
            Err(e) => {
                debug!(error = %e, "bearer token rejected");
                Credential::Invalid(e)
            }
        }
    }

    /// Verify a token and return its subject.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;

        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding_key, &validation)?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(data.claims.sub)
    }

    /// Issue a session token for `user_id`, valid for 72 hours from `now`.
    pub fn issue(&self, user_id: &str, now: i64) -> Result<String, AuthError> {
        let claims = SessionClaims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + SESSION_LIFETIME_SECS,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(token)
    }
}
