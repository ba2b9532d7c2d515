//! Sign in with Apple: authorization code exchange.
//!
//! Apple authenticates the client with a short-lived ES256 JWT (the
//! "client secret") signed by the developer's private key.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const TOKEN_URL: &str = "https://appleid.apple.com/auth/token";
const AUDIENCE: &str = "https://appleid.apple.com";
const CLIENT_SECRET_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum AppleError {
    #[error("failed to generate client secret: {0}")]
    ClientSecret(#[from] jsonwebtoken::errors::Error),
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone)]
pub struct AppleConfig {
    pub client_id: String,
    pub team_id: String,
    pub key_id: String,
    /// PKCS#8 PEM of the EC P-256 key.
    pub private_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSecretClaims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
    pub sub: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppleTokens {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub id_token: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<AppleTokens, AppleError>;
}

pub struct AppleSignIn {
    client: reqwest::Client,
    config: AppleConfig,
    token_url: String,
}

impl AppleSignIn {
    pub fn new(client: reqwest::Client, config: AppleConfig) -> Self {
        Self {
            client,
            config,
            token_url: TOKEN_URL.to_string(),
        }
    }

    /// Sign a client secret valid for one hour from `now`.
    pub fn client_secret(&self, now: i64) -> Result<String, AppleError> {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.config.key_id.clone());

        let claims = ClientSecretClaims {
            iss: self.config.team_id.clone(),
            iat: now,
            exp: now + CLIENT_SECRET_LIFETIME_SECS,
            aud: AUDIENCE.to_string(),
            sub: self.config.client_id.clone(),
        };

        let key = EncodingKey::from_ec_pem(self.config.private_key.as_bytes())?;
        Ok(jsonwebtoken::encode(&header, &claims, &key)?)
    }
}

#[async_trait]
impl IdentityProvider for AppleSignIn {
    async fn exchange_code(&self, code: &str) -> Result<AppleTokens, AppleError> {
        let client_secret = self.client_secret(chrono::Utc::now().timestamp())?;

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let tokens: AppleTokens = response.json().await?;
        debug!(has_id_token = !tokens.id_token.is_empty(), "apple code exchanged");
        Ok(tokens)
    }
}
