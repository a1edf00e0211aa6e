use super::audience::Audience;
use jwks_client_rs::{JwksClient, source::WebSource};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const KEY_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub aud: Audience,
    pub exp: u64,
    pub iat: u64,
    pub iss: String,
    pub sub: String,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token was not issued for {0}")]
    WrongAudience(String),
}

/// Checks bearer tokens against the identity provider's published keys.
#[derive(Clone)]
pub struct TokenVerifier {
    keys: Arc<JwksClient<WebSource>>,
    audience: String,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Keys are fetched lazily from `<issuer>/.well-known/jwks.json`.
    pub fn new(issuer: &str, audience: &str) -> anyhow::Result<Self> {
        let jwks_url = Url::parse(issuer)?.join(".well-known/jwks.json")?;
        let source = WebSource::builder().build(jwks_url)?;
        let keys = JwksClient::builder().time_to_live(KEY_TTL).build(source);

        Ok(Self {
            keys: Arc::new(keys),
            audience: audience.to_owned(),
        })
    }

    pub async fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let claims: Claims = self
            .keys
            .decode(token, &[self.audience.as_str()])
            .await
            .map_err(|err| TokenError::Invalid(err.to_string()))?;

        if !claims.aud.contains(&self.audience) {
            return Err(TokenError::WrongAudience(self.audience.clone()));
        }
        Ok(claims)
    }
}
