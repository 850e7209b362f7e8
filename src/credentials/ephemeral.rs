//! Ephemeral realtime token minting and caching.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{CredentialError, CredentialProvider, is_ephemeral_token};
use crate::config::{CredentialsConfig, VoiceConfig};

/// Path of the token minting endpoint relative to the API base URL.
const CLIENT_SECRETS_PATH: &str = "/v1/realtime/client_secrets";

/// A minted token and the instant it stops being usable.
#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        is_ephemeral_token(&self.value) && now < self.expires_at
    }
}

/// Snapshot of the cached token for diagnostics. Never contains the secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// Whether a token is cached at all.
    pub cached: bool,
    /// Expiry of the cached token.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the cached token is currently usable.
    pub is_valid: bool,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: Option<String>,
    expires_at: Option<i64>,
}

/// Response body of the minting endpoint. Newer servers return the secret at
/// the top level, older ones nest it under `client_secret`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    value: Option<String>,
    expires_at: Option<i64>,
    client_secret: Option<ClientSecret>,
}

impl TokenResponse {
    fn into_parts(self) -> (Option<String>, Option<i64>) {
        match self.client_secret {
            Some(secret) if self.value.is_none() => (secret.value, secret.expires_at),
            _ => (self.value, self.expires_at),
        }
    }
}

/// Mints short-lived `ek_` tokens from a long-lived API key.
///
/// Tokens are cached until expiry. [`invalidate`](CredentialProvider::invalidate)
/// discards the cache so a rejected token is never reused.
pub struct EphemeralTokenProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    validity: Duration,
    cache: Mutex<Option<CachedToken>>,
    mint_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for EphemeralTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralTokenProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("validity", &self.validity)
            .finish()
    }
}

impl EphemeralTokenProvider {
    /// Create a provider for the given API key.
    pub fn new(api_key: impl Into<String>, voice: &VoiceConfig, creds: &CredentialsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: voice.api_base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            model: voice.model.clone(),
            voice: voice.voice.clone(),
            validity: Duration::from_secs(creds.token_validity_secs),
            cache: Mutex::new(None),
            mint_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Override the API base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Describe the cached token.
    pub fn token_info(&self) -> TokenInfo {
        let cache = match self.cache.lock() {
            Ok(c) => c,
            Err(p) => p.into_inner(),
        };
        match cache.as_ref() {
            Some(token) => TokenInfo {
                cached: true,
                expires_at: Some(token.expires_at),
                is_valid: token.is_valid_at(Utc::now()),
            },
            None => TokenInfo {
                cached: false,
                expires_at: None,
                is_valid: false,
            },
        }
    }

    fn cached_valid(&self, now: DateTime<Utc>) -> Option<String> {
        let mut cache = match self.cache.lock() {
            Ok(c) => c,
            Err(p) => p.into_inner(),
        };
        match cache.as_ref() {
            Some(token) if token.is_valid_at(now) => Some(token.value.clone()),
            Some(_) => {
                debug!("cached realtime token expired");
                *cache = None;
                None
            }
            None => None,
        }
    }

    fn request_body(&self) -> serde_json::Value {
        serde_json::json!({
            "session": {
                "type": "realtime",
                "model": self.model,
                "audio": {
                    "output": { "voice": self.voice },
                },
            },
        })
    }

    async fn mint(&self) -> Result<CachedToken, CredentialError> {
        let url = format!("{}{CLIENT_SECRETS_PATH}", self.base_url);
        info!(model = %self.model, "minting ephemeral realtime token");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body())
            .send()
            .await
            .map_err(|e| CredentialError::Http(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "token minting rejected");
            return Err(CredentialError::Http(format!(
                "HTTP {}: {}",
                status.as_u16(),
                extract_error_message(&body)
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Http(format!("invalid token response: {e}")))?;
        let (value, expires_at) = parsed.into_parts();
        let value = value.unwrap_or_default();

        if !is_ephemeral_token(&value) {
            return Err(CredentialError::InvalidFormat(
                "server returned a token without the ek_ prefix".to_owned(),
            ));
        }

        let now = Utc::now();
        let fallback = now
            + chrono::Duration::from_std(self.validity).unwrap_or_else(|_| chrono::Duration::hours(1));
        let expires_at = expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .map_or(fallback, |server| server.min(fallback));

        Ok(CachedToken { value, expires_at })
    }
}

#[async_trait]
impl CredentialProvider for EphemeralTokenProvider {
    async fn get_credential(&self) -> Result<String, CredentialError> {
        // Serialise minting so concurrent starts share one token.
        let _guard = self.mint_lock.lock().await;

        if let Some(token) = self.cached_valid(Utc::now()) {
            debug!("using cached realtime token");
            return Ok(token);
        }

        let token = self.mint().await?;
        let value = token.value.clone();
        let mut cache = match self.cache.lock() {
            Ok(c) => c,
            Err(p) => p.into_inner(),
        };
        *cache = Some(token);
        info!("ephemeral realtime token cached");
        Ok(value)
    }

    fn invalidate(&self) {
        let mut cache = match self.cache.lock() {
            Ok(c) => c,
            Err(p) => p.into_inner(),
        };
        if cache.take().is_some() {
            info!("cached realtime token discarded");
        }
    }
}

/// Extract an error message from an API error response body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}
