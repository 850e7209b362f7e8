//! Session credentials.
//!
//! The realtime session only needs `get_credential() -> String`. Two
//! providers exist:
//!
//! - [`StaticCredential`]: hands a caller-supplied key straight through.
//! - [`EphemeralTokenProvider`]: trades a long-lived API key for a
//!   short-lived `ek_` token and caches it until it expires or is
//!   invalidated after a failed connect.
//!
//! The long-lived key itself is located through a [`CredentialRef`]
//! (environment variable, platform keyring, or inline value).

mod ephemeral;
mod types;

pub use ephemeral::{EphemeralTokenProvider, TokenInfo};
pub use types::{CredentialError, CredentialRef};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{CredentialsConfig, VoiceConfig};

/// Prefix of short-lived tokens minted for browser/edge clients.
pub const EPHEMERAL_PREFIX: &str = "ek_";
/// Prefix of standard long-lived API keys.
pub const STANDARD_PREFIX: &str = "sk-";
/// Minimum plausible length of an ephemeral token.
pub const MIN_EPHEMERAL_LEN: usize = 20;

/// Source of the credential string handed to the realtime session.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a credential, minting or loading one if needed.
    async fn get_credential(&self) -> Result<String, CredentialError>;

    /// Drop any cached credential so the next call regenerates it.
    fn invalidate(&self);
}

/// A fixed credential supplied by the caller.
pub struct StaticCredential {
    value: String,
}

impl StaticCredential {
    /// Wrap a credential string.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredential")
            .field("kind", &credential_kind(&self.value))
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn get_credential(&self) -> Result<String, CredentialError> {
        if self.value.is_empty() {
            return Err(CredentialError::NotFound("empty credential".to_owned()));
        }
        Ok(self.value.clone())
    }

    fn invalidate(&self) {}
}

/// Build the provider described by `creds`.
///
/// The API key is resolved once, here. With `ephemeral` set the session
/// receives minted `ek_` tokens, otherwise the key itself.
///
/// # Errors
///
/// Returns the [`CredentialRef::resolve`] error when no key is available.
pub fn provider_from_config(
    voice: &VoiceConfig,
    creds: &CredentialsConfig,
) -> Result<Arc<dyn CredentialProvider>, CredentialError> {
    let api_key = creds.api_key.resolve()?;
    if creds.ephemeral {
        debug!("using ephemeral session tokens");
        Ok(Arc::new(EphemeralTokenProvider::new(api_key, voice, creds)))
    } else {
        debug!(kind = credential_kind(&api_key), "using API key for session");
        Ok(Arc::new(StaticCredential::new(api_key)))
    }
}

/// Whether `token` looks like a minted ephemeral token.
#[must_use]
pub fn is_ephemeral_token(token: &str) -> bool {
    token.starts_with(EPHEMERAL_PREFIX) && token.len() >= MIN_EPHEMERAL_LEN
}

/// Validate a credential before it is handed to the session transport.
///
/// Accepts ephemeral (`ek_`) or standard (`sk-`) keys.
///
/// # Errors
///
/// Returns [`CredentialError::NotFound`] for an empty string and
/// [`CredentialError::InvalidFormat`] for anything else unrecognised.
pub fn validate_session_credential(credential: &str) -> Result<(), CredentialError> {
    if credential.is_empty() {
        return Err(CredentialError::NotFound("missing realtime API key".to_owned()));
    }
    if credential.starts_with(EPHEMERAL_PREFIX) || credential.starts_with(STANDARD_PREFIX) {
        Ok(())
    } else {
        Err(CredentialError::InvalidFormat(format!(
            "expected a key starting with \"{EPHEMERAL_PREFIX}\" (ephemeral) or \"{STANDARD_PREFIX}\" (standard)"
        )))
    }
}

/// Human-readable credential kind for logs. Never logs the secret.
#[must_use]
pub fn credential_kind(credential: &str) -> &'static str {
    if credential.starts_with(EPHEMERAL_PREFIX) {
        "ephemeral"
    } else if credential.starts_with(STANDARD_PREFIX) {
        "standard"
    } else {
        "unknown"
    }
}
