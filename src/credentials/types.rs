//! Credential references and errors.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Where the long-lived API key lives.
///
/// # Serialization
///
/// - `Plaintext("value")` serializes as `"value"` (bare string)
/// - `None` serializes as `""`
/// - `Env { var }` serializes as `{ env = "VAR" }`
/// - `Keyring { service, account }` serializes as `{ service = "...", account = "..." }`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CredentialRef {
    /// Read from an environment variable at resolve time.
    Env {
        /// Variable name, e.g. `OPENAI_API_KEY`.
        var: String,
    },
    /// Stored in the platform credential store via `keyring`.
    Keyring {
        /// Service name.
        service: String,
        /// Account identifier.
        account: String,
    },
    /// Inline value in the config file.
    Plaintext(String),
    /// No credential configured.
    #[default]
    None,
}

impl Serialize for CredentialRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CredentialRef::Plaintext(value) => serializer.serialize_str(value),
            CredentialRef::None => serializer.serialize_str(""),
            CredentialRef::Env { var } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("env", var)?;
                map.end()
            }
            CredentialRef::Keyring { service, account } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("service", service)?;
                map.serialize_entry("account", account)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for CredentialRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CredentialRefVisitor;

        impl<'de> Visitor<'de> for CredentialRefVisitor {
            type Value = CredentialRef;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("a string, { env = ... }, or { service = ..., account = ... }")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<CredentialRef, E> {
                if value.is_empty() {
                    Ok(CredentialRef::None)
                } else {
                    Ok(CredentialRef::Plaintext(value.to_owned()))
                }
            }

            fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<CredentialRef, M::Error> {
                let mut env: Option<String> = Option::None;
                let mut service: Option<String> = Option::None;
                let mut account: Option<String> = Option::None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "env" => env = Some(map.next_value()?),
                        "service" => service = Some(map.next_value()?),
                        "account" => account = Some(map.next_value()?),
                        other => {
                            let _: de::IgnoredAny = map.next_value()?;
                            return Err(de::Error::unknown_field(
                                other,
                                &["env", "service", "account"],
                            ));
                        }
                    }
                }

                match (env, service, account) {
                    (Some(var), Option::None, Option::None) => Ok(CredentialRef::Env { var }),
                    (Option::None, Some(service), Some(account)) => {
                        Ok(CredentialRef::Keyring { service, account })
                    }
                    _ => Err(de::Error::custom(
                        "expected either `env` or both `service` and `account`",
                    )),
                }
            }
        }

        deserializer.deserialize_any(CredentialRefVisitor)
    }
}

impl CredentialRef {
    /// Check if this reference points to an actual credential.
    #[must_use]
    pub fn is_set(&self) -> bool {
        !matches!(self, CredentialRef::None)
    }

    /// Resolve the reference to the secret value.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] when nothing is configured, the
    /// environment variable is unset/empty, or the keyring has no entry.
    /// Returns [`CredentialError::Storage`] if the platform store fails.
    pub fn resolve(&self) -> Result<String, CredentialError> {
        match self {
            CredentialRef::Plaintext(value) => Ok(value.clone()),
            CredentialRef::Env { var } => match std::env::var(var) {
                Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_owned()),
                _ => Err(CredentialError::NotFound(format!(
                    "environment variable {var} is not set"
                ))),
            },
            CredentialRef::Keyring { service, account } => {
                let entry = keyring::Entry::new(service, account).map_err(|e| {
                    CredentialError::Storage(format!("failed to open keyring entry: {e}"))
                })?;
                match entry.get_password() {
                    Ok(password) => Ok(password),
                    Err(keyring::Error::NoEntry) => Err(CredentialError::NotFound(format!(
                        "no keyring entry for {service}/{account}"
                    ))),
                    Err(e) => Err(CredentialError::Storage(format!(
                        "failed to read credential: {e}"
                    ))),
                }
            }
            CredentialRef::None => Err(CredentialError::NotFound(
                "no API key configured".to_owned(),
            )),
        }
    }

    /// Store `value` in the platform keyring and return the matching reference.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Storage`] if the platform store fails.
    pub fn store_in_keyring(
        service: &str,
        account: &str,
        value: &str,
    ) -> Result<Self, CredentialError> {
        let entry = keyring::Entry::new(service, account).map_err(|e| {
            CredentialError::Storage(format!("failed to open keyring entry: {e}"))
        })?;
        entry
            .set_password(value)
            .map_err(|e| CredentialError::Storage(format!("failed to store credential: {e}")))?;
        Ok(CredentialRef::Keyring {
            service: service.to_owned(),
            account: account.to_owned(),
        })
    }
}

/// Errors that can occur while obtaining a session credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// No credential configured or found.
    #[error("credential not found: {0}")]
    NotFound(String),

    /// The credential string is not of a recognised prefix family.
    #[error("invalid credential format: {0}")]
    InvalidFormat(String),

    /// Minting an ephemeral token failed at the HTTP layer.
    #[error("token request failed: {0}")]
    Http(String),

    /// Platform credential store failure.
    #[error("storage error: {0}")]
    Storage(String),
}
