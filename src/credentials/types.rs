//! Core types for credential management.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Reference to a secret used by the monitor (portal password, bot token).
///
/// # Serialization
///
/// - `Plaintext("value")` serializes as `"value"` (bare string)
/// - `None` serializes as `""` (empty string, TOML-safe)
/// - `Keyring { service, account }` serializes as `{ service = "...", account = "..." }`
///
/// A bare string in config is read as `Plaintext` (non-empty) or `None` (empty).
#[derive(Clone, PartialEq, Eq, Default)]
pub enum CredentialRef {
    /// Secret stored in the platform credential store.
    Keyring {
        /// Service name (e.g., "docket-watch")
        service: String,
        /// Account identifier (e.g., "portal.password", "telegram.bot_token")
        account: String,
    },
    /// Secret held inline in config or the environment.
    Plaintext(String),
    /// No secret configured.
    #[default]
    None,
}

impl std::fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keyring { service, account } => f
                .debug_struct("Keyring")
                .field("service", service)
                .field("account", account)
                .finish(),
            Self::Plaintext(_) => f.write_str("Plaintext(<redacted>)"),
            Self::None => f.write_str("None"),
        }
    }
}

impl Serialize for CredentialRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CredentialRef::Plaintext(value) => serializer.serialize_str(value),
            CredentialRef::None => serializer.serialize_str(""),
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
                formatter.write_str("a string or a map with 'service' and 'account' keys")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<CredentialRef, E> {
                Ok(CredentialRef::from_plain(value))
            }

            fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<CredentialRef, M::Error> {
                let mut service: Option<String> = Option::None;
                let mut account: Option<String> = Option::None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "service" => service = Some(map.next_value()?),
                        "account" => account = Some(map.next_value()?),
                        other => {
                            let _: de::IgnoredAny = map.next_value()?;
                            return Err(de::Error::unknown_field(other, &["service", "account"]));
                        }
                    }
                }

                match (service, account) {
                    (Some(service), Some(account)) => Ok(CredentialRef::Keyring { service, account }),
                    _ => Err(de::Error::missing_field("service or account")),
                }
            }
        }

        deserializer.deserialize_any(CredentialRefVisitor)
    }
}

impl CredentialRef {
    /// Build a reference from a raw string: empty means `None`.
    #[must_use]
    pub fn from_plain(value: &str) -> Self {
        if value.is_empty() {
            CredentialRef::None
        } else {
            CredentialRef::Plaintext(value.to_owned())
        }
    }

    /// Returns `false` for `CredentialRef::None`, `true` otherwise.
    #[must_use]
    pub fn is_set(&self) -> bool {
        !matches!(self, CredentialRef::None)
    }

    /// Resolve the secret value.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotFound` if the reference is `None` or the
    /// keyring entry does not exist.
    pub fn resolve(&self, manager: &dyn super::CredentialManager) -> Result<String, CredentialError> {
        match self {
            CredentialRef::Plaintext(value) => Ok(value.clone()),
            CredentialRef::Keyring { .. } => manager.retrieve(self)?.ok_or(CredentialError::NotFound),
            CredentialRef::None => Err(CredentialError::NotFound),
        }
    }
}

/// Errors from credential storage operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Credential not found in storage.
    #[error("credential not found")]
    NotFound,

    /// Platform credential store failed.
    #[error("credential storage error: {0}")]
    StorageError(String),
}
