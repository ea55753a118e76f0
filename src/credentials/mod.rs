//! Secret storage for portal and notifier credentials.
//!
//! Config files may hold secrets inline (`"..."`) or point at a platform
//! keyring entry (`{ service = "...", account = "..." }`). The monitor
//! resolves them once at startup.
//!
//! ```no_run
//! use docket_watch::credentials::{CredentialManager, create_manager};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = create_manager();
//! let cred_ref = manager.store("portal.password", "...")?;
//! let secret = cred_ref.resolve(manager.as_ref())?;
//! # let _ = secret;
//! # Ok(())
//! # }
//! ```

mod encrypted;
mod types;

pub use encrypted::{KeyringCredentialManager, SERVICE_NAME};
pub use types::{CredentialError, CredentialRef};

/// Manages secure storage and retrieval of credentials.
pub trait CredentialManager: Send + Sync {
    /// Store a secret under `account` and return a reference to it.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::StorageError` if the platform store fails.
    fn store(&self, account: &str, value: &str) -> Result<CredentialRef, CredentialError>;

    /// Retrieve a secret's value using its reference.
    ///
    /// Returns `Ok(None)` for `CredentialRef::None`.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotFound` if a keyring entry does not exist.
    fn retrieve(&self, cred_ref: &CredentialRef) -> Result<Option<String>, CredentialError>;

    /// Delete a secret. Deleting a missing entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::StorageError` if the platform store fails.
    fn delete(&self, cred_ref: &CredentialRef) -> Result<(), CredentialError>;
}

/// Create the platform credential manager.
#[must_use]
pub fn create_manager() -> Box<dyn CredentialManager> {
    Box::new(KeyringCredentialManager::new())
}
