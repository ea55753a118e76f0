//! Error types for the docket monitor.

use std::time::Duration;

use crate::store::StoreError;

/// Top-level error type for a verification cycle.
///
/// Variants map onto how the orchestrator reacts: authentication and
/// persistence failures are fatal to the cycle, scrape and dispatch
/// failures are collected and the cycle continues.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Login attempts exhausted or the portal rejected the credentials.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Record extraction failed as a whole.
    #[error("scrape error: {0}")]
    Scrape(String),

    /// A single notification could not be delivered.
    #[error("dispatch error for {number}: {message}")]
    Dispatch {
        /// Natural key of the record that failed.
        number: String,
        /// Notifier error text.
        message: String,
    },

    /// State store read or write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A network-bound operation exceeded its deadline.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Operation name (e.g. `probe`, `login`, `send`).
        operation: &'static str,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Credential lookup error.
    #[error("credential error: {0}")]
    Credential(#[from] crate::credentials::CredentialError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Returns `true` when this error marks the whole run as failed.
    ///
    /// Per-record errors (dispatch, item-level scrape) are not fatal.
    #[must_use]
    pub fn is_cycle_fatal(&self) -> bool {
        !matches!(self, Self::Dispatch { .. })
    }
}

impl From<StoreError> for MonitorError {
    fn from(e: StoreError) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, MonitorError>;
