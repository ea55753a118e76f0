//! Portal collaborators: login mechanics and record extraction.
//!
//! The monitor only depends on the [`Authenticator`] and [`Scraper`]
//! traits. [`http::HttpPortal`] implements both against the court portal's
//! SSO form and JSON inbox.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use http::{HttpPortal, InboxOptions, PortalEndpoints};

/// The portal bounced an authenticated request back to the login gate.
///
/// Scrapers return this inside their `anyhow::Error` so the monitor can
/// drop the session instead of reusing it next cycle.
#[derive(Debug, thiserror::Error)]
#[error("session expired while reading inbox")]
pub struct SessionExpired;

/// Cookies captured for one origin after login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginCookies {
    /// Origin URL the cookies were issued for (e.g. `https://portalpjn.pjn.gov.ar/`).
    pub url: String,
    /// Value of the `Cookie` request header for that origin.
    pub header: String,
}

/// Authenticated credential artifact. Persisted between restarts.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub cookies: Vec<OriginCookies>,
    pub obtained_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(cookies: Vec<OriginCookies>) -> Self {
        Self {
            cookies,
            obtained_at: Utc::now(),
        }
    }

    /// `Cookie` header for the origin matching `url`'s host, if any.
    #[must_use]
    pub fn cookie_header_for(&self, url: &url::Url) -> Option<&str> {
        let host = url.host_str()?;
        self.cookies
            .iter()
            .find(|c| {
                url::Url::parse(&c.url)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h == host))
                    .unwrap_or(false)
            })
            .map(|c| c.header.as_str())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let origins: Vec<&str> = self.cookies.iter().map(|c| c.url.as_str()).collect();
        f.debug_struct("Credential")
            .field("origins", &origins)
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// One record as seen on the portal this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedRecord {
    pub number: String,
    pub title: String,
    pub has_notification: bool,
    /// Adapter description of the current notification.
    #[serde(default)]
    pub details: Option<String>,
}

impl ObservedRecord {
    pub fn new(number: impl Into<String>, title: impl Into<String>, has_notification: bool) -> Self {
        Self {
            number: number.into(),
            title: title.into(),
            has_notification,
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Result of one scrape: the records plus per-item extraction errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub records: Vec<ObservedRecord>,
    pub errors: Vec<String>,
}

impl Snapshot {
    pub fn from_records(records: Vec<ObservedRecord>) -> Self {
        Self {
            records,
            errors: Vec::new(),
        }
    }
}

/// Performs the portal login and validity probe.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Log in with the configured identity and return a fresh credential.
    async fn login(&self) -> anyhow::Result<Credential>;

    /// Cheap check that `credential` is still accepted.
    ///
    /// Returns `Ok(false)` when the portal redirects to its login gate.
    async fn probe(&self, credential: &Credential) -> anyhow::Result<bool>;
}

/// Extracts observed records using an authenticated credential.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, credential: &Credential) -> anyhow::Result<Snapshot>;
}
