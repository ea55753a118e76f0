//! HTTP adapter for the court portal.
//!
//! Login submits the SSO username/password form with a scratch cookie jar
//! and captures the resulting cookies per origin. Probe and scrape replay
//! those cookies explicitly, so the adapter itself holds no session state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use chrono::{Days, Local};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::COOKIE;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::{
    Authenticator, Credential, ObservedRecord, OriginCookies, Scraper, SessionExpired, Snapshot,
};

const USER_AGENT: &str = concat!("docket-watch/", env!("CARGO_PKG_VERSION"));

/// Portal URLs the adapter talks to.
#[derive(Debug, Clone)]
pub struct PortalEndpoints {
    /// Landing page used as the validity probe.
    pub portal_url: Url,
    /// SSO login page holding the credentials form.
    pub login_url: Url,
    /// JSON notification inbox.
    pub inbox_url: Url,
    /// Path prefix on the login origin that marks the login gate.
    pub login_gate_path: String,
}

impl PortalEndpoints {
    /// True when `url` is on the login origin under the gate path.
    #[must_use]
    pub fn is_login_gate(&self, url: &Url) -> bool {
        url.host_str() == self.login_url.host_str()
            && url.port_or_known_default() == self.login_url.port_or_known_default()
            && url.path().starts_with(&self.login_gate_path)
    }
}

/// Inbox paging and request limits.
#[derive(Debug, Clone)]
pub struct InboxOptions {
    pub request_timeout: Duration,
    /// Days back from today to request notifications for.
    pub lookback_days: u32,
    pub page_size: u32,
    pub max_pages: u32,
}

impl Default for InboxOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            lookback_days: 30,
            page_size: 50,
            max_pages: 20,
        }
    }
}

/// Portal adapter implementing both [`Authenticator`] and [`Scraper`].
pub struct HttpPortal {
    endpoints: PortalEndpoints,
    options: InboxOptions,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl HttpPortal {
    pub fn new(
        endpoints: PortalEndpoints,
        options: InboxOptions,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = Self::client_builder(&options)
            .build()
            .context("building portal HTTP client")?;
        Ok(Self {
            endpoints,
            options,
            username: username.into(),
            password: password.into(),
            client,
        })
    }

    fn client_builder(options: &InboxOptions) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(options.request_timeout)
    }

    fn authed_get(&self, url: Url, credential: &Credential) -> reqwest::RequestBuilder {
        let header = credential.cookie_header_for(&url).map(str::to_owned);
        let request = self.client.get(url);
        match header {
            Some(h) => request.header(COOKIE, h),
            None => request,
        }
    }

    fn inbox_page_url(&self, page: u32) -> Url {
        let today = Local::now().date_naive();
        let from = today
            .checked_sub_days(Days::new(u64::from(self.options.lookback_days)))
            .unwrap_or(today);
        let mut url = self.endpoints.inbox_url.clone();
        url.query_pairs_mut()
            .append_pair("bandeja", "RECIBIDAS")
            .append_pair("fechaDesde", &from.format("%d%m%Y").to_string())
            .append_pair("fechaHasta", &today.format("%d%m%Y").to_string())
            .append_pair("page", &page.to_string())
            .append_pair("pageSize", &self.options.page_size.to_string());
        url
    }
}

#[async_trait]
impl Authenticator for HttpPortal {
    async fn login(&self) -> anyhow::Result<Credential> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            bail!("portal username or password is empty");
        }

        let jar = Arc::new(Jar::default());
        let client = Self::client_builder(&self.options)
            .cookie_provider(Arc::clone(&jar))
            .build()
            .context("building login HTTP client")?;

        let page = client
            .get(self.endpoints.login_url.clone())
            .send()
            .await
            .context("fetching login page")?;
        if !page.status().is_success() {
            bail!("login page returned {}", page.status());
        }
        let page_url = page.url().clone();
        let html = page.text().await?;
        let action = extract_form_action(&html).ok_or_else(|| anyhow!("login form not found"))?;
        let action_url = page_url
            .join(&action)
            .with_context(|| format!("invalid login form action: {action}"))?;

        let response = client
            .post(action_url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .context("submitting login form")?;

        let final_url = response.url().clone();
        if self.endpoints.is_login_gate(&final_url) {
            bail!("portal rejected credentials (still at {})", final_url.path());
        }
        if !response.status().is_success() {
            bail!("login returned {}", response.status());
        }

        let mut cookies = Vec::new();
        for origin in [
            &self.endpoints.portal_url,
            &self.endpoints.inbox_url,
            &self.endpoints.login_url,
        ] {
            let Some(value) = jar.cookies(origin) else {
                continue;
            };
            let Ok(header) = value.to_str() else {
                continue;
            };
            let url = origin_of(origin);
            if cookies.iter().any(|c: &OriginCookies| c.url == url) {
                continue;
            }
            cookies.push(OriginCookies {
                url,
                header: header.to_owned(),
            });
        }
        if cookies.is_empty() {
            bail!("login produced no session cookies");
        }

        debug!(origins = cookies.len(), "portal login succeeded");
        Ok(Credential::new(cookies))
    }

    async fn probe(&self, credential: &Credential) -> anyhow::Result<bool> {
        let response = self
            .authed_get(self.endpoints.portal_url.clone(), credential)
            .send()
            .await
            .context("probing portal")?;

        if self.endpoints.is_login_gate(response.url()) {
            debug!("probe redirected to login gate");
            return Ok(false);
        }
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl Scraper for HttpPortal {
    async fn scrape(&self, credential: &Credential) -> anyhow::Result<Snapshot> {
        let mut snapshot = Snapshot::default();

        for page in 0..self.options.max_pages {
            let url = self.inbox_page_url(page);
            let response = self
                .authed_get(url, credential)
                .send()
                .await
                .with_context(|| format!("fetching inbox page {page}"))?;

            if self.endpoints.is_login_gate(response.url()) {
                return Err(SessionExpired.into());
            }
            if !response.status().is_success() {
                bail!("inbox page {page} returned {}", response.status());
            }

            let body: serde_json::Value = response
                .json()
                .await
                .with_context(|| format!("inbox page {page} is not JSON"))?;
            let Some(items) = body.get("content").and_then(serde_json::Value::as_array) else {
                bail!("inbox page {page} has no content array");
            };

            for (idx, item) in items.iter().enumerate() {
                match parse_inbox_item(item) {
                    Ok(record) => snapshot.records.push(record),
                    Err(e) => {
                        warn!(page, idx, "skipping inbox item: {e}");
                        snapshot.errors.push(format!("page {page} item {idx}: {e}"));
                    }
                }
            }

            let total_pages = body
                .get("totalPages")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0);
            let short_page = items.len() < self.options.page_size as usize;
            if short_page || u64::from(page) + 1 >= total_pages {
                break;
            }
        }

        debug!(
            records = snapshot.records.len(),
            errors = snapshot.errors.len(),
            "inbox scraped"
        );
        Ok(snapshot)
    }
}

/// `scheme://host[:port]/` for `url`.
fn origin_of(url: &Url) -> String {
    let mut origin = url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin.to_string()
}

/// Pull the `action` attribute of the first `<form>` in `html` that has one.
fn extract_form_action(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("form[action]") else {
        return None;
    };
    document
        .select(&selector)
        .find_map(|form| form.value().attr("action"))
        .map(str::trim)
        .filter(|action| !action.is_empty())
        .map(str::to_owned)
}

fn parse_inbox_item(item: &serde_json::Value) -> Result<ObservedRecord, String> {
    let number = item
        .get("numeroExpediente")
        .or_else(|| item.get("numero"))
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if number.is_empty() {
        return Err("missing numeroExpediente".to_owned());
    }

    let title = item
        .get("caratula")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    let id = match item.get("id") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let date = item
        .get("fechaNotificacion")
        .or_else(|| item.get("fecha"))
        .and_then(serde_json::Value::as_str);
    let details = match (id, date) {
        (Some(id), Some(date)) => Some(format!("notificación {id} del {date}")),
        (Some(id), None) => Some(format!("notificación {id}")),
        (None, Some(date)) => Some(format!("notificación del {date}")),
        (None, None) => None,
    };

    Ok(ObservedRecord {
        number: number.to_owned(),
        title: title.to_owned(),
        has_notification: true,
        details,
    })
}
