//! Configuration for the docket monitor.
//!
//! Loaded from `config.toml` (see [`crate::app_dirs::config_file`]) and then
//! overlaid with environment variables, with a `.env` file honoured via
//! `dotenvy`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::credentials::{CredentialManager, CredentialRef};
use crate::detector::RepeatPolicy;
use crate::error::{MonitorError, Result};
use crate::monitor::MonitorSettings;
use crate::notify::TelegramConfig;
use crate::portal::{InboxOptions, PortalEndpoints};
use crate::session::SessionSettings;

/// Config fields that hold a secret and can be moved into the keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretField {
    PortalPassword,
    BotToken,
}

impl SecretField {
    /// Keyring account name, also the dotted config key.
    #[must_use]
    pub fn account(self) -> &'static str {
        match self {
            Self::PortalPassword => "portal.password",
            Self::BotToken => "notifier.bot_token",
        }
    }
}

impl std::str::FromStr for SecretField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "portal.password" => Ok(Self::PortalPassword),
            "notifier.bot_token" => Ok(Self::BotToken),
            other => Err(format!(
                "unknown secret '{other}' (expected portal.password or notifier.bot_token)"
            )),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub portal: PortalConfig,
    pub session: SessionConfig,
    pub schedule: ScheduleConfig,
    pub notifier: NotifierConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Portal endpoints and login identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Landing page, also used as the session probe.
    pub portal_url: String,
    /// SSO login page.
    pub login_url: String,
    /// JSON notification inbox.
    pub inbox_url: String,
    /// Path prefix on the login host that means "not logged in".
    pub login_gate_path: String,
    pub username: String,
    pub password: CredentialRef,
    /// Days of inbox history requested per scrape.
    pub lookback_days: u32,
    pub page_size: u32,
    pub max_pages: u32,
    pub request_timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            portal_url: "https://portalpjn.pjn.gov.ar/".to_owned(),
            login_url: "https://sso.pjn.gov.ar/auth/realms/pjn/protocol/openid-connect/auth?client_id=pjn-portal&redirect_uri=https%3A%2F%2Fportalpjn.pjn.gov.ar%2F&response_type=code&scope=openid".to_owned(),
            inbox_url: "https://notif.pjn.gov.ar/api/notificaciones".to_owned(),
            login_gate_path: "/auth".to_owned(),
            username: String::new(),
            password: CredentialRef::None,
            lookback_days: 30,
            page_size: 50,
            max_pages: 20,
            request_timeout_secs: 30,
        }
    }
}

/// Session probe/login behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_login_attempts: u32,
    pub probe_timeout_secs: u64,
    pub login_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// Where the session cookies are persisted (default under the data dir).
    pub artifact_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: 3,
            probe_timeout_secs: 30,
            login_timeout_secs: 30,
            backoff_base_secs: 30,
            backoff_max_secs: 300,
            artifact_path: None,
        }
    }
}

/// Cycle timing and policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub check_interval_minutes: u64,
    pub run_on_start: bool,
    pub alert_on_failure: bool,
    pub scrape_timeout_secs: u64,
    pub repeat_policy: RepeatPolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_minutes: 30,
            run_on_start: true,
            alert_on_failure: true,
            scrape_timeout_secs: 120,
            repeat_policy: RepeatPolicy::default(),
        }
    }
}

/// Telegram delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// When false, eligible records are recorded but nothing is sent.
    pub enabled: bool,
    pub bot_token: CredentialRef,
    pub chat_id: String,
    pub api_base: String,
    pub send_timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: CredentialRef::None,
            chat_id: String::new(),
            api_base: crate::notify::telegram::DEFAULT_API_BASE.to_owned(),
            send_timeout_secs: 30,
        }
    }
}

/// State database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file (default under the data dir).
    pub database_path: Option<PathBuf>,
}

/// Log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (`info`, `debug`, or a
    /// full `EnvFilter` string).
    pub level: String,
    /// Also write a daily rolling log file.
    pub file: bool,
    /// Log directory (default under the data dir).
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file: true,
            directory: None,
        }
    }
}

impl MonitorConfig {
    /// Load `path` if it exists (defaults otherwise), then apply `.env` and
    /// process environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or an
    /// environment override is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| MonitorError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MonitorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Store `value` in `credentials` and point `field` at the new entry.
    ///
    /// A previous keyring entry under a different reference is deleted.
    /// The config is only changed in memory; call
    /// [`save_to_file`](Self::save_to_file) to persist it.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Credential` if the credential store rejects
    /// the write.
    pub fn store_secret(
        &mut self,
        field: SecretField,
        value: &str,
        credentials: &dyn CredentialManager,
    ) -> Result<()> {
        let stored = credentials.store(field.account(), value)?;
        let slot = match field {
            SecretField::PortalPassword => &mut self.portal.password,
            SecretField::BotToken => &mut self.notifier.bot_token,
        };
        let previous = std::mem::replace(slot, stored);
        if previous != *slot
            && let Err(e) = credentials.delete(&previous)
        {
            warn!(field = field.account(), "cannot remove previous secret: {e}");
        }
        Ok(())
    }

    /// Default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }

    /// Overlay values from `lookup` (normally the process environment).
    ///
    /// `PJN_USERNAME` / `PJN_PASSWORD` are accepted as fallbacks for the
    /// portal identity.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Config` if `CHECK_INTERVAL_MINUTES` is not a
    /// positive integer.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |primary: &str, fallback: Option<&str>| {
            lookup(primary)
                .or_else(|| fallback.and_then(|k| lookup(k)))
                .filter(|v| !v.trim().is_empty())
        };

        if let Some(v) = get("PORTAL_USERNAME", Some("PJN_USERNAME")) {
            self.portal.username = v.trim().to_owned();
        }
        if let Some(v) = get("PORTAL_PASSWORD", Some("PJN_PASSWORD")) {
            self.portal.password = CredentialRef::Plaintext(v);
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN", None) {
            self.notifier.bot_token = CredentialRef::Plaintext(v.trim().to_owned());
        }
        if let Some(v) = get("TELEGRAM_CHAT_ID", None) {
            self.notifier.chat_id = v.trim().to_owned();
        }
        if let Some(v) = get("CHECK_INTERVAL_MINUTES", None) {
            let minutes: u64 = v.trim().parse().map_err(|_| {
                MonitorError::Config(format!("CHECK_INTERVAL_MINUTES is not a number: {v}"))
            })?;
            if minutes == 0 {
                return Err(MonitorError::Config(
                    "CHECK_INTERVAL_MINUTES must be at least 1".to_owned(),
                ));
            }
            self.schedule.check_interval_minutes = minutes;
        }
        if let Some(v) = get("LOG_LEVEL", None) {
            self.logging.level = v.trim().to_owned();
        }
        Ok(())
    }

    /// Check every required value and report all problems at once.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Config` listing each missing or invalid key.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.portal.username.trim().is_empty() {
            problems.push("portal.username (PORTAL_USERNAME)".to_owned());
        }
        if !self.portal.password.is_set() {
            problems.push("portal.password (PORTAL_PASSWORD)".to_owned());
        }
        for (key, value) in [
            ("portal.portal_url", &self.portal.portal_url),
            ("portal.login_url", &self.portal.login_url),
            ("portal.inbox_url", &self.portal.inbox_url),
        ] {
            if url::Url::parse(value).is_err() {
                problems.push(format!("{key} is not a valid URL"));
            }
        }
        if self.notifier.enabled {
            if !self.notifier.bot_token.is_set() {
                problems.push("notifier.bot_token (TELEGRAM_BOT_TOKEN)".to_owned());
            }
            if self.notifier.chat_id.trim().is_empty() {
                problems.push("notifier.chat_id (TELEGRAM_CHAT_ID)".to_owned());
            }
        }
        if self.schedule.check_interval_minutes == 0 {
            problems.push("schedule.check_interval_minutes must be at least 1".to_owned());
        }
        if self.session.max_login_attempts == 0 {
            problems.push("session.max_login_attempts must be at least 1".to_owned());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::Config(format!(
                "missing or invalid settings: {}",
                problems.join(", ")
            )))
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.check_interval_minutes.saturating_mul(60))
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(crate::app_dirs::database_file)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.session
            .artifact_path
            .clone()
            .unwrap_or_else(crate::app_dirs::session_artifact_file)
    }

    pub fn log_directory(&self) -> PathBuf {
        self.logging
            .directory
            .clone()
            .unwrap_or_else(crate::app_dirs::logs_dir)
    }

    pub fn session_settings(&self) -> SessionSettings {
        let s = &self.session;
        SessionSettings {
            max_login_attempts: s.max_login_attempts,
            probe_timeout: Duration::from_secs(s.probe_timeout_secs),
            login_timeout: Duration::from_secs(s.login_timeout_secs),
            backoff_base: Duration::from_secs(s.backoff_base_secs),
            backoff_max: Duration::from_secs(s.backoff_max_secs),
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            check_interval: self.check_interval(),
            run_on_start: self.schedule.run_on_start,
            alert_on_failure: self.schedule.alert_on_failure,
            repeat_policy: self.schedule.repeat_policy,
            scrape_timeout: Duration::from_secs(self.schedule.scrape_timeout_secs),
            send_timeout: Duration::from_secs(self.notifier.send_timeout_secs),
        }
    }

    /// Parsed portal URLs.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Config` for an unparseable URL.
    pub fn portal_endpoints(&self) -> Result<PortalEndpoints> {
        let parse = |key: &str, value: &str| {
            url::Url::parse(value).map_err(|e| MonitorError::Config(format!("{key}: {e}")))
        };
        Ok(PortalEndpoints {
            portal_url: parse("portal.portal_url", &self.portal.portal_url)?,
            login_url: parse("portal.login_url", &self.portal.login_url)?,
            inbox_url: parse("portal.inbox_url", &self.portal.inbox_url)?,
            login_gate_path: self.portal.login_gate_path.clone(),
        })
    }

    pub fn inbox_options(&self) -> InboxOptions {
        InboxOptions {
            request_timeout: Duration::from_secs(self.portal.request_timeout_secs),
            lookback_days: self.portal.lookback_days,
            page_size: self.portal.page_size.max(1),
            max_pages: self.portal.max_pages.max(1),
        }
    }

    /// Telegram settings with the bot token resolved.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Credential` if the token cannot be resolved.
    pub fn telegram_config(&self, credentials: &dyn CredentialManager) -> Result<TelegramConfig> {
        Ok(TelegramConfig {
            bot_token: self.notifier.bot_token.resolve(credentials)?,
            chat_id: self.notifier.chat_id.clone(),
            api_base: self.notifier.api_base.clone(),
            request_timeout: Duration::from_secs(self.notifier.send_timeout_secs),
            check_interval_minutes: self.schedule.check_interval_minutes,
        })
    }
}
