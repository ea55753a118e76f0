use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::artifact::ArtifactFile;
use crate::error::{MonitorError, Result};
use crate::portal::{Authenticator, Credential};

/// Validity of the current portal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Valid,
}

/// Login retry and timeout settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_login_attempts: u32,
    pub probe_timeout: Duration,
    pub login_timeout: Duration,
    /// Delay after the first failed login; doubles per further failure.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_login_attempts: 3,
            probe_timeout: Duration::from_secs(30),
            login_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl SessionSettings {
    /// Delay before the next login after `failures` consecutive failures.
    #[must_use]
    pub fn backoff_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// Authenticated credential handed to the scraper.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    credential: Credential,
    reused: bool,
}

impl SessionHandle {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// True when an existing credential passed the probe (no login ran).
    pub fn reused(&self) -> bool {
        self.reused
    }
}

/// Owns the portal credential and its validity state machine.
///
/// `Unauthenticated -> Authenticating -> Valid`, dropping back to
/// `Unauthenticated` when a probe fails or every login attempt fails.
pub struct SessionManager {
    authenticator: Arc<dyn Authenticator>,
    artifact: Option<ArtifactFile>,
    settings: SessionSettings,
    state: SessionState,
    credential: Option<Credential>,
}

impl SessionManager {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        artifact: Option<ArtifactFile>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            authenticator,
            artifact,
            settings,
            state: SessionState::Unauthenticated,
            credential: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Return a session that passed a probe or a fresh login.
    ///
    /// # Errors
    ///
    /// `MonitorError::Authentication` once every login attempt has failed
    /// or timed out. A probe that errors or times out is not fatal; it
    /// falls through to a fresh login.
    pub async fn ensure_valid_session(&mut self) -> Result<SessionHandle> {
        if let Some(credential) = self.current_credential() {
            match self.probe(&credential).await {
                Ok(true) => {
                    debug!("existing session still valid");
                    self.set_state(SessionState::Valid);
                    self.credential = Some(credential.clone());
                    return Ok(SessionHandle {
                        credential,
                        reused: true,
                    });
                }
                Ok(false) => {
                    info!("stored session rejected by portal, discarding");
                    self.credential = None;
                    self.clear_artifact();
                }
                Err(e) => {
                    warn!("session probe failed, logging in again: {e}");
                    self.credential = None;
                }
            }
        }

        self.set_state(SessionState::Authenticating);
        match self.login_with_retry().await {
            Ok(credential) => {
                if let Some(artifact) = &self.artifact
                    && let Err(e) = artifact.save(&credential)
                {
                    warn!(path = %artifact.path().display(), "cannot persist session: {e}");
                }
                self.credential = Some(credential.clone());
                self.set_state(SessionState::Valid);
                Ok(SessionHandle {
                    credential,
                    reused: false,
                })
            }
            Err(e) => {
                self.set_state(SessionState::Unauthenticated);
                Err(e)
            }
        }
    }

    /// Force the next [`ensure_valid_session`](Self::ensure_valid_session)
    /// to log in again.
    pub fn invalidate(&mut self) {
        self.credential = None;
        self.clear_artifact();
        self.set_state(SessionState::Unauthenticated);
    }

    /// Drop the in-memory handle. The persisted artifact is kept for the
    /// next process.
    pub fn close(&mut self) {
        self.credential = None;
        self.set_state(SessionState::Unauthenticated);
        debug!("session closed");
    }

    fn current_credential(&self) -> Option<Credential> {
        if let Some(c) = &self.credential {
            return Some(c.clone());
        }
        let artifact = self.artifact.as_ref()?;
        match artifact.load() {
            Ok(found) => found,
            Err(e) => {
                warn!(path = %artifact.path().display(), "ignoring unreadable session artifact: {e}");
                None
            }
        }
    }

    async fn probe(&self, credential: &Credential) -> Result<bool> {
        let timeout = self.settings.probe_timeout;
        match tokio::time::timeout(timeout, self.authenticator.probe(credential)).await {
            Ok(Ok(valid)) => Ok(valid),
            Ok(Err(e)) => Err(MonitorError::Authentication(format!("probe failed: {e:#}"))),
            Err(_) => Err(MonitorError::Timeout {
                operation: "probe",
                after: timeout,
            }),
        }
    }

    async fn login_with_retry(&self) -> Result<Credential> {
        let attempts = self.settings.max_login_attempts.max(1);
        let timeout = self.settings.login_timeout;
        let mut last_error = MonitorError::Authentication("no login attempted".to_owned());

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.settings.backoff_after(attempt - 1);
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                debug!(attempt, delay_ms, "waiting before login retry");
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(timeout, self.authenticator.login()).await {
                Ok(Ok(credential)) => {
                    info!(attempt, "portal login succeeded");
                    return Ok(credential);
                }
                Ok(Err(e)) => {
                    warn!(attempt, attempts, "portal login failed: {e:#}");
                    last_error = MonitorError::Authentication(format!(
                        "login failed after {attempt} attempt(s): {e:#}"
                    ));
                }
                Err(_) => {
                    warn!(attempt, attempts, "portal login timed out");
                    last_error = MonitorError::Authentication(format!(
                        "login failed after {attempt} attempt(s): {}",
                        MonitorError::Timeout {
                            operation: "login",
                            after: timeout,
                        }
                    ));
                }
            }
        }

        Err(last_error)
    }

    fn clear_artifact(&self) {
        if let Some(artifact) = &self.artifact
            && let Err(e) = artifact.clear()
        {
            warn!(path = %artifact.path().display(), "cannot remove session artifact: {e}");
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "session state change");
            self.state = next;
        }
    }
}
