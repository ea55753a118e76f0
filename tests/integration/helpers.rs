//! Scripted collaborators shared by the monitor scenarios.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docket_watch::notify::{AlertContext, DispatchContext, Notifier};
use docket_watch::portal::{
    Authenticator, Credential, ObservedRecord, OriginCookies, Scraper, SessionExpired, Snapshot,
};
use docket_watch::session::{ArtifactFile, SessionManager, SessionSettings};
use docket_watch::store::{MemoryStateStore, StoreError};
use docket_watch::{Monitor, MonitorSettings, Record, StateStore, StoreStats, VerificationRun};

// ── Authenticator ──

/// Logs in successfully unless `fail_logins` is set. Probes accept any
/// credential unless `reject_probe` is set.
#[derive(Default)]
pub(crate) struct FakeAuth {
    pub logins: AtomicUsize,
    pub probes: AtomicUsize,
    pub fail_logins: AtomicBool,
    pub reject_probe: AtomicBool,
}

#[async_trait]
impl Authenticator for FakeAuth {
    async fn login(&self) -> anyhow::Result<Credential> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst);
        if self.fail_logins.load(Ordering::SeqCst) {
            anyhow::bail!("portal rejected the login form");
        }
        Ok(Credential::new(vec![OriginCookies {
            url: "https://portal.example/".to_owned(),
            header: format!("JSESSIONID=session-{n}"),
        }]))
    }

    async fn probe(&self, _credential: &Credential) -> anyhow::Result<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(!self.reject_probe.load(Ordering::SeqCst))
    }
}

// ── Scraper ──

/// Returns queued snapshots in order, repeating the last one once the
/// queue runs dry.
#[derive(Default)]
pub(crate) struct FakeScraper {
    queue: Mutex<VecDeque<Snapshot>>,
    last: Mutex<Snapshot>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    /// Answer as if the portal bounced the request to the login gate.
    pub expire: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeScraper {
    pub fn push(&self, records: Vec<ObservedRecord>) {
        self.queue
            .lock()
            .unwrap()
            .push_back(Snapshot::from_records(records));
    }

    pub fn push_snapshot(&self, snapshot: Snapshot) {
        self.queue.lock().unwrap().push_back(snapshot);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Scraper for FakeScraper {
    async fn scrape(&self, _credential: &Credential) -> anyhow::Result<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("inbox page did not render");
        }
        if self.expire.load(Ordering::SeqCst) {
            return Err(SessionExpired.into());
        }
        let next = self.queue.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(snapshot) = next {
            *last = snapshot;
        }
        Ok(last.clone())
    }
}

// ── Notifier ──

#[derive(Default)]
pub(crate) struct FakeNotifier {
    pub sent: Mutex<Vec<String>>,
    pub alerts: Mutex<Vec<String>>,
    pub reports: AtomicUsize,
    pub fail: AtomicBool,
}

impl FakeNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    fn id(&self) -> &'static str {
        "fake"
    }

    async fn send(&self, record: &Record, _context: &DispatchContext) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("chat unreachable");
        }
        self.sent.lock().unwrap().push(record.number.clone());
        Ok(())
    }

    async fn alert(&self, message: &str, _context: &AlertContext) -> anyhow::Result<()> {
        self.alerts.lock().unwrap().push(message.to_owned());
        Ok(())
    }

    async fn status_report(&self, _stats: &StoreStats) -> anyhow::Result<()> {
        self.reports.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Store ──

/// Memory store whose writes can be switched off.
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStateStore,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io("disk full".to_owned()));
        }
        Ok(())
    }
}

impl StateStore for FlakyStore {
    fn get_record(&self, number: &str) -> Result<Option<Record>, StoreError> {
        self.inner.get_record(number)
    }

    fn upsert_record(&self, record: &Record) -> Result<(), StoreError> {
        self.check()?;
        self.inner.upsert_record(record)
    }

    fn append_run(&self, run: &VerificationRun) -> Result<(), StoreError> {
        self.check()?;
        self.inner.append_run(run)
    }

    fn pending_unsent(&self) -> Result<Vec<Record>, StoreError> {
        self.inner.pending_unsent()
    }

    fn list_records(&self) -> Result<Vec<Record>, StoreError> {
        self.inner.list_records()
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<VerificationRun>, StoreError> {
        self.inner.recent_runs(limit)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats()
    }

    fn reset(&self) -> Result<(), StoreError> {
        self.inner.reset()
    }
}

// ── Wiring ──

pub(crate) fn observed(number: &str, flagged: bool) -> ObservedRecord {
    ObservedRecord::new(number, format!("Caratula {number}"), flagged)
}

pub(crate) fn fast_session_settings() -> SessionSettings {
    SessionSettings {
        max_login_attempts: 3,
        probe_timeout: Duration::from_secs(2),
        login_timeout: Duration::from_secs(2),
        backoff_base: Duration::from_millis(5),
        backoff_max: Duration::from_millis(10),
    }
}

pub(crate) fn fast_monitor_settings() -> MonitorSettings {
    MonitorSettings {
        check_interval: Duration::from_secs(3600),
        scrape_timeout: Duration::from_secs(2),
        send_timeout: Duration::from_secs(2),
        ..MonitorSettings::default()
    }
}

/// All the pieces of one monitor under test.
pub(crate) struct Harness {
    pub auth: Arc<FakeAuth>,
    pub scraper: Arc<FakeScraper>,
    pub notifier: Arc<FakeNotifier>,
    pub store: Arc<FlakyStore>,
    pub monitor: Arc<Monitor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(fast_monitor_settings(), None, Arc::new(FlakyStore::default()))
    }

    pub fn with_settings(settings: MonitorSettings) -> Self {
        Self::build(settings, None, Arc::new(FlakyStore::default()))
    }

    pub fn build(
        settings: MonitorSettings,
        artifact: Option<ArtifactFile>,
        store: Arc<FlakyStore>,
    ) -> Self {
        let auth = Arc::new(FakeAuth::default());
        let scraper = Arc::new(FakeScraper::default());
        let notifier = Arc::new(FakeNotifier::default());
        let session = SessionManager::new(auth.clone(), artifact, fast_session_settings());
        let monitor = Arc::new(Monitor::new(
            settings,
            session,
            scraper.clone(),
            store.clone(),
            Some(notifier.clone()),
        ));
        Self {
            auth,
            scraper,
            notifier,
            store,
            monitor,
        }
    }

    /// Run one cycle and return its run, panicking if it was skipped.
    pub async fn cycle(&self) -> VerificationRun {
        self.monitor
            .run_cycle()
            .await
            .run()
            .cloned()
            .expect("cycle should not be skipped")
    }

    pub fn record(&self, number: &str) -> Record {
        self.store
            .get_record(number)
            .unwrap()
            .unwrap_or_else(|| panic!("record {number} should be stored"))
    }
}
