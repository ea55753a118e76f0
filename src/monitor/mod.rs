//! Run orchestration: one single-flight verification cycle at a time.
//!
//! Each cycle ensures a session, scrapes, classifies against the store,
//! dispatches eligible records and appends a [`VerificationRun`]. The
//! periodic loop and manual triggers both go through [`Monitor::run_cycle`],
//! which returns [`CycleOutcome::Skipped`] instead of queueing when another
//! cycle is in flight.

mod schedule;
mod status;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::detector::{RepeatPolicy, classify};
use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::error::{MonitorError, Result};
use crate::notify::{AlertContext, Notifier};
use crate::portal::{Scraper, SessionExpired, Snapshot};
use crate::session::SessionManager;
use crate::store::{Record, StateStore, StoreStats, VerificationRun};

pub use status::{CycleOutcome, MonitorStatus};

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    /// Run one cycle as soon as the loop starts.
    pub run_on_start: bool,
    /// Send a notifier alert when a run fails.
    pub alert_on_failure: bool,
    pub repeat_policy: RepeatPolicy,
    pub scrape_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30 * 60),
            run_on_start: true,
            alert_on_failure: true,
            repeat_policy: RepeatPolicy::default(),
            scrape_timeout: Duration::from_secs(120),
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// `from + interval`, saturating at `from` when out of range.
fn after_interval(from: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(from)
}

/// The verification orchestrator. Shared as `Arc<Monitor>`.
pub struct Monitor {
    settings: MonitorSettings,
    session: tokio::sync::Mutex<SessionManager>,
    scraper: Arc<dyn Scraper>,
    store: Arc<dyn StateStore>,
    notifier: Option<Arc<dyn Notifier>>,
    dispatcher: Dispatcher,
    /// Single-flight guard for `run_cycle`.
    is_verifying: AtomicBool,
    status: std::sync::Mutex<MonitorStatus>,
    /// Signalled whenever a cycle releases the guard.
    cycle_done: Notify,
}

/// Clears the single-flight flag and wakes shutdown waiters on drop.
struct VerifyingGuard<'a> {
    monitor: &'a Monitor,
}

impl Drop for VerifyingGuard<'_> {
    fn drop(&mut self) {
        self.monitor.is_verifying.store(false, Ordering::Release);
        self.monitor.cycle_done.notify_waiters();
    }
}

/// Aggregated result of the cycle stages after the session step.
#[derive(Default)]
struct CycleTally {
    records_observed: usize,
    new_notifications: usize,
    delivered: usize,
    errors: Vec<String>,
    failure: Option<MonitorError>,
}

impl CycleTally {
    fn fail(&mut self, err: MonitorError) {
        error!("verification cycle failed: {err}");
        self.errors.push(err.to_string());
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }
}

impl Monitor {
    /// `notifier` is `None` when notifications are disabled.
    pub fn new(
        settings: MonitorSettings,
        session: SessionManager,
        scraper: Arc<dyn Scraper>,
        store: Arc<dyn StateStore>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let dispatcher = Dispatcher::new(store.clone(), notifier.clone(), settings.send_timeout);
        Self {
            settings,
            session: tokio::sync::Mutex::new(session),
            scraper,
            store,
            notifier,
            dispatcher,
            is_verifying: AtomicBool::new(false),
            status: std::sync::Mutex::new(MonitorStatus::default()),
            cycle_done: Notify::new(),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Snapshot of the counters.
    pub fn status(&self) -> MonitorStatus {
        self.with_status(|s| s.clone())
    }

    /// Most recent runs, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<VerificationRun>> {
        Ok(self.store.recent_runs(limit)?)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats()?)
    }

    /// True while a cycle holds the single-flight guard.
    pub fn is_verifying(&self) -> bool {
        self.is_verifying.load(Ordering::Acquire)
    }

    fn with_status<T>(&self, f: impl FnOnce(&mut MonitorStatus) -> T) -> T {
        let mut guard = match self.status.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Run one verification cycle, or skip if one is already running.
    ///
    /// Never returns an error: every failure is folded into the returned
    /// [`VerificationRun`] and the counters.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let now = Utc::now();
        if self
            .is_verifying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("verification already in progress, skipping");
            return CycleOutcome::Skipped { at: now };
        }
        let _guard = VerifyingGuard { monitor: self };

        self.with_status(|s| {
            s.total_checks += 1;
            s.last_check = Some(now);
        });

        let started = Instant::now();
        let run_id = VerificationRun::new_id();
        info!(run_id = %run_id, "verification cycle started");

        let tally = self.execute(&run_id, now).await;

        let mut run = VerificationRun {
            id: run_id,
            timestamp: now,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            records_observed: tally.records_observed,
            new_notifications: tally.new_notifications,
            notifications_delivered: tally.delivered,
            errors: tally.errors,
            success: tally.failure.is_none(),
        };
        let mut failure = tally.failure.map(|e| e.to_string());

        if let Err(e) = self.store.append_run(&run) {
            let err = MonitorError::from(e);
            error!(run_id = %run.id, "cannot append run history: {err}");
            run.errors.push(err.to_string());
            run.success = false;
            failure.get_or_insert_with(|| err.to_string());
        }

        let next_check = after_interval(Utc::now(), self.settings.check_interval);
        self.with_status(|s| s.record_run(&run, next_check, failure.clone()));

        info!(
            run_id = %run.id,
            observed = run.records_observed,
            new = run.new_notifications,
            delivered = run.notifications_delivered,
            errors = run.errors.len(),
            duration_ms = run.duration_ms,
            success = run.success,
            "verification cycle finished"
        );

        if let Some(message) = failure {
            self.raise_alert(&message, &run).await;
        } else if run.notifications_delivered > 0 {
            self.send_status_report().await;
        }

        CycleOutcome::Finished(run)
    }

    async fn execute(&self, run_id: &str, now: DateTime<Utc>) -> CycleTally {
        let mut tally = CycleTally::default();

        let session = {
            let mut manager = self.session.lock().await;
            manager.ensure_valid_session().await
        };
        let handle = match session {
            Ok(h) => h,
            Err(e) => {
                tally.fail(e);
                return tally;
            }
        };

        let snapshot = match tokio::time::timeout(
            self.settings.scrape_timeout,
            self.scraper.scrape(handle.credential()),
        )
        .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                if e.downcast_ref::<SessionExpired>().is_some() {
                    warn!(run_id, "portal rejected the session mid-scrape");
                    self.session.lock().await.invalidate();
                }
                tally.fail(MonitorError::Scrape(format!("{e:#}")));
                Snapshot::default()
            }
            Err(_) => {
                tally.fail(MonitorError::Timeout {
                    operation: "scrape",
                    after: self.settings.scrape_timeout,
                });
                Snapshot::default()
            }
        };

        tally.records_observed = snapshot.records.len();
        for item_error in &snapshot.errors {
            warn!(run_id, "scrape item error: {item_error}");
        }
        tally.errors.extend(snapshot.errors.iter().cloned());

        match self.classify_and_dispatch(&snapshot, run_id, now).await {
            Ok(summary) => {
                tally.new_notifications = summary.new_notifications;
                tally.delivered = summary.delivered;
                tally
                    .errors
                    .extend(summary.errors.iter().map(ToString::to_string));
            }
            Err(e) => tally.fail(e),
        }

        tally
    }

    async fn classify_and_dispatch(
        &self,
        snapshot: &Snapshot,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchSummary> {
        let mut stored: HashMap<String, Record> = HashMap::new();
        for obs in &snapshot.records {
            if stored.contains_key(&obs.number) {
                continue;
            }
            if let Some(record) = self.store.get_record(&obs.number)? {
                stored.insert(obs.number.clone(), record);
            }
        }
        let pending = self.store.pending_unsent()?;

        let classified = classify(&snapshot.records, &stored, &pending, self.settings.repeat_policy);
        self.dispatcher.process(&classified, run_id, now).await
    }

    async fn raise_alert(&self, message: &str, run: &VerificationRun) {
        if !self.settings.alert_on_failure {
            return;
        }
        let Some(notifier) = &self.notifier else {
            return;
        };
        let context = AlertContext {
            run_id: run.id.clone(),
            at: run.timestamp,
            errors: run.errors.clone(),
        };
        match tokio::time::timeout(self.settings.send_timeout, notifier.alert(message, &context)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(notifier = notifier.id(), "failure alert not delivered: {e:#}"),
            Err(_) => warn!(notifier = notifier.id(), "failure alert timed out"),
        }
    }

    async fn send_status_report(&self) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let stats = match self.store.stats() {
            Ok(s) => s,
            Err(e) => {
                warn!("cannot read stats for status report: {e}");
                return;
            }
        };
        match tokio::time::timeout(self.settings.send_timeout, notifier.status_report(&stats)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(notifier = notifier.id(), "status report not delivered: {e:#}"),
            Err(_) => warn!(notifier = notifier.id(), "status report timed out"),
        }
    }
}
