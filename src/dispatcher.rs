//! Idempotent delivery: send one notification per eligible record and
//! durably record the outcome.
//!
//! A record is only marked sent after the notifier confirms delivery. A
//! failed send leaves the row in a state the detector classifies as
//! eligible again next cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::detector::{Classification, ClassifiedRecord};
use crate::error::{MonitorError, Result};
use crate::notify::{DispatchContext, Notifier};
use crate::store::{Record, StateStore};

/// Outcome of delivering one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub number: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Totals for one pass over a classified snapshot.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    /// Eligible records that are not retries of an earlier failure.
    pub new_notifications: usize,
    pub delivered: usize,
    /// Per-record failures. Never cycle-fatal.
    pub errors: Vec<MonitorError>,
}

/// Sends notifications and persists every classified record.
pub struct Dispatcher {
    store: Arc<dyn StateStore>,
    /// `None` when notifications are disabled.
    notifier: Option<Arc<dyn Notifier>>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn StateStore>,
        notifier: Option<Arc<dyn Notifier>>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            send_timeout,
        }
    }

    /// Deliver and persist one eligible record.
    ///
    /// # Errors
    ///
    /// Only a store write failure is returned as `Err`; a failed send is
    /// reported through the `DispatchResult`.
    pub async fn dispatch(
        &self,
        item: &ClassifiedRecord,
        context: &DispatchContext,
    ) -> Result<DispatchResult> {
        let now = context.detected_at;
        let mut record = pending_record(item, now);

        let Some(notifier) = &self.notifier else {
            debug!(number = %record.number, "notifications disabled, recording only");
            self.store.upsert_record(&record)?;
            return Ok(DispatchResult {
                number: record.number,
                success: false,
                error: None,
            });
        };

        let outcome = match tokio::time::timeout(self.send_timeout, notifier.send(&record, context))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err(format!(
                "send timed out after {}s",
                self.send_timeout.as_secs()
            )),
        };

        match outcome {
            Ok(()) => {
                record.mark_sent(now);
                self.store.upsert_record(&record)?;
                info!(
                    number = %record.number,
                    classification = %item.classification,
                    notifier = notifier.id(),
                    "notification delivered"
                );
                Ok(DispatchResult {
                    number: record.number,
                    success: true,
                    error: None,
                })
            }
            Err(message) => {
                warn!(number = %record.number, notifier = notifier.id(), "delivery failed: {message}");
                self.store.upsert_record(&failed_record(item, record))?;
                Ok(DispatchResult {
                    number: item.number().to_owned(),
                    success: false,
                    error: Some(message),
                })
            }
        }
    }

    /// Dispatch every eligible record in order and persist the rest.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Persistence` as soon as any store write fails.
    pub async fn process(
        &self,
        classified: &[ClassifiedRecord],
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();

        for item in classified {
            if !item.is_dispatch_eligible() {
                self.store.upsert_record(&observed_record(item, now))?;
                continue;
            }

            if item.classification.is_new_notification() {
                summary.new_notifications += 1;
            }
            let context = DispatchContext {
                run_id: run_id.to_owned(),
                classification: item.classification,
                detected_at: now,
            };
            let result = self.dispatch(item, &context).await?;
            if result.success {
                summary.delivered += 1;
            }
            if let Some(message) = result.error {
                summary.errors.push(MonitorError::Dispatch {
                    number: result.number,
                    message,
                });
            }
        }

        Ok(summary)
    }
}

/// Stored row (or a fresh one) refreshed with this cycle's observation.
fn base_record(item: &ClassifiedRecord, now: DateTime<Utc>) -> Record {
    let obs = &item.observed;
    let mut record = item
        .stored
        .clone()
        .unwrap_or_else(|| Record::new(obs.number.clone(), obs.title.clone(), now));
    if !obs.title.is_empty() {
        record.title = obs.title.clone();
    }
    if item.in_snapshot {
        record.last_checked_at = now;
    }
    record
}

/// Row for a record that is not being dispatched.
fn observed_record(item: &ClassifiedRecord, now: DateTime<Utc>) -> Record {
    let mut record = base_record(item, now);
    record.has_notification = item.observed.has_notification;
    if item.observed.details.is_some() {
        record.notification_details = item.observed.details.clone();
    }
    record
}

/// Row carrying the flag and details about to be delivered.
fn pending_record(item: &ClassifiedRecord, now: DateTime<Utc>) -> Record {
    let mut record = base_record(item, now);
    record.has_notification = true;
    if item.observed.details.is_some() {
        record.notification_details = item.observed.details.clone();
    }
    record
}

/// Row to persist after a failed send so the next cycle retries it.
///
/// A never-sent record keeps the flag and becomes pending-unsent. An
/// already-sent record keeps its stored flag and details, since the store
/// never clears the sent bit and the change must be detected again.
fn failed_record(item: &ClassifiedRecord, mut attempted: Record) -> Record {
    if let Some(stored) = &item.stored
        && stored.notification_sent
    {
        attempted.has_notification = stored.has_notification;
        attempted.notification_details = stored.notification_details.clone();
    }
    attempted
}
