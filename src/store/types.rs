//! Persisted record and run types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version. Increment when the table layout changes.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// One tracked docket, keyed by its natural `number`.
///
/// `notification_sent` only ever moves from `false` to `true`, and
/// `notification_sent_at` is `Some` exactly when it is `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Natural key (e.g. `"100/2024"`).
    pub number: String,
    pub title: String,
    pub has_notification: bool,
    pub last_checked_at: DateTime<Utc>,
    pub notification_sent: bool,
    pub notification_sent_at: Option<DateTime<Utc>>,
    /// Free text describing what raised the flag, as reported by the scraper.
    pub notification_details: Option<String>,
}

impl Record {
    /// A never-notified record as first observed at `checked_at`.
    pub fn new(number: impl Into<String>, title: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            number: number.into(),
            title: title.into(),
            has_notification: false,
            last_checked_at: checked_at,
            notification_sent: false,
            notification_sent_at: None,
            notification_details: None,
        }
    }

    /// Mark delivery confirmed at `at`.
    pub fn mark_sent(&mut self, at: DateTime<Utc>) {
        self.notification_sent = true;
        self.notification_sent_at = Some(at);
    }

    /// Flagged but never delivered.
    #[must_use]
    pub fn is_pending_unsent(&self) -> bool {
        self.has_notification && !self.notification_sent
    }

    /// Merge an incoming write onto the stored row.
    ///
    /// The sent flag never reverts; a write without a sent timestamp keeps
    /// the stored one.
    #[must_use]
    pub fn merged_onto(&self, existing: Option<&Record>) -> Record {
        let mut merged = self.clone();
        merged.normalize_sent_at();
        if let Some(old) = existing {
            if old.notification_sent && !merged.notification_sent {
                merged.notification_sent = true;
                merged.notification_sent_at = old.notification_sent_at;
            }
            if merged.notification_sent && merged.notification_sent_at.is_none() {
                merged.notification_sent_at = old.notification_sent_at;
            }
        }
        merged
    }

    /// Enforce `sent_at` set iff `sent` on this value alone.
    pub(crate) fn normalize_sent_at(&mut self) {
        if !self.notification_sent {
            self.notification_sent_at = None;
        } else if self.notification_sent_at.is_none() {
            self.notification_sent_at = Some(self.last_checked_at);
        }
    }
}

/// One executed verification cycle. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRun {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub records_observed: usize,
    pub new_notifications: usize,
    pub notifications_delivered: usize,
    pub errors: Vec<String>,
    pub success: bool,
}

impl VerificationRun {
    /// Fresh run id.
    #[must_use]
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Aggregate counts over the record table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_records: u64,
    pub with_notification: u64,
    pub pending_unsent: u64,
    pub sent: u64,
}
