//! Change detection: classify a scrape against stored state.
//!
//! [`classify`] is a pure function of the snapshot and the stored rows. It
//! never touches the store itself, so the same inputs always produce the
//! same output.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::portal::ObservedRecord;
use crate::store::Record;

/// How an observed record relates to what was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// First sighting, already flagged.
    New,
    /// First sighting, no flag yet.
    Discovered,
    /// Stored unflagged, now flagged.
    ChangedToNotified,
    /// Flagged earlier but never delivered.
    PendingRetry,
    /// Already delivered, flag details changed since.
    PossibleRepeat,
    Unchanged,
}

impl Classification {
    #[must_use]
    pub fn is_dispatch_eligible(self) -> bool {
        matches!(
            self,
            Self::New | Self::ChangedToNotified | Self::PendingRetry | Self::PossibleRepeat
        )
    }

    /// A notification appearing for the first time (not a retry).
    #[must_use]
    pub fn is_new_notification(self) -> bool {
        matches!(self, Self::New | Self::ChangedToNotified | Self::PossibleRepeat)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Discovered => "discovered",
            Self::ChangedToNotified => "changed_to_notified",
            Self::PendingRetry => "pending_retry",
            Self::PossibleRepeat => "possible_repeat",
            Self::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// Whether an already-delivered record may be dispatched again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// Re-dispatch when both the stored and observed details are present
    /// and differ.
    #[default]
    DetailsChanged,
    /// Never re-dispatch a delivered record.
    Never,
}

/// One classified record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRecord {
    pub observed: ObservedRecord,
    /// Stored row before this cycle, if any.
    pub stored: Option<Record>,
    pub classification: Classification,
    /// False for pending records carried over without being scraped.
    pub in_snapshot: bool,
}

impl ClassifiedRecord {
    pub fn is_dispatch_eligible(&self) -> bool {
        self.classification.is_dispatch_eligible()
    }

    pub fn number(&self) -> &str {
        &self.observed.number
    }
}

/// Collapse duplicate keys: first occurrence wins, flags are OR-ed.
fn coalesce(snapshot: &[ObservedRecord]) -> BTreeMap<String, ObservedRecord> {
    let mut out: BTreeMap<String, ObservedRecord> = BTreeMap::new();
    for obs in snapshot {
        out.entry(obs.number.clone())
            .and_modify(|existing| existing.has_notification |= obs.has_notification)
            .or_insert_with(|| obs.clone());
    }
    out
}

fn classify_one(
    observed: &ObservedRecord,
    stored: Option<&Record>,
    policy: RepeatPolicy,
) -> Classification {
    let Some(stored) = stored else {
        return if observed.has_notification {
            Classification::New
        } else {
            Classification::Discovered
        };
    };

    if !observed.has_notification {
        return Classification::Unchanged;
    }
    if !stored.has_notification {
        return Classification::ChangedToNotified;
    }
    if !stored.notification_sent {
        return Classification::PendingRetry;
    }

    match (policy, &stored.notification_details, &observed.details) {
        (RepeatPolicy::DetailsChanged, Some(before), Some(now)) if before != now => {
            Classification::PossibleRepeat
        }
        _ => Classification::Unchanged,
    }
}

/// Classify a snapshot against stored rows.
///
/// `stored` must hold the current row for every observed key that exists
/// in the store. `pending` is the store's pending-unsent set; any of those
/// missing from the snapshot come back as `PendingRetry` so a failed
/// delivery is retried even when the scrape misses the record.
///
/// Output is sorted by record number.
pub fn classify(
    snapshot: &[ObservedRecord],
    stored: &HashMap<String, Record>,
    pending: &[Record],
    policy: RepeatPolicy,
) -> Vec<ClassifiedRecord> {
    let mut by_key: BTreeMap<String, ClassifiedRecord> = coalesce(snapshot)
        .into_iter()
        .map(|(key, observed)| {
            let prior = stored.get(&key);
            let classification = classify_one(&observed, prior, policy);
            (
                key,
                ClassifiedRecord {
                    observed,
                    stored: prior.cloned(),
                    classification,
                    in_snapshot: true,
                },
            )
        })
        .collect();

    for record in pending.iter().filter(|r| r.is_pending_unsent()) {
        by_key
            .entry(record.number.clone())
            .or_insert_with(|| ClassifiedRecord {
                observed: ObservedRecord {
                    number: record.number.clone(),
                    title: record.title.clone(),
                    has_notification: true,
                    details: record.notification_details.clone(),
                },
                stored: Some(record.clone()),
                classification: Classification::PendingRetry,
                in_snapshot: false,
            });
    }

    by_key.into_values().collect()
}
