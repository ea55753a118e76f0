//! In-process state store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::types::{Record, StoreStats, VerificationRun};
use super::{StateStore, StoreError};

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, Record>,
    runs: Vec<VerificationRun>,
}

/// Non-durable [`StateStore`] with the same merge rules as SQLite.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

impl StateStore for MemoryStateStore {
    fn get_record(&self, number: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.lock()?.records.get(number).cloned())
    }

    fn upsert_record(&self, record: &Record) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let merged = record.merged_onto(inner.records.get(&record.number));
        inner.records.insert(merged.number.clone(), merged);
        Ok(())
    }

    fn append_run(&self, run: &VerificationRun) -> Result<(), StoreError> {
        self.lock()?.runs.push(run.clone());
        Ok(())
    }

    fn pending_unsent(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .lock()?
            .records
            .values()
            .filter(|r| r.is_pending_unsent())
            .cloned()
            .collect())
    }

    fn list_records(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.lock()?.records.values().cloned().collect())
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<VerificationRun>, StoreError> {
        Ok(self.lock()?.runs.iter().rev().take(limit).cloned().collect())
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.lock()?;
        let mut stats = StoreStats::default();
        for r in inner.records.values() {
            stats.total_records += 1;
            if r.has_notification {
                stats.with_notification += 1;
            }
            if r.is_pending_unsent() {
                stats.pending_unsent += 1;
            }
            if r.notification_sent {
                stats.sent += 1;
            }
        }
        Ok(stats)
    }

    fn reset(&self) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.records.clear();
        inner.runs.clear();
        Ok(())
    }
}
