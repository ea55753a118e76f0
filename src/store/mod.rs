//! Durable state: one row per docket plus append-only run history.
//!
//! The [`StateStore`] trait is the only persistence surface the monitor
//! sees. [`SqliteStateStore`] is the production backend;
//! [`MemoryStateStore`] backs tests.
//!
//! Every backend must keep `notification_sent` monotonic: an upsert that
//! carries `false` for a row already marked sent leaves it sent.

pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod types;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;
pub use types::{Record, StoreStats, VerificationRun};

/// Errors from state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

/// Persistence contract for records and verification runs.
pub trait StateStore: Send + Sync {
    /// Look up a record by natural key.
    fn get_record(&self, number: &str) -> Result<Option<Record>, StoreError>;

    /// Insert or update by natural key. Never reverts `notification_sent`.
    fn upsert_record(&self, record: &Record) -> Result<(), StoreError>;

    /// Append one run to the history.
    fn append_run(&self, run: &VerificationRun) -> Result<(), StoreError>;

    /// Records flagged but never delivered, ordered by number.
    fn pending_unsent(&self) -> Result<Vec<Record>, StoreError>;

    /// All records ordered by number.
    fn list_records(&self) -> Result<Vec<Record>, StoreError>;

    /// Most recent runs, newest first.
    fn recent_runs(&self, limit: usize) -> Result<Vec<VerificationRun>, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Administrative wipe of records and history.
    fn reset(&self) -> Result<(), StoreError>;
}
