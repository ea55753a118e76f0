//! SQLite-backed state store.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use super::schema::{apply_schema, read_schema_version};
use super::types::{Record, StoreStats, VerificationRun};
use super::{StateStore, StoreError};

const RECORD_COLUMNS: &str = "number, title, has_notification, last_checked_at, \
     notification_sent, notification_sent_at, notification_details";

const RUN_COLUMNS: &str = "id, timestamp, duration_ms, records_observed, new_notifications, \
     notifications_delivered, errors, success";

/// State store backed by a single SQLite file.
///
/// All access is serialized through an internal `Mutex<Connection>`.
pub struct SqliteStateStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        apply_schema(&conn)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored schema version.
    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<Record>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, row_to_record)?;
        let mut records = Vec::new();
        for r in rows {
            records.push(r?);
        }
        Ok(records)
    }
}

impl StateStore for SqliteStateStore {
    fn get_record(&self, number: &str) -> Result<Option<Record>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE number = ?1");
        Ok(conn
            .query_row(&sql, params![number], row_to_record)
            .optional()?)
    }

    fn upsert_record(&self, record: &Record) -> Result<(), StoreError> {
        let mut record = record.clone();
        record.normalize_sent_at();

        let conn = self.lock()?;
        // notification_sent is MAX-merged so a stale write cannot revert it.
        conn.execute(
            "INSERT INTO records (number, title, has_notification, last_checked_at, \
                 notification_sent, notification_sent_at, notification_details, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?4) \
             ON CONFLICT(number) DO UPDATE SET \
                 title = excluded.title, \
                 has_notification = excluded.has_notification, \
                 last_checked_at = excluded.last_checked_at, \
                 notification_sent = MAX(records.notification_sent, excluded.notification_sent), \
                 notification_sent_at = COALESCE(excluded.notification_sent_at, records.notification_sent_at), \
                 notification_details = excluded.notification_details",
            params![
                record.number,
                record.title,
                record.has_notification,
                record.last_checked_at,
                record.notification_sent,
                record.notification_sent_at,
                record.notification_details,
            ],
        )?;
        Ok(())
    }

    fn append_run(&self, run: &VerificationRun) -> Result<(), StoreError> {
        let errors = serde_json::to_string(&run.errors)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO verification_runs (id, timestamp, duration_ms, records_observed, \
                 new_notifications, notifications_delivered, errors, success) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.id,
                run.timestamp,
                i64::try_from(run.duration_ms).unwrap_or(i64::MAX),
                run.records_observed as i64,
                run.new_notifications as i64,
                run.notifications_delivered as i64,
                errors,
                run.success,
            ],
        )?;
        Ok(())
    }

    fn pending_unsent(&self) -> Result<Vec<Record>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records \
             WHERE has_notification = 1 AND notification_sent = 0 ORDER BY number"
        );
        Self::query_records(&conn, &sql, [])
    }

    fn list_records(&self) -> Result<Vec<Record>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY number");
        Self::query_records(&conn, &sql, [])
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<VerificationRun>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {RUN_COLUMNS} FROM verification_runs ORDER BY seq DESC LIMIT ?1");
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], row_to_run)?;
        let mut runs = Vec::new();
        for r in rows {
            runs.push(r?);
        }
        Ok(runs)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.lock()?;
        let stats = conn.query_row(
            "SELECT COUNT(*), \
                 COALESCE(SUM(has_notification), 0), \
                 COALESCE(SUM(CASE WHEN has_notification = 1 AND notification_sent = 0 THEN 1 ELSE 0 END), 0), \
                 COALESCE(SUM(notification_sent), 0) \
             FROM records",
            [],
            |row| {
                Ok(StoreStats {
                    total_records: count(row.get(0)?),
                    with_notification: count(row.get(1)?),
                    pending_unsent: count(row.get(2)?),
                    sent: count(row.get(3)?),
                })
            },
        )?;
        Ok(stats)
    }

    fn reset(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch("DELETE FROM records; DELETE FROM verification_runs;")?;
        Ok(())
    }
}

fn count(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        number: row.get(0)?,
        title: row.get(1)?,
        has_notification: row.get(2)?,
        last_checked_at: row.get(3)?,
        notification_sent: row.get(4)?,
        notification_sent_at: row.get(5)?,
        notification_details: row.get(6)?,
    })
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<VerificationRun> {
    let errors_json: String = row.get(6)?;
    let errors: Vec<String> = serde_json::from_str(&errors_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let duration_ms: i64 = row.get(2)?;
    let records_observed: i64 = row.get(3)?;
    let new_notifications: i64 = row.get(4)?;
    let notifications_delivered: i64 = row.get(5)?;
    Ok(VerificationRun {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        duration_ms: u64::try_from(duration_ms).unwrap_or(0),
        records_observed: usize::try_from(records_observed).unwrap_or(0),
        new_notifications: usize::try_from(new_notifications).unwrap_or(0),
        notifications_delivered: usize::try_from(notifications_delivered).unwrap_or(0),
        errors,
        success: row.get(7)?,
    })
}
