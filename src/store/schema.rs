//! SQLite DDL for the docket state database.

use rusqlite::Connection;

/// Complete DDL. Uses `IF NOT EXISTS` throughout so `apply_schema` is
/// idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- One row per docket number.
CREATE TABLE IF NOT EXISTS records (
    number               TEXT PRIMARY KEY,
    title                TEXT NOT NULL,
    has_notification     INTEGER NOT NULL DEFAULT 0,
    last_checked_at      TEXT NOT NULL,
    notification_sent    INTEGER NOT NULL DEFAULT 0,
    notification_sent_at TEXT,
    notification_details TEXT,
    created_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_pending
    ON records(has_notification, notification_sent);

-- Append-only run history.
CREATE TABLE IF NOT EXISTS verification_runs (
    seq                     INTEGER PRIMARY KEY AUTOINCREMENT,
    id                      TEXT NOT NULL UNIQUE,
    timestamp               TEXT NOT NULL,
    duration_ms             INTEGER NOT NULL,
    records_observed        INTEGER NOT NULL,
    new_notifications       INTEGER NOT NULL,
    notifications_delivered INTEGER NOT NULL,
    errors                  TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
    success                 INTEGER NOT NULL
);
"#;

/// Apply the schema and seed the version stamp on a fresh database.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![super::types::CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the stored schema version, if any.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let value: String = row.get(0)?;
            Ok(value.parse().ok())
        }
        None => Ok(None),
    }
}
