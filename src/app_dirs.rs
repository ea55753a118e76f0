//! Centralized application directory paths for docket-watch.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data | `~/Library/Application Support/docket-watch/` | `~/.local/share/docket-watch/` |
//! | Config | `~/Library/Application Support/docket-watch/` | `~/.config/docket-watch/` |
//!
//! # Environment Overrides
//!
//! - `DOCKET_WATCH_DATA_DIR`: overrides [`data_dir`]
//! - `DOCKET_WATCH_CONFIG_DIR`: overrides [`config_dir`]

use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "docket-watch";

/// Application data root directory.
///
/// Holds the SQLite state database, the persisted session artifact, and logs.
#[must_use]
pub fn data_dir() -> PathBuf {
    resolve_dir(
        std::env::var_os("DOCKET_WATCH_DATA_DIR"),
        dirs::data_dir(),
        "/tmp/docket-watch-data",
    )
}

/// Application config directory (`config.toml` lives here).
#[must_use]
pub fn config_dir() -> PathBuf {
    resolve_dir(
        std::env::var_os("DOCKET_WATCH_CONFIG_DIR"),
        dirs::config_dir(),
        "/tmp/docket-watch-config",
    )
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// State database path (`data_dir()/db/docket-watch.db`).
#[must_use]
pub fn database_file() -> PathBuf {
    data_dir().join("db").join("docket-watch.db")
}

/// Persisted session artifact path (`data_dir()/session/cookies.json`).
#[must_use]
pub fn session_artifact_file() -> PathBuf {
    data_dir().join("session").join("cookies.json")
}

fn resolve_dir(override_dir: Option<OsString>, base: Option<PathBuf>, fallback: &str) -> PathBuf {
    if let Some(dir) = override_dir {
        return PathBuf::from(dir);
    }
    base.map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(fallback))
}
