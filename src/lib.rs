//! docket-watch: periodic court-portal monitor that delivers exactly one
//! alert per new docket notification.
//!
//! # Architecture
//!
//! One verification cycle runs at a time:
//! - **Session**: reuse or re-establish the portal login ([`session`])
//! - **Scrape**: read the notification inbox ([`portal`])
//! - **Detect**: classify records against stored state ([`detector`])
//! - **Dispatch**: notify and durably mark delivery ([`dispatcher`], [`notify`])
//! - **Record**: append the run and update counters ([`monitor`], [`store`])

pub mod app_dirs;
pub mod config;
pub mod credentials;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod portal;
pub mod session;
pub mod store;

pub use config::MonitorConfig;
pub use detector::{Classification, RepeatPolicy};
pub use error::{MonitorError, Result};
pub use monitor::{CycleOutcome, Monitor, MonitorSettings, MonitorStatus};
pub use store::{Record, StateStore, StoreStats, VerificationRun};
