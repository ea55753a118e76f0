//! Outbound notification channel.

pub mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::detector::Classification;
use crate::store::{Record, StoreStats};

pub use telegram::{TelegramConfig, TelegramNotifier};

/// Why a record is being delivered.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub run_id: String,
    pub classification: Classification,
    pub detected_at: DateTime<Utc>,
}

/// Details attached to a failure alert.
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub run_id: String,
    pub at: DateTime<Utc>,
    /// Every error the failed run collected.
    pub errors: Vec<String>,
}

/// Delivery channel for docket notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Stable identifier used in logs.
    fn id(&self) -> &'static str;

    /// Deliver one notification. `Ok` means the channel confirmed receipt.
    async fn send(&self, record: &Record, context: &DispatchContext) -> anyhow::Result<()>;

    /// Loud alert for a failed run.
    async fn alert(&self, _message: &str, _context: &AlertContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Summary sent after a run that delivered notifications.
    async fn status_report(&self, _stats: &StoreStats) -> anyhow::Result<()> {
        Ok(())
    }
}
