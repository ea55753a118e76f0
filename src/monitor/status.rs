use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::VerificationRun;

/// Counters and timestamps exposed by the monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    /// Periodic loop active.
    pub is_running: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub next_check: Option<DateTime<Utc>>,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub last_error: Option<String>,
}

impl MonitorStatus {
    /// Fold a finished run into the counters.
    ///
    /// `failure` is the error that failed the run; falls back to the first
    /// collected error.
    pub(crate) fn record_run(
        &mut self,
        run: &VerificationRun,
        next_check: DateTime<Utc>,
        failure: Option<String>,
    ) {
        self.next_check = Some(next_check);
        if run.success {
            self.successful_checks += 1;
        } else {
            self.failed_checks += 1;
            self.last_error = failure.or_else(|| run.errors.first().cloned());
        }
    }
}

/// Result of asking for a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was in flight; nothing ran and no counter moved.
    Skipped { at: DateTime<Utc> },
    Finished(VerificationRun),
}

impl CycleOutcome {
    pub fn run(&self) -> Option<&VerificationRun> {
        match self {
            Self::Finished(run) => Some(run),
            Self::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}
