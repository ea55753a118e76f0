//! Periodic driver and graceful shutdown.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Monitor, after_interval};

/// Shortest period the loop will tick at.
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

impl Monitor {
    /// Spawn the periodic loop. Ticks route through [`run_cycle`](Self::run_cycle),
    /// so a tick that lands on a running manual cycle is skipped.
    ///
    /// The loop stops when `cancel` fires; a cycle already running is
    /// allowed to finish. A zero interval is raised to one second.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        let configured = monitor.settings.check_interval;
        let period = configured.max(MIN_CHECK_INTERVAL);
        if period != configured {
            warn!(
                configured_ms = u64::try_from(configured.as_millis()).unwrap_or(u64::MAX),
                "check interval too short, using {}s",
                period.as_secs()
            );
        }
        let run_on_start = monitor.settings.run_on_start;

        monitor.with_status(|s| {
            s.is_running = true;
            let now = Utc::now();
            s.next_check = Some(if run_on_start {
                now
            } else {
                after_interval(now, period)
            });
        });

        tokio::spawn(async move {
            info!(
                interval_secs = period.as_secs(),
                run_on_start, "monitor started"
            );
            let first_tick = if run_on_start {
                tokio::time::Instant::now()
            } else {
                tokio::time::Instant::now() + period
            };
            let mut interval = tokio::time::interval_at(first_tick, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let outcome = monitor.run_cycle().await;
                        if outcome.is_skipped() {
                            info!("scheduled tick skipped, cycle already running");
                        }
                    }
                }
            }

            monitor.with_status(|s| s.is_running = false);
            info!("monitor loop stopped");
        })
    }

    /// Wait for any in-flight cycle, then release the session.
    pub async fn shutdown(&self) {
        self.with_status(|s| s.is_running = false);
        loop {
            let notified = self.cycle_done.notified();
            if !self.is_verifying.load(Ordering::Acquire) {
                break;
            }
            info!("waiting for in-flight verification to finish");
            notified.await;
        }
        self.session.lock().await.close();
        info!("monitor shut down");
    }
}
