//! Run bookkeeping, failure handling and the periodic loop.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use docket_watch::{MonitorSettings, StateStore};
use tokio_util::sync::CancellationToken;

use crate::helpers::{FlakyStore, Harness, fast_monitor_settings, observed};

#[tokio::test]
async fn every_finished_cycle_appends_a_run() {
    let h = Harness::new();
    h.scraper.push(vec![observed("100/2024", false)]);

    let first = h.cycle().await;
    let second = h.cycle().await;

    let runs = h.monitor.history(10).unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].id, second.id, "newest first");
    assert_eq!(runs[1].id, first.id);
    assert_ne!(first.id, second.id);

    let status = h.monitor.status();
    assert_eq!(status.total_checks, 2);
    assert_eq!(status.successful_checks, 2);
    assert!(status.last_check.is_some());
    assert!(status.next_check > status.last_check);
}

#[tokio::test]
async fn scrape_failure_fails_run_and_alerts() {
    let h = Harness::new();
    h.scraper.fail.store(true, Ordering::SeqCst);

    let run = h.cycle().await;

    assert!(!run.success);
    assert_eq!(run.records_observed, 0);
    assert!(run.errors.iter().any(|e| e.contains("inbox page did not render")));
    assert_eq!(h.monitor.status().failed_checks, 1);
    assert_eq!(h.notifier.alerts().len(), 1);
    assert_eq!(h.monitor.history(1).unwrap().len(), 1, "failed runs are recorded too");
}

#[tokio::test]
async fn scrape_failure_still_retries_pending_deliveries() {
    let h = Harness::new();
    h.notifier.fail.store(true, Ordering::SeqCst);
    h.scraper.push(vec![observed("200/2024", true)]);
    h.cycle().await;

    h.notifier.fail.store(false, Ordering::SeqCst);
    h.scraper.fail.store(true, Ordering::SeqCst);
    let run = h.cycle().await;

    assert!(!run.success);
    assert_eq!(run.notifications_delivered, 1);
    assert!(h.record("200/2024").notification_sent);
}

#[tokio::test]
async fn scrape_timeout_fails_run() {
    let h = Harness::with_settings(MonitorSettings {
        scrape_timeout: Duration::from_millis(50),
        ..fast_monitor_settings()
    });
    h.scraper.set_delay(Duration::from_millis(500));

    let run = h.cycle().await;

    assert!(!run.success);
    assert!(run.errors.iter().any(|e| e.contains("scrape timed out")));
    assert!(!h.monitor.is_verifying());
}

#[tokio::test]
async fn alerts_can_be_disabled() {
    let h = Harness::with_settings(MonitorSettings {
        alert_on_failure: false,
        ..fast_monitor_settings()
    });
    h.scraper.fail.store(true, Ordering::SeqCst);

    assert!(!h.cycle().await.success);
    assert!(h.notifier.alerts().is_empty());
}

#[tokio::test]
async fn status_report_follows_a_delivering_run() {
    let h = Harness::new();
    h.scraper.push(vec![observed("100/2024", true)]);

    h.cycle().await;
    assert_eq!(h.notifier.reports.load(Ordering::SeqCst), 1);

    h.cycle().await;
    assert_eq!(
        h.notifier.reports.load(Ordering::SeqCst),
        1,
        "quiet runs send no report"
    );
}

#[tokio::test]
async fn store_write_failure_is_fatal() {
    let store = Arc::new(FlakyStore::default());
    let h = Harness::build(fast_monitor_settings(), None, store.clone());
    store.fail_writes.store(true, Ordering::SeqCst);
    h.scraper.push(vec![observed("100/2024", true)]);

    let run = h.cycle().await;

    assert!(!run.success);
    assert!(run.errors.iter().any(|e| e.contains("persistence")));
    assert_eq!(h.monitor.status().failed_checks, 1);
    assert!(h.store.get_record("100/2024").unwrap().is_none());

    store.fail_writes.store(false, Ordering::SeqCst);
    let run = h.cycle().await;
    assert!(run.success);
    assert!(h.record("100/2024").notification_sent);
}

#[tokio::test]
async fn last_error_survives_a_later_success() {
    let h = Harness::new();
    h.scraper.fail.store(true, Ordering::SeqCst);
    h.cycle().await;
    h.scraper.fail.store(false, Ordering::SeqCst);
    h.cycle().await;

    let status = h.monitor.status();
    assert_eq!(status.successful_checks, 1);
    assert_eq!(status.failed_checks, 1);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn loop_runs_on_start_and_stops_on_cancel() {
    let h = Harness::new();
    h.scraper.push(vec![observed("100/2024", true)]);
    let cancel = CancellationToken::new();

    let handle = h.monitor.start(cancel.clone());
    assert!(h.monitor.status().is_running);

    for _ in 0..100 {
        if h.monitor.status().total_checks >= 1 && !h.monitor.is_verifying() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    handle.await.unwrap();
    h.monitor.shutdown().await;

    let status = h.monitor.status();
    assert!(!status.is_running);
    assert_eq!(status.total_checks, 1, "interval is an hour, one tick only");
    assert_eq!(h.notifier.sent(), vec!["100/2024".to_owned()]);
}

#[tokio::test]
async fn zero_interval_loop_still_runs() {
    let h = Harness::with_settings(MonitorSettings {
        check_interval: Duration::ZERO,
        ..fast_monitor_settings()
    });
    h.scraper.push(vec![observed("100/2024", false)]);
    let cancel = CancellationToken::new();

    let handle = h.monitor.start(cancel.clone());
    for _ in 0..100 {
        if h.monitor.status().total_checks >= 1 && !h.monitor.is_verifying() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    handle.await.unwrap();
    h.monitor.shutdown().await;
    assert_eq!(h.monitor.status().total_checks, 1, "clamped period is not a busy loop");
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_cycle() {
    let h = Harness::new();
    h.scraper.set_delay(Duration::from_millis(150));
    h.scraper.push(vec![observed("100/2024", true)]);

    let monitor = h.monitor.clone();
    let cycle = tokio::spawn(async move { monitor.run_cycle().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.monitor.is_verifying());

    h.monitor.shutdown().await;

    assert!(!h.monitor.is_verifying());
    let outcome = cycle.await.unwrap();
    assert!(outcome.run().is_some_and(|r| r.success));
    assert!(h.record("100/2024").notification_sent);
}

#[tokio::test]
async fn manual_trigger_during_loop_cycle_is_skipped() {
    let h = Harness::new();
    h.scraper.set_delay(Duration::from_millis(150));
    let cancel = CancellationToken::new();
    let handle = h.monitor.start(cancel.clone());

    for _ in 0..50 {
        if h.monitor.is_verifying() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.monitor.run_cycle().await.is_skipped());

    cancel.cancel();
    handle.await.unwrap();
    h.monitor.shutdown().await;
    assert_eq!(h.monitor.status().total_checks, 1);
}
