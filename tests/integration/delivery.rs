//! Delivery guarantees across consecutive cycles.

use std::sync::atomic::Ordering;

use chrono::Utc;
use docket_watch::portal::Snapshot;
use docket_watch::{MonitorSettings, Record, RepeatPolicy, StateStore};

use crate::helpers::{Harness, fast_monitor_settings, observed};

fn seed_sent(h: &Harness, number: &str, details: &str) {
    let mut record = Record::new(number, format!("Caratula {number}"), Utc::now());
    record.has_notification = true;
    record.notification_details = Some(details.to_owned());
    record.mark_sent(Utc::now());
    h.store.upsert_record(&record).unwrap();
}

#[tokio::test]
async fn flagged_record_is_delivered_once_across_cycles() {
    let h = Harness::new();
    h.scraper.push(vec![observed("100/2024", true)]);

    for _ in 0..4 {
        assert!(h.cycle().await.success);
    }

    assert_eq!(h.notifier.sent(), vec!["100/2024".to_owned()]);
    let runs = h.monitor.history(10).unwrap();
    assert_eq!(runs.len(), 4);
    assert_eq!(runs.iter().map(|r| r.notifications_delivered).sum::<usize>(), 1);
}

#[tokio::test]
async fn failed_delivery_is_retried_next_cycle() {
    let h = Harness::new();
    h.notifier.fail.store(true, Ordering::SeqCst);
    h.scraper.push(vec![observed("200/2024", true)]);

    let first = h.cycle().await;
    assert_eq!(first.notifications_delivered, 0);
    assert_eq!(first.new_notifications, 1);

    h.notifier.fail.store(false, Ordering::SeqCst);
    let second = h.cycle().await;
    assert_eq!(second.notifications_delivered, 1);
    assert_eq!(second.new_notifications, 0, "a retry is not a new notification");
    assert!(h.record("200/2024").notification_sent);

    let third = h.cycle().await;
    assert_eq!(third.notifications_delivered, 0);
    assert_eq!(h.notifier.sent(), vec!["200/2024".to_owned()]);
}

#[tokio::test]
async fn pending_record_missing_from_scrape_is_still_retried() {
    let h = Harness::new();
    h.notifier.fail.store(true, Ordering::SeqCst);
    h.scraper.push(vec![observed("300/2024", true)]);
    h.cycle().await;

    let before = h.record("300/2024").last_checked_at;
    h.notifier.fail.store(false, Ordering::SeqCst);
    h.scraper.push(Vec::new());
    let run = h.cycle().await;

    assert_eq!(run.records_observed, 0);
    assert_eq!(run.notifications_delivered, 1);
    let stored = h.record("300/2024");
    assert!(stored.notification_sent);
    assert_eq!(stored.last_checked_at, before, "not observed, so not re-checked");
}

#[tokio::test]
async fn sent_flag_survives_a_cleared_portal_flag() {
    let h = Harness::new();
    h.scraper.push(vec![observed("100/2024", true)]);
    h.cycle().await;

    h.scraper.push(vec![observed("100/2024", false)]);
    h.cycle().await;

    let stored = h.record("100/2024");
    assert!(!stored.has_notification);
    assert!(stored.notification_sent);
    assert!(stored.notification_sent_at.is_some());
}

#[tokio::test]
async fn failed_reflag_after_clear_is_retried() {
    let h = Harness::new();
    h.scraper.push(vec![observed("100/2024", true)]);
    assert_eq!(h.cycle().await.notifications_delivered, 1);

    h.scraper.push(vec![observed("100/2024", false)]);
    h.cycle().await;

    h.notifier.fail.store(true, Ordering::SeqCst);
    h.scraper.push(vec![observed("100/2024", true)]);
    let failed = h.cycle().await;
    assert_eq!(failed.new_notifications, 1);
    assert_eq!(failed.notifications_delivered, 0);

    h.notifier.fail.store(false, Ordering::SeqCst);
    let retried = h.cycle().await;
    assert_eq!(retried.notifications_delivered, 1);
    assert_eq!(
        h.notifier.sent(),
        vec!["100/2024".to_owned(), "100/2024".to_owned()]
    );
    assert!(h.record("100/2024").has_notification);
}

#[tokio::test]
async fn unflagged_record_is_discovered_without_delivery() {
    let h = Harness::new();
    h.scraper.push(vec![observed("400/2024", false)]);
    let run = h.cycle().await;

    assert_eq!(run.new_notifications, 0);
    assert!(h.notifier.sent().is_empty());
    let stored = h.record("400/2024");
    assert!(!stored.has_notification);
    assert!(!stored.notification_sent);

    h.scraper.push(vec![observed("400/2024", true)]);
    let run = h.cycle().await;
    assert_eq!(run.new_notifications, 1);
    assert_eq!(h.notifier.sent(), vec!["400/2024".to_owned()]);
}

#[tokio::test]
async fn changed_details_on_sent_record_trigger_repeat() {
    let h = Harness::new();
    seed_sent(&h, "500/2024", "notificación 1 del 01022024");
    h.scraper.push(vec![
        observed("500/2024", true).with_details("notificación 2 del 05022024"),
    ]);

    let run = h.cycle().await;

    assert_eq!(run.new_notifications, 1);
    assert_eq!(h.notifier.sent(), vec!["500/2024".to_owned()]);
    assert_eq!(
        h.record("500/2024").notification_details.as_deref(),
        Some("notificación 2 del 05022024")
    );

    h.cycle().await;
    assert_eq!(h.notifier.sent().len(), 1, "same details, no second repeat");
}

#[tokio::test]
async fn repeat_policy_never_ignores_changed_details() {
    let h = Harness::with_settings(MonitorSettings {
        repeat_policy: RepeatPolicy::Never,
        ..fast_monitor_settings()
    });
    seed_sent(&h, "500/2024", "notificación 1 del 01022024");
    h.scraper.push(vec![
        observed("500/2024", true).with_details("notificación 2 del 05022024"),
    ]);

    let run = h.cycle().await;
    assert_eq!(run.new_notifications, 0);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn duplicate_keys_in_one_scrape_dispatch_once() {
    let h = Harness::new();
    h.scraper.push(vec![
        observed("600/2024", false),
        observed("600/2024", true),
        observed("601/2024", false),
    ]);

    let run = h.cycle().await;

    assert_eq!(run.notifications_delivered, 1);
    assert_eq!(h.notifier.sent(), vec!["600/2024".to_owned()]);
    assert_eq!(h.store.list_records().unwrap().len(), 2);
}

#[tokio::test]
async fn item_errors_are_collected_without_failing() {
    let h = Harness::new();
    h.scraper.push_snapshot(Snapshot {
        records: vec![observed("700/2024", true)],
        errors: vec!["item 3: missing numeroExpediente".to_owned()],
    });

    let run = h.cycle().await;

    assert!(run.success);
    assert_eq!(run.errors, vec!["item 3: missing numeroExpediente".to_owned()]);
    assert_eq!(run.notifications_delivered, 1);
}
