//! Session reuse across cycles and process restarts, and durable state
//! across restarts.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use docket_watch::Monitor;
use docket_watch::session::{ArtifactFile, SessionManager};
use docket_watch::store::SqliteStateStore;

use crate::helpers::{
    FakeAuth, FakeNotifier, FakeScraper, FlakyStore, Harness, fast_monitor_settings,
    fast_session_settings, observed,
};

#[tokio::test]
async fn valid_session_is_reused_between_cycles() {
    let h = Harness::new();
    h.scraper.push(vec![observed("100/2024", false)]);

    for _ in 0..3 {
        assert!(h.cycle().await.success);
    }

    assert_eq!(h.auth.logins.load(Ordering::SeqCst), 1);
    assert_eq!(h.auth.probes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rejected_session_triggers_fresh_login() {
    let h = Harness::new();
    h.cycle().await;
    h.auth.reject_probe.store(true, Ordering::SeqCst);

    let run = h.cycle().await;

    assert!(run.success);
    assert_eq!(h.auth.logins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn session_expired_mid_scrape_forces_login_next_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let artifact_path = dir.path().join("cookies.json");
    let h = Harness::build(
        fast_monitor_settings(),
        Some(ArtifactFile::new(&artifact_path)),
        Arc::new(FlakyStore::default()),
    );
    h.scraper.push(vec![observed("100/2024", false)]);
    assert!(h.cycle().await.success);
    assert!(artifact_path.exists());

    h.scraper.expire.store(true, Ordering::SeqCst);
    let expired = h.cycle().await;
    assert!(!expired.success);
    assert!(expired.errors.iter().any(|e| e.contains("session expired")));
    assert!(!artifact_path.exists(), "expired artifact is discarded");

    h.scraper.expire.store(false, Ordering::SeqCst);
    assert!(h.cycle().await.success);
    assert_eq!(h.auth.logins.load(Ordering::SeqCst), 2);
    assert_eq!(h.auth.probes.load(Ordering::SeqCst), 1, "a dropped session is not revalidated");
}

#[tokio::test]
async fn persisted_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let artifact_path = dir.path().join("session").join("cookies.json");

    let first = Harness::build(
        fast_monitor_settings(),
        Some(ArtifactFile::new(&artifact_path)),
        Arc::new(FlakyStore::default()),
    );
    assert!(first.cycle().await.success);
    first.monitor.shutdown().await;
    assert_eq!(first.auth.logins.load(Ordering::SeqCst), 1);
    assert!(artifact_path.exists(), "shutdown keeps the artifact");

    let second = Harness::build(
        fast_monitor_settings(),
        Some(ArtifactFile::new(&artifact_path)),
        Arc::new(FlakyStore::default()),
    );
    assert!(second.cycle().await.success);
    assert_eq!(second.auth.logins.load(Ordering::SeqCst), 0);
    assert_eq!(second.auth.probes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sqlite_state_prevents_redelivery_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db").join("docket-watch.db");
    let notifier = Arc::new(FakeNotifier::default());

    for _ in 0..2 {
        let auth = Arc::new(FakeAuth::default());
        let scraper = Arc::new(FakeScraper::default());
        scraper.push(vec![observed("100/2024", true), observed("101/2024", false)]);
        let store = Arc::new(SqliteStateStore::open(&db_path).unwrap());
        let monitor = Monitor::new(
            fast_monitor_settings(),
            SessionManager::new(auth, None, fast_session_settings()),
            scraper,
            store,
            Some(notifier.clone()),
        );
        let outcome = monitor.run_cycle().await;
        assert!(outcome.run().is_some_and(|r| r.success));
        monitor.shutdown().await;
    }

    assert_eq!(notifier.sent(), vec!["100/2024".to_owned()]);

    let store = SqliteStateStore::open(&db_path).unwrap();
    let monitor = Monitor::new(
        fast_monitor_settings(),
        SessionManager::new(Arc::new(FakeAuth::default()), None, fast_session_settings()),
        Arc::new(FakeScraper::default()),
        Arc::new(store),
        None,
    );
    let stats = monitor.stats().unwrap();
    assert_eq!(stats.total_records, 2);
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.pending_unsent, 0);
    assert_eq!(monitor.history(10).unwrap().len(), 2);
}
