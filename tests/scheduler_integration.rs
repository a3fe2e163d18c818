//! Integration tests for the scheduling loop
//!
//! These tests verify the complete workflow of:
//! - Cooldown arming and expiry across ticks
//! - Rate-limit retries and proxy failover
//! - Suspension and startup preconditions
//! - File-backed stores surviving a restart

mod common;

use chrono::TimeDelta;
use std::time::Duration;

use common::{harness, start_time, try_harness, ScriptedExecutor, CYCLE};
use cycler::config::Config;
use cycler::error::{CyclerErrorTrait, ErrorCategory};
use cycler::models::TaskOutcome;
use cycler::scheduler::{FailureReason, Scheduler, SchedulerError, SchedulerEvent};
use cycler::storage::ProxyPoolStore;

// ============================================================================
// Cooldown Behavior
// ============================================================================

#[tokio::test]
async fn test_identities_without_windows_are_dispatched() {
    let mut h = harness(&["a", "b", "c"], &[], &[]);

    let report = h.scheduler.tick().await;

    assert_eq!(report.dispatched, 3);
    assert_eq!(report.succeeded, 3);
    let order: Vec<String> = h.executor.calls().into_iter().map(|(k, _)| k).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_success_arms_cooldown_for_one_cycle() {
    let mut h = harness(&["a"], &[], &[]);

    h.scheduler.tick().await;
    let window = h.scheduler.cooldowns().get("a").unwrap().clone();
    assert_eq!(window.start_time, start_time());
    assert_eq!(window.end_time, start_time() + TimeDelta::seconds(600));

    h.clock.advance(Duration::from_secs(599));
    let report = h.scheduler.tick().await;
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.cooling, 1);

    h.clock.advance(Duration::from_secs(1));
    let report = h.scheduler.tick().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(h.executor.calls().len(), 2);
}

#[tokio::test]
async fn test_failure_leaves_cooldown_untouched_and_stays_due() {
    let mut h = harness(&["a"], &[], &[]);
    h.executor
        .push("a", [TaskOutcome::OtherFailure("HTTP 500".to_string())]);
    let saves_before = h.cooldowns.saves();

    let report = h.scheduler.tick().await;
    assert_eq!(report.failed, 1);
    assert!(h.scheduler.cooldowns().get("a").is_none());
    assert_eq!(h.cooldowns.saves(), saves_before);

    // Immediately due again on the next tick
    let report = h.scheduler.tick().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn test_expired_window_rearms_once_while_failing() {
    let mut h = harness(&["a"], &[], &[]);
    h.scheduler.tick().await;

    h.clock.advance(CYCLE);
    h.executor.push(
        "a",
        (0..10).map(|_| TaskOutcome::OtherFailure("HTTP 500".to_string())),
    );
    let saves_before = h.cooldowns.saves();

    for _ in 0..10 {
        let report = h.scheduler.tick().await;
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.failed, 1);
        h.clock.advance(Duration::from_secs(1));
    }

    // Only the first observation of expiry was written
    assert_eq!(h.cooldowns.saves(), saves_before + 1);
    assert!(h.scheduler.cooldowns().get("a").unwrap().pending);
}

#[tokio::test]
async fn test_cooldown_persist_failure_keeps_loop_running() {
    let mut h = harness(&["a", "b"], &[], &[]);
    h.cooldowns.set_fail_saves(true);
    let mut events = h.scheduler.subscribe();

    let report = h.scheduler.tick().await;
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.succeeded, 2);

    // In-memory windows still hold both identities back
    let report = h.scheduler.tick().await;
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.cooling, 2);
    assert_eq!(h.executor.calls().len(), 2);

    let cooling: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            SchedulerEvent::Cooling { key, .. } => Some(key),
            _ => None,
        })
        .collect();
    assert_eq!(cooling, vec!["a", "b"]);
}

// ============================================================================
// Failover Scenarios
// ============================================================================

#[tokio::test]
async fn test_proxy_failure_swaps_in_backup_then_arms() {
    let mut h = harness(&["A"], &["http://p1:8080"], &["http://p2:8080"]);
    h.executor
        .push("A", [TaskOutcome::ProxyFailure("connection reset".to_string())]);

    let report = h.scheduler.tick().await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(
        h.executor.calls_for("A"),
        vec![
            Some("http://p1:8080".to_string()),
            Some("http://p2:8080".to_string())
        ]
    );
    assert_eq!(h.active.lines(), vec!["http://p2:8080".to_string()]);
    assert!(h.reserve.lines().is_empty());

    let window = h.scheduler.cooldowns().get("A").unwrap();
    assert_eq!(window.end_time, start_time() + TimeDelta::seconds(600));
}

#[tokio::test]
async fn test_unsupported_proxy_line_is_replaced_from_reserve() {
    let mut h = harness(&["A"], &["10.0.0.1:8080"], &["http://p2:8080"]);
    h.executor
        .push("A", [TaskOutcome::ProxyFailure("connection reset".to_string())]);

    let report = h.scheduler.tick().await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(
        h.executor.calls_for("A"),
        vec![None, Some("http://p2:8080".to_string())]
    );
    assert_eq!(h.active.lines(), vec!["http://p2:8080".to_string()]);
    assert!(h.reserve.lines().is_empty());
}

#[tokio::test]
async fn test_rate_limited_three_times_fails_without_swap() {
    let mut h = harness(&["A"], &["http://p1:8080"], &["http://p2:8080"]);
    h.executor.push(
        "A",
        [
            TaskOutcome::RateLimited,
            TaskOutcome::RateLimited,
            TaskOutcome::RateLimited,
        ],
    );
    let mut events = h.scheduler.subscribe();

    let report = h.scheduler.tick().await;

    assert_eq!(report.failed, 1);
    assert_eq!(h.executor.calls_for("A").len(), 3);
    assert_eq!(h.active.saves(), 0);
    assert_eq!(h.reserve.lines(), vec!["http://p2:8080".to_string()]);
    assert!(h.scheduler.cooldowns().get("A").is_none());

    let mut failure = None;
    while let Ok(event) = events.try_recv() {
        if let SchedulerEvent::Failed { reason, .. } = event {
            failure = Some(reason);
        }
    }
    assert_eq!(failure, Some(FailureReason::RateLimitExhausted { attempts: 3 }));
}

#[tokio::test]
async fn test_empty_reserve_fails_without_writes() {
    let mut h = harness(&["A"], &["http://p1:8080"], &[]);
    h.executor
        .push("A", [TaskOutcome::ProxyFailure("timeout".to_string())]);

    let report = h.scheduler.tick().await;

    assert_eq!(report.failed, 1);
    assert_eq!(h.active.saves(), 0);
    assert_eq!(h.reserve.saves(), 0);
    assert_eq!(h.active.lines(), vec!["http://p1:8080".to_string()]);
}

#[tokio::test]
async fn test_reserve_topped_up_while_running() {
    let mut h = harness(&["A"], &["http://p1:8080"], &[]);
    h.executor.push(
        "A",
        [
            TaskOutcome::ProxyFailure("timeout".to_string()),
            TaskOutcome::ProxyFailure("timeout".to_string()),
        ],
    );

    let report = h.scheduler.tick().await;
    assert_eq!(report.failed, 1);

    h.reserve.push("http://p9:8080");
    let report = h.scheduler.tick().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.active.lines(), vec!["http://p9:8080".to_string()]);
}

// ============================================================================
// Suspension & Preconditions
// ============================================================================

#[tokio::test]
async fn test_suspended_mid_run_is_not_dispatched() {
    let mut h = harness(&["a", "b"], &[], &[]);
    h.scheduler.tick().await;
    assert_eq!(h.executor.calls().len(), 2);

    // Both due again, then one gets suspended
    h.clock.advance(CYCLE);
    h.source.set_suspended("b", true);

    let report = h.scheduler.tick().await;
    assert_eq!(report.suspended, 1);
    assert_eq!(report.dispatched, 1);
    assert_eq!(h.executor.calls_for("b").len(), 1);

    h.source.set_suspended("b", false);
    let report = h.scheduler.tick().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(h.executor.calls_for("b").len(), 2);
}

#[tokio::test]
async fn test_insufficient_proxies_refuses_to_start() {
    let result = try_harness(&["a", "b", "c"], &["http://p1:8080", "http://p2:8080"], &[]);

    assert!(matches!(
        result,
        Err(SchedulerError::InsufficientProxies {
            identities: 3,
            slots: 2
        })
    ));
}

#[tokio::test]
async fn test_no_identities_refuses_to_start() {
    let result = try_harness(&[], &[], &[]);
    assert!(matches!(result, Err(SchedulerError::NoIdentities { .. })));
}

#[tokio::test]
async fn test_direct_slot_marker() {
    let mut h = harness(&["a", "b"], &["http://p1:8080", "direct"], &[]);

    h.scheduler.tick().await;

    assert_eq!(h.executor.calls_for("a"), vec![Some("http://p1:8080".to_string())]);
    assert_eq!(h.executor.calls_for("b"), vec![None]);
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_events_follow_dispatch_order() {
    let mut h = harness(&["a"], &[], &[]);
    let mut events = h.scheduler.subscribe();

    h.scheduler.tick().await;
    h.scheduler.tick().await;

    let received: Vec<SchedulerEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(matches!(received[0], SchedulerEvent::Dispatched { ref key, proxy: None } if key == "a"));
    assert!(matches!(received[1], SchedulerEvent::Succeeded { ref key } if key == "a"));
    assert!(matches!(received[2], SchedulerEvent::TickCompleted(ref r) if r.tick == 1));
    assert!(
        matches!(received[3], SchedulerEvent::Cooling { ref key, remaining } if key == "a" && remaining == CYCLE)
    );
    assert!(matches!(received[4], SchedulerEvent::TickCompleted(ref r) if r.tick == 2));
}

// ============================================================================
// File-backed Stores
// ============================================================================

#[tokio::test]
async fn test_file_backed_run_persists_state() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();

    let mut config = Config::default();
    config.paths.accounts = root.join("accounts_session.yaml");
    config.paths.proxies = root.join("proxies.txt");
    config.paths.backup_proxies = root.join("proxies_backup.txt");
    config.paths.cooldowns = root.join("SUPPORT/COUNTDOWNS/countdowns.json");
    config.scheduler.rate_limit_delay_ms = 0;

    std::fs::write(
        &config.paths.accounts,
        "accounts:\n  - email: a@example.com\n    user_id: \"1\"\n    session_token: t1\n  - email: b@example.com\n    user_id: \"2\"\n    session_token: t2\n",
    )
    .unwrap();
    std::fs::write(&config.paths.proxies, "http://p1:8080\nhttp://p2:8080\n").unwrap();
    std::fs::write(&config.paths.backup_proxies, "http://p3:8080\n").unwrap();

    let executor = std::sync::Arc::new(ScriptedExecutor::new());
    executor.push(
        "b@example.com",
        [TaskOutcome::ProxyFailure("connection refused".to_string())],
    );

    let mut scheduler = Scheduler::from_config(&config, std::sync::Arc::clone(&executor)).unwrap();
    let report = scheduler.tick().await;
    assert_eq!(report.succeeded, 2);
    drop(scheduler);

    // Reload from disk as a restart would
    let pool = ProxyPoolStore::from_files(&config.paths.proxies, &config.paths.backup_proxies).unwrap();
    assert_eq!(pool.get(0).unwrap().url(), "http://p1:8080");
    assert_eq!(pool.get(1).unwrap().url(), "http://p3:8080");
    assert_eq!(pool.reserve_len().unwrap(), 0);

    let cooldowns = std::fs::read_to_string(&config.paths.cooldowns).unwrap();
    assert!(cooldowns.contains("a@example.com"));
    assert!(cooldowns.contains("b@example.com"));
    assert!(cooldowns.contains("endTime"));

    // Restarted scheduler sees both identities cooling
    let mut scheduler = Scheduler::from_config(&config, std::sync::Arc::clone(&executor)).unwrap();
    let report = scheduler.tick().await;
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.cooling, 2);
}

#[tokio::test]
async fn test_startup_errors_are_categorized() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();

    let mut config = Config::default();
    config.paths.accounts = root.join("accounts_session.yaml");
    config.paths.proxies = root.join("proxies.txt");
    config.paths.backup_proxies = root.join("proxies_backup.txt");
    config.paths.cooldowns = root.join("countdowns.json");
    std::fs::write(&config.paths.accounts, "accounts: []\n").unwrap();

    let executor = std::sync::Arc::new(ScriptedExecutor::new());
    let err = match Scheduler::from_config(&config, std::sync::Arc::clone(&executor)) {
        Ok(_) => panic!("empty accounts file must not start"),
        Err(e) => e,
    };
    assert_eq!(err.category(), ErrorCategory::Scheduler);
    assert!(!err.is_recoverable());

    // An unreadable proxy list is a storage problem worth retrying
    std::fs::create_dir_all(&config.paths.proxies).unwrap();
    let err = match Scheduler::from_config(&config, executor) {
        Ok(_) => panic!("unreadable proxy list must not start"),
        Err(e) => e,
    };
    assert_eq!(err.category(), ErrorCategory::Storage);
    assert!(err.is_recoverable());
}
