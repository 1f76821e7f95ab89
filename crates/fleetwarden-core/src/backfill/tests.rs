use super::*;
use crate::store::{paths, DocumentStore, MemoryStore};
use fleetwarden_types::models::{BackfillConfig, BackfillMeta, BackfillStatus};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct StaticDirectory {
    accounts: Vec<String>,
}

#[async_trait::async_trait]
impl AccountDirectory for StaticDirectory {
    async fn connected_accounts(&self) -> Vec<String> {
        self.accounts.clone()
    }
}

struct CountingRunner {
    runs: Mutex<Vec<String>>,
    fail: bool,
}

impl CountingRunner {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self { runs: Mutex::new(Vec::new()), fail })
    }

    fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }
}

#[async_trait::async_trait]
impl BackfillRunner for CountingRunner {
    async fn run(&self, account_id: &str) -> Result<BackfillStats, String> {
        self.runs.lock().push(account_id.to_string());
        if self.fail {
            Err("history fetch failed".to_string())
        } else {
            Ok(BackfillStats { threads: 1, messages: 5, errors: 0, duration_ms: 0 })
        }
    }
}

fn scheduler_with(
    store: Arc<MemoryStore>,
    runner: Arc<CountingRunner>,
    accounts: &[&str],
    config: BackfillConfig,
) -> Arc<BackfillScheduler> {
    BackfillScheduler::new(
        config,
        "instance-1".to_string(),
        store,
        runner,
        Arc::new(StaticDirectory { accounts: accounts.iter().map(|s| s.to_string()).collect() }),
    )
}

fn fast_config() -> BackfillConfig {
    BackfillConfig {
        interval_ms: 60_000,
        lease_ms: 60_000,
        success_cooldown_ms: 3_600_000,
        attempt_backoff_ms: 600_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_lock_acquire_release_cycle() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let lock = BackfillLock::new(Arc::clone(&store));

    assert!(lock.acquire("acc1", "instance-1", Duration::from_secs(60)).await);
    match lock.check("acc1").await {
        LockStatus::Held { owner_id, .. } => assert_eq!(owner_id, "instance-1"),
        LockStatus::Free => panic!("lock must be held"),
    }

    lock.release("acc1").await;
    assert!(matches!(lock.check("acc1").await, LockStatus::Free));
    assert!(lock.acquire("acc1", "instance-2", Duration::from_secs(60)).await);
}

#[tokio::test]
async fn test_held_lease_refuses_second_owner() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let lock = BackfillLock::new(Arc::clone(&store));

    assert!(lock.acquire("acc1", "instance-1", Duration::from_secs(60)).await);
    assert!(!lock.acquire("acc1", "instance-2", Duration::from_secs(60)).await);
    // A different account is unaffected
    assert!(lock.acquire("acc2", "instance-2", Duration::from_secs(60)).await);
}

#[tokio::test]
async fn test_expired_lease_is_logically_absent() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let lock = BackfillLock::new(Arc::clone(&store));

    // Plant an expired lease directly
    store
        .set(
            &paths::backfill_lock("acc1"),
            json!({
                "owner_id": "instance-0",
                "lease_expiry_ms": crate::now_ms() - 1_000,
                "started_at_ms": crate::now_ms() - 120_000,
            }),
            false,
        )
        .await
        .expect("seed lock");

    assert!(matches!(lock.check("acc1").await, LockStatus::Free));
    assert!(lock.acquire("acc1", "instance-2", Duration::from_secs(60)).await);
}

#[tokio::test]
async fn test_concurrent_acquires_have_one_winner() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let lock = Arc::new(BackfillLock::new(Arc::clone(&store)));

    let mut handles = Vec::new();
    for i in 0..8 {
        let lock = Arc::clone(&lock);
        handles.push(tokio::spawn(async move {
            lock.acquire("acc1", &format!("instance-{i}"), Duration::from_secs(60)).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("join") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one concurrent acquire may win");
}

#[tokio::test]
async fn test_run_writes_terminal_status_and_releases() {
    let store = Arc::new(MemoryStore::new());
    let runner = CountingRunner::new(false);
    let scheduler =
        scheduler_with(Arc::clone(&store), runner.clone(), &["acc1"], fast_config());

    let outcome = scheduler.run_for_account("acc1", false).await;
    assert!(matches!(outcome, RunOutcome::Ran { .. }));
    assert_eq!(runner.runs(), vec!["acc1"]);

    let meta = scheduler.load_meta("acc1").await.expect("meta written");
    assert!(meta.last_attempt_ms.is_some());
    assert!(meta.last_success_ms.is_some());
    match meta.last_status.expect("status") {
        BackfillStatus::Ok { stats } => assert_eq!(stats.messages, 5),
        other => panic!("expected ok status, got {other:?}"),
    }

    // Lease released unconditionally on exit
    let lock = BackfillLock::new(store);
    assert!(matches!(lock.check("acc1").await, LockStatus::Free));
}

#[tokio::test]
async fn test_failed_run_records_error_and_releases() {
    let store = Arc::new(MemoryStore::new());
    let runner = CountingRunner::new(true);
    let scheduler =
        scheduler_with(Arc::clone(&store), runner.clone(), &["acc1"], fast_config());

    let outcome = scheduler.run_for_account("acc1", false).await;
    match outcome {
        RunOutcome::Failed { error, .. } => assert!(error.contains("history fetch failed")),
        other => panic!("expected failure, got {other:?}"),
    }

    let meta = scheduler.load_meta("acc1").await.expect("meta");
    assert!(meta.last_success_ms.is_none());
    match meta.last_status.expect("status") {
        BackfillStatus::Error { error_code, error_message, .. } => {
            assert_eq!(error_code, "backfill_error");
            assert!(error_message.contains("history fetch failed"));
        },
        other => panic!("expected error status, got {other:?}"),
    }

    let lock = BackfillLock::new(store);
    assert!(matches!(lock.check("acc1").await, LockStatus::Free));
}

#[tokio::test]
async fn test_success_cooldown_skips() {
    let store = Arc::new(MemoryStore::new());
    let runner = CountingRunner::new(false);
    let scheduler = scheduler_with(Arc::clone(&store), runner.clone(), &["acc1"], fast_config());

    assert!(matches!(scheduler.run_for_account("acc1", false).await, RunOutcome::Ran { .. }));
    // Second run immediately after: inside the success cooldown
    match scheduler.run_for_account("acc1", false).await {
        RunOutcome::Skipped(reason) => assert_eq!(reason, SkipReason::SuccessCooldown),
        other => panic!("expected cooldown skip, got {other:?}"),
    }
    assert_eq!(runner.runs().len(), 1);
}

#[tokio::test]
async fn test_attempt_backoff_skips_after_failure() {
    let store = Arc::new(MemoryStore::new());
    let runner = CountingRunner::new(true);
    let scheduler = scheduler_with(Arc::clone(&store), runner.clone(), &["acc1"], fast_config());

    assert!(matches!(scheduler.run_for_account("acc1", false).await, RunOutcome::Failed { .. }));
    match scheduler.run_for_account("acc1", false).await {
        RunOutcome::Skipped(reason) => assert_eq!(reason, SkipReason::AttemptBackoff),
        other => panic!("expected backoff skip, got {other:?}"),
    }
}

#[tokio::test]
async fn test_initial_run_ignores_cooldowns() {
    let store = Arc::new(MemoryStore::new());
    let runner = CountingRunner::new(false);
    let scheduler = scheduler_with(Arc::clone(&store), runner.clone(), &["acc1"], fast_config());

    assert!(matches!(scheduler.run_for_account("acc1", false).await, RunOutcome::Ran { .. }));
    // An initial (connect-triggered) run bypasses cooldown/backoff
    assert!(matches!(scheduler.run_for_account("acc1", true).await, RunOutcome::Ran { .. }));
    assert_eq!(runner.runs().len(), 2);
}

#[tokio::test]
async fn test_lease_busy_skips() {
    let store = Arc::new(MemoryStore::new());
    let runner = CountingRunner::new(false);
    let scheduler = scheduler_with(Arc::clone(&store), runner.clone(), &["acc1"], fast_config());

    let store_dyn: Arc<dyn DocumentStore> = Arc::clone(&store) as Arc<dyn DocumentStore>;
    let lock = BackfillLock::new(store_dyn);
    assert!(lock.acquire("acc1", "other-instance", Duration::from_secs(60)).await);

    match scheduler.run_for_account("acc1", false).await {
        RunOutcome::Skipped(reason) => assert_eq!(reason, SkipReason::LeaseBusy),
        other => panic!("expected lease skip, got {other:?}"),
    }
    assert!(runner.runs().is_empty());
}

#[tokio::test]
async fn test_persisted_running_status_skips() {
    let store = Arc::new(MemoryStore::new());
    let runner = CountingRunner::new(false);
    let scheduler = scheduler_with(Arc::clone(&store), runner.clone(), &["acc1"], fast_config());

    let meta = BackfillMeta {
        last_attempt_ms: None,
        last_success_ms: None,
        last_status: Some(BackfillStatus::Running {
            holder: "other-instance".to_string(),
            started_at_ms: crate::now_ms(),
        }),
    };
    store
        .set(&paths::backfill_meta("acc1"), serde_json::to_value(&meta).expect("encode"), false)
        .await
        .expect("seed meta");

    match scheduler.run_for_account("acc1", false).await {
        RunOutcome::Skipped(reason) => assert_eq!(reason, SkipReason::AlreadyRunning),
        other => panic!("expected running skip, got {other:?}"),
    }
}

#[tokio::test]
async fn test_tick_orders_by_staleness_and_caps_batch() {
    let store = Arc::new(MemoryStore::new());
    let runner = CountingRunner::new(false);
    let mut config = fast_config();
    config.max_accounts_per_tick = 2;
    let scheduler = scheduler_with(
        Arc::clone(&store),
        runner.clone(),
        &["fresh", "stale", "middle"],
        config,
    );

    let now = crate::now_ms();
    for (account, age_ms) in [("fresh", 0i64), ("middle", 7_200_000), ("stale", 86_400_000)] {
        let meta = BackfillMeta {
            last_attempt_ms: Some(now - age_ms - 7_200_000),
            last_success_ms: Some(now - age_ms - 7_200_000),
            last_status: None,
        };
        store
            .set(
                &paths::backfill_meta(account),
                serde_json::to_value(&meta).expect("encode"),
                false,
            )
            .await
            .expect("seed meta");
    }

    scheduler.tick().await;

    // Only the two stalest accounts ran, stalest first
    assert_eq!(runner.runs(), vec!["stale", "middle"]);
}
