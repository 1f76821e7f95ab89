//! Periodic backfill scheduling across instances.
//!
//! Every tick orders the connected accounts by how stale their last
//! backfill is, takes the top few, and runs them under the distributed
//! lock with a bounded per-instance concurrency. Cooldowns keep
//! freshly-synced accounts out of the rotation; the lock keeps other
//! instances out of in-progress ones.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, error, info, warn};

use fleetwarden_types::models::{BackfillConfig, BackfillMeta, BackfillStats, BackfillStatus};

use super::lock::BackfillLock;
use super::{AccountDirectory, BackfillRunner, SkipReason};
use crate::now_ms;
use crate::store::{self, paths, DocumentStore};

/// Outcome of one per-account run attempt.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Ran { stats: BackfillStats },
    Failed { error: String, duration_ms: u64 },
    Skipped(SkipReason),
}

pub struct BackfillScheduler {
    config: BackfillConfig,
    instance_id: String,
    store: Arc<dyn DocumentStore>,
    lock: BackfillLock,
    runner: Arc<dyn BackfillRunner>,
    directory: Arc<dyn AccountDirectory>,
    in_flight: Mutex<HashSet<String>>,
    active: AtomicUsize,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl BackfillScheduler {
    pub fn new(
        config: BackfillConfig,
        instance_id: String,
        store: Arc<dyn DocumentStore>,
        runner: Arc<dyn BackfillRunner>,
        directory: Arc<dyn AccountDirectory>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);
        Arc::new(Self {
            config,
            instance_id,
            lock: BackfillLock::new(Arc::clone(&store)),
            store,
            runner,
            directory,
            in_flight: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            shutdown_tx,
        })
    }

    /// Start the periodic tick loop. Returns the task handle.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = scheduler.shutdown_tx.subscribe();
        tokio::spawn(async move {
            if !scheduler.config.enabled {
                info!("Backfill scheduler disabled by config");
                return;
            }
            info!(
                interval_ms = scheduler.config.interval_ms,
                max_per_tick = scheduler.config.max_accounts_per_tick,
                max_concurrency = scheduler.config.max_concurrency,
                instance_id = %scheduler.instance_id,
                "Backfill scheduler started"
            );
            let interval = Duration::from_millis(scheduler.config.interval_ms);
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        scheduler.tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Backfill scheduler shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Schedule the one-off initial backfill for a freshly connected
    /// account, after a randomized delay that spreads instance restarts
    /// out instead of stampeding the provider.
    pub fn schedule_initial(self: &Arc<Self>, account_id: &str) {
        if !self.config.enabled {
            return;
        }
        let delay_ms = rand::thread_rng()
            .gen_range(self.config.initial_delay_min_ms..=self.config.initial_delay_max_ms);
        let scheduler = Arc::clone(self);
        let account_id = account_id.to_string();
        debug!(account_id = %account_id, delay_ms, "Initial backfill scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if !scheduler.directory.connected_accounts().await.contains(&account_id) {
                return;
            }
            scheduler.run_for_account(&account_id, true).await;
        });
    }

    /// One scheduler tick: pick the stalest connected accounts and run
    /// them under the concurrency cap.
    pub async fn tick(&self) {
        let connected = self.directory.connected_accounts().await;
        if connected.is_empty() {
            return;
        }

        let mut ordered: Vec<(String, i64)> = Vec::with_capacity(connected.len());
        for account_id in connected {
            let meta = self.load_meta(&account_id).await;
            let last = meta
                .as_ref()
                .and_then(|m| m.last_attempt_ms.or(m.last_success_ms))
                .unwrap_or(0);
            ordered.push((account_id, last));
        }
        ordered.sort_by_key(|&(_, last)| last);

        let eligible: Vec<String> = ordered
            .into_iter()
            .take(self.config.max_accounts_per_tick)
            .map(|(id, _)| id)
            .collect();
        debug!(eligible = eligible.len(), instance_id = %self.instance_id, "Backfill tick");

        for account_id in eligible {
            // Poll the in-process counter instead of blocking the tick
            // on any single execution.
            while self.active.load(Ordering::SeqCst) >= self.config.max_concurrency {
                tokio::time::sleep(Duration::from_millis(2_000)).await;
            }
            let outcome = self.run_for_account(&account_id, false).await;
            if let RunOutcome::Failed { ref error, .. } = outcome {
                error!(account_id = %account_id, error = %error, "Backfill run failed");
            }
        }
    }

    /// Run one account's backfill end to end: eligibility checks, lease,
    /// running status, delegated execution, terminal status, release.
    pub async fn run_for_account(&self, account_id: &str, is_initial: bool) -> RunOutcome {
        if !self.in_flight.lock().insert(account_id.to_string()) {
            debug!(account_id = %account_id, "Backfill skip: already in flight here");
            return RunOutcome::Skipped(SkipReason::InFlight);
        }
        let outcome = self.run_locked(account_id, is_initial).await;
        self.in_flight.lock().remove(account_id);
        outcome
    }

    async fn run_locked(&self, account_id: &str, is_initial: bool) -> RunOutcome {
        let now = now_ms();
        let meta = self.load_meta(account_id).await.unwrap_or_default();

        if meta.last_status.as_ref().is_some_and(BackfillStatus::is_running) {
            debug!(account_id = %account_id, "Backfill skip: marked running elsewhere");
            return RunOutcome::Skipped(SkipReason::AlreadyRunning);
        }

        if !is_initial {
            if let Some(success) = meta.last_success_ms {
                if now - success < self.config.success_cooldown_ms as i64 {
                    debug!(account_id = %account_id, "Backfill skip: success cooldown");
                    return RunOutcome::Skipped(SkipReason::SuccessCooldown);
                }
            }
            if let Some(attempt) = meta.last_attempt_ms {
                if now - attempt < self.config.attempt_backoff_ms as i64 {
                    debug!(account_id = %account_id, "Backfill skip: attempt backoff");
                    return RunOutcome::Skipped(SkipReason::AttemptBackoff);
                }
            }
        }

        let lease = Duration::from_millis(self.config.lease_ms);
        if !self.lock.acquire(account_id, &self.instance_id, lease).await {
            debug!(account_id = %account_id, "Backfill skip: lease held by another instance");
            return RunOutcome::Skipped(SkipReason::LeaseBusy);
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        let started = now_ms();
        self.write_meta(
            account_id,
            BackfillMeta {
                last_attempt_ms: Some(started),
                last_success_ms: meta.last_success_ms,
                last_status: Some(BackfillStatus::Running {
                    holder: self.instance_id.clone(),
                    started_at_ms: started,
                }),
            },
        )
        .await;

        info!(
            account_id = %account_id,
            initial = is_initial,
            holder = %self.instance_id,
            "Backfill started"
        );

        let result = self.runner.run(account_id).await;
        let duration_ms = (now_ms() - started).max(0) as u64;

        let outcome = match result {
            Ok(mut stats) => {
                stats.duration_ms = duration_ms;
                self.write_meta(
                    account_id,
                    BackfillMeta {
                        last_attempt_ms: Some(started),
                        last_success_ms: Some(now_ms()),
                        last_status: Some(BackfillStatus::Ok { stats: stats.clone() }),
                    },
                )
                .await;
                info!(
                    account_id = %account_id,
                    duration_ms,
                    threads = stats.threads,
                    messages = stats.messages,
                    "Backfill finished"
                );
                RunOutcome::Ran { stats }
            },
            Err(error) => {
                self.write_meta(
                    account_id,
                    BackfillMeta {
                        last_attempt_ms: Some(started),
                        last_success_ms: meta.last_success_ms,
                        last_status: Some(BackfillStatus::Error {
                            error_code: "backfill_error".to_string(),
                            error_message: error.clone(),
                            duration_ms,
                        }),
                    },
                )
                .await;
                RunOutcome::Failed { error, duration_ms }
            },
        };

        // Release unconditionally, success or failure.
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.lock.release(account_id).await;
        outcome
    }

    pub async fn load_meta(&self, account_id: &str) -> Option<BackfillMeta> {
        let path = paths::backfill_meta(account_id);
        match self.store.get(&path).await {
            Ok(Some(value)) => store::decode(&path, value).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Backfill meta read failed");
                None
            },
        }
    }

    async fn write_meta(&self, account_id: &str, meta: BackfillMeta) {
        let path = paths::backfill_meta(account_id);
        let value = match store::encode(&path, &meta) {
            Ok(v) => v,
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Backfill meta encode failed");
                return;
            },
        };
        if let Err(e) = self.store.set(&path, value, true).await {
            warn!(account_id = %account_id, error = %e, "Backfill meta write failed");
        }
    }

    pub fn active_runs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
