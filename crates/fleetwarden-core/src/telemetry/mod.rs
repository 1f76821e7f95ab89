//! Durable telemetry pipeline: heartbeats, probes, incidents, daily
//! rollups, and alert dispatch, all guarded by a renewable leader lease
//! so exactly one instance platform-wide runs the scheduling.
//!
//! Every job is a timer-driven arm of one cooperative loop; no job
//! blocks another, and every write is keyed deterministically so
//! restarts and duplicate leaders cannot create duplicate records.

mod heartbeat;
mod incidents;
mod leader;
mod probes;
mod rollup;


pub use leader::{LeaderDoc, LeaderLease};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use fleetwarden_types::models::{ProbeKind, ProbeOutcome, TelemetryConfig};

use crate::alert::AlertDispatcher;
use crate::now_ms;
use crate::store::DocumentStore;

/// Name of the leader lock guarding this pipeline.
const SCHEDULER_LOCK: &str = "telemetry-scheduler";
/// Consecutive renewal failures before the leader steps down.
const MAX_RENEW_FAILURES: u32 = 2;
/// Cadence for the idempotent rollup/incident sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Executes one synthetic probe. Implemented by the daemon against the
/// real connector; tests substitute canned outcomes.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, kind: ProbeKind) -> ProbeOutcome;
}

/// Live fleet counters included in heartbeats.
pub trait FleetStats: Send + Sync {
    fn connected_count(&self) -> usize;
    fn reconnecting_count(&self) -> usize;
    fn queue_depth(&self) -> usize;
}

pub struct TelemetryPipeline {
    config: TelemetryConfig,
    instance_id: String,
    store: Arc<dyn DocumentStore>,
    alerts: Arc<AlertDispatcher>,
    prober: Arc<dyn Prober>,
    stats: Arc<dyn FleetStats>,
    leader: LeaderLease,
    started_at: Instant,
    last_heartbeat_ms: Mutex<Option<i64>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl TelemetryPipeline {
    pub fn new(
        config: TelemetryConfig,
        instance_id: String,
        store: Arc<dyn DocumentStore>,
        alerts: Arc<AlertDispatcher>,
        prober: Arc<dyn Prober>,
        stats: Arc<dyn FleetStats>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);
        let leader = LeaderLease::new(
            Arc::clone(&store),
            SCHEDULER_LOCK,
            instance_id.clone(),
            Duration::from_secs(config.leader_lease_sec),
        );
        Arc::new(Self {
            config,
            instance_id,
            store,
            alerts,
            prober,
            stats,
            leader,
            started_at: Instant::now(),
            last_heartbeat_ms: Mutex::new(None),
            shutdown_tx,
        })
    }

    /// Start the pipeline loop. Returns the task handle.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let mut shutdown_rx = pipeline.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!(instance_id = %pipeline.instance_id, "Telemetry pipeline started");

            let mut renew_iv =
                tokio::time::interval(Duration::from_secs(pipeline.config.leader_renew_sec));
            let mut heartbeat_iv =
                tokio::time::interval(Duration::from_secs(pipeline.config.heartbeat_interval_sec));
            let mut outbound_iv = tokio::time::interval(Duration::from_secs(
                pipeline.config.outbound_probe_interval_hours * 3_600,
            ));
            let mut inbound_iv = tokio::time::interval(Duration::from_secs(
                pipeline.config.inbound_probe_interval_hours * 3_600,
            ));
            let mut queue_iv = tokio::time::interval(Duration::from_secs(
                pipeline.config.queue_probe_interval_hours * 3_600,
            ));
            let mut hourly_iv = tokio::time::interval(Duration::from_secs(3_600));
            let mut sweep_iv = tokio::time::interval(SWEEP_INTERVAL);

            let mut is_leader = false;
            let mut renew_failures = 0u32;

            loop {
                tokio::select! {
                    _ = renew_iv.tick() => {
                        if is_leader {
                            if pipeline.leader.renew().await {
                                renew_failures = 0;
                            } else {
                                renew_failures += 1;
                                if renew_failures >= MAX_RENEW_FAILURES {
                                    warn!(
                                        instance_id = %pipeline.instance_id,
                                        "Stepping down from telemetry leadership"
                                    );
                                    is_leader = false;
                                    renew_failures = 0;
                                }
                            }
                        } else {
                            is_leader = pipeline.leader.try_acquire().await;
                        }
                    }
                    _ = heartbeat_iv.tick(), if is_leader => {
                        pipeline.emit_heartbeat_at(now_ms()).await;
                    }
                    _ = outbound_iv.tick(), if is_leader => {
                        pipeline.run_probe_at(ProbeKind::Outbound, now_ms()).await;
                    }
                    _ = inbound_iv.tick(), if is_leader => {
                        pipeline.run_probe_at(ProbeKind::Inbound, now_ms()).await;
                    }
                    _ = queue_iv.tick(), if is_leader => {
                        pipeline.run_probe_at(ProbeKind::Queue, now_ms()).await;
                    }
                    _ = hourly_iv.tick(), if is_leader => {
                        pipeline.check_missed_heartbeats_at(now_ms()).await;
                    }
                    _ = sweep_iv.tick(), if is_leader => {
                        // Idempotent: skips until the previous UTC day
                        // lacks its rollup document
                        pipeline.run_daily_rollup_at(now_ms()).await;
                        pipeline.alerts.cleanup();
                    }
                    _ = shutdown_rx.changed() => {
                        if is_leader {
                            pipeline.leader.release().await;
                        }
                        info!("Telemetry pipeline shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Current leader, if any (operator visibility).
    pub async fn current_leader(&self) -> Option<LeaderDoc> {
        self.leader.current_holder().await
    }
}
