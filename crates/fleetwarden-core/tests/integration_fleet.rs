//! End-to-end exercises of the reliability layer over the public API:
//! transport events in, gated sends out, and distributed backfill
//! against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use fleetwarden_core::backfill::{
    AccountDirectory, BackfillLock, BackfillRunner, BackfillScheduler, RunOutcome,
};
use fleetwarden_core::store::{DocumentStore, MemoryStore};
use fleetwarden_core::transport::{Transport, TransportEvent};
use fleetwarden_core::FleetService;
use fleetwarden_types::models::{
    AgeClass, BackfillConfig, BackfillStats, CircuitState, FleetConfig, ProxyRecord,
};

struct ScriptedTransport {
    sent: Mutex<Vec<(String, String, Option<String>)>>,
    failures_left: Mutex<u32>,
}

impl ScriptedTransport {
    fn reliable() -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()), failures_left: Mutex::new(0) })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        account_id: &str,
        recipient: &str,
        _payload: &str,
        egress: Option<&ProxyRecord>,
    ) -> Result<(), String> {
        {
            let mut failures = self.failures_left.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err("stream reset by peer".to_string());
            }
        }
        self.sent.lock().push((
            account_id.to_string(),
            recipient.to_string(),
            egress.map(|p| p.proxy_id.clone()),
        ));
        Ok(())
    }
}

fn quick_fleet_config() -> FleetConfig {
    let mut config = FleetConfig::default();
    // Drop the per-send pacing so queued messages drain immediately
    config.limiter.established.min_delay_ms = 0;
    config.limiter.recipient.min_delay_ms = 0;
    config
}

#[tokio::test]
async fn test_send_path_uses_assigned_egress() {
    let transport = ScriptedTransport::reliable();
    let fleet = FleetService::new(&quick_fleet_config(), transport.clone());
    fleet.register_account("acc1", AgeClass::Established);
    fleet.proxies().register("p1", "http://10.0.0.1:8080", false, true).expect("register");
    fleet.proxies().assign("acc1", "p1").expect("assign");
    fleet.handle_event("acc1", TransportEvent::Connected);

    fleet.queue_send("acc1", "peer", "hello", 0).expect("queued");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = transport.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "acc1");
    assert_eq!(sent[0].2.as_deref(), Some("p1"));

    let snapshot = fleet.health_snapshot("acc1").expect("snapshot");
    assert_eq!(snapshot.stats.messages_sent, 1);
}

#[tokio::test]
async fn test_transport_failures_open_circuit_and_rotate_proxy() {
    let transport = Arc::new(ScriptedTransport {
        sent: Mutex::new(Vec::new()),
        failures_left: Mutex::new(100),
    });
    let fleet = FleetService::new(&quick_fleet_config(), transport.clone());
    fleet.register_account("acc1", AgeClass::Established);
    fleet.proxies().register("p1", "http://10.0.0.1:8080", false, true).expect("register");
    fleet.proxies().register("p2", "http://10.0.0.2:8080", false, true).expect("register");
    fleet.proxies().assign("acc1", "p1").expect("assign");

    fleet.queue_send("acc1", "peer", "doomed", 0).expect("queued");
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Three failed attempts dropped the message, fed the breaker, and
    // reported against the assigned proxy (rotating away from it)
    let health = fleet.circuit_health("acc1");
    assert_eq!(health.total_failures, 3);
    assert_ne!(fleet.proxies().assignment_of("acc1").as_deref(), Some("p1"));

    // Two more failures through events trip the breaker entirely
    for _ in 0..2 {
        fleet.handle_event(
            "acc1",
            TransportEvent::SendFailed {
                recipient: "peer".to_string(),
                error: "stream reset by peer".to_string(),
            },
        );
    }
    assert_eq!(fleet.circuit_health("acc1").state, CircuitState::Open);
}

struct FleetBackedDirectory {
    fleet: Arc<FleetService>,
}

#[async_trait]
impl AccountDirectory for FleetBackedDirectory {
    async fn connected_accounts(&self) -> Vec<String> {
        self.fleet.connected_account_ids()
    }
}

struct NoopRunner;

#[async_trait]
impl BackfillRunner for NoopRunner {
    async fn run(&self, _account_id: &str) -> Result<BackfillStats, String> {
        Ok(BackfillStats { threads: 3, messages: 120, errors: 0, duration_ms: 0 })
    }
}

#[tokio::test]
async fn test_backfill_round_trip_over_shared_store() {
    let transport = ScriptedTransport::reliable();
    let fleet = FleetService::new(&FleetConfig::default(), transport);
    fleet.register_account("acc1", AgeClass::Normal);
    fleet.handle_event("acc1", TransportEvent::Connected);

    let store = Arc::new(MemoryStore::new());
    let scheduler = BackfillScheduler::new(
        BackfillConfig::default(),
        "it-instance".to_string(),
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        Arc::new(NoopRunner),
        Arc::new(FleetBackedDirectory { fleet: Arc::clone(&fleet) }),
    );

    let outcome = scheduler.run_for_account("acc1", true).await;
    match outcome {
        RunOutcome::Ran { stats } => assert_eq!(stats.messages, 120),
        other => panic!("expected a run, got {other:?}"),
    }

    // A second instance sharing the store sees the cooldown and skips
    let other = BackfillScheduler::new(
        BackfillConfig::default(),
        "other-instance".to_string(),
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        Arc::new(NoopRunner),
        Arc::new(FleetBackedDirectory { fleet: Arc::clone(&fleet) }),
    );
    assert!(matches!(other.run_for_account("acc1", false).await, RunOutcome::Skipped(_)));

    // And the lock is free for the next eligible window
    let lock = BackfillLock::new(Arc::clone(&store) as Arc<dyn DocumentStore>);
    assert!(lock.acquire("acc1", "other-instance", Duration::from_secs(60)).await);
}
