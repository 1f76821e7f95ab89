//! Fleetwarden core: the reliability and coordination layer that sits
//! between raw messaging-transport connections and the rest of the
//! platform.
//!
//! Components, leaf-first:
//!
//! - [`store`] — document store trait with transactional compare-and-set,
//!   deterministic path building, and an in-memory implementation.
//! - [`transport`] — the transport collaborator trait and its typed event
//!   stream.
//! - [`alert`] — best-effort alert channel with per-key throttling.
//! - [`breaker`] — per-account circuit breaker.
//! - [`limiter`] — adaptive rate limiter with priority queues.
//! - [`proxy`] — egress assignment, health checking, rotation.
//! - [`health`] — rolling health scoring, anomaly detection, failure
//!   prediction.
//! - [`backfill`] — lease-based distributed backfill scheduling.
//! - [`telemetry`] — heartbeats, probes, incidents, rollups, alerting,
//!   guarded by a leader lease.
//! - [`fleet`] — the composition wiring transport events and sends
//!   through the gates above.

pub mod alert;
pub mod backfill;
pub mod breaker;
pub mod fleet;
pub mod health;
pub mod limiter;
pub mod proxy;
pub mod store;
pub mod telemetry;
pub mod transport;

pub use alert::{AlertChannel, AlertDispatcher};
pub use backfill::{AccountDirectory, BackfillLock, BackfillRunner, BackfillScheduler};
pub use breaker::{CircuitBreaker, CircuitEvent, ExecutionDecision};
pub use fleet::{FleetDirectory, FleetService};
pub use health::HealthMonitor;
pub use limiter::{LimiterEvent, OutboundSender, QueuedMessage, RateLimiter};
pub use proxy::ProxyManager;
pub use store::{DocumentStore, MemoryStore, TxDecision, TxOutcome};
pub use telemetry::{FleetStats, LeaderLease, Prober, TelemetryPipeline};
pub use transport::{ThrottleSeverity, Transport, TransportEvent};

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
