//! Per-account circuit breaker.
//!
//! Isolates failing accounts so they fail fast instead of burning
//! transport attempts. States:
//!
//! - Closed: operations allowed; failures tracked in a rolling window
//! - Open: operations rejected with a retry-after hint
//! - HalfOpen: a bounded number of trial calls probe for recovery
//!
//! State transitions are published on a broadcast channel so the
//! telemetry pipeline and the daemon can observe them without the
//! breaker knowing who listens.

mod state;

#[cfg(test)]
mod tests;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use fleetwarden_types::models::{BreakerConfig, CircuitHealth, CircuitState};
use state::AccountCircuit;
pub use state::CircuitSummary;

use crate::now_ms;

/// Retry hint returned while half-open trials are exhausted.
const HALF_OPEN_RETRY_MS: u64 = 5_000;

/// A circuit transition, published for observers.
#[derive(Debug, Clone)]
pub struct CircuitEvent {
    pub account_id: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: Option<String>,
    pub at_ms: i64,
}

/// Verdict for one prospective operation.
#[derive(Debug, Clone)]
pub struct ExecutionDecision {
    pub allowed: bool,
    pub state: CircuitState,
    pub retry_after_ms: Option<u64>,
    pub reason: Option<String>,
}

impl ExecutionDecision {
    fn allowed(state: CircuitState) -> Self {
        Self { allowed: true, state, retry_after_ms: None, reason: None }
    }

    fn rejected(state: CircuitState, reason: &str, retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            state,
            retry_after_ms: Some(retry_after_ms),
            reason: Some(reason.to_string()),
        }
    }
}

/// Manages circuit breakers for all accounts in one process.
pub struct CircuitBreaker {
    config: BreakerConfig,
    circuits: RwLock<HashMap<String, AccountCircuit>>,
    total_trips: AtomicU64,
    events: broadcast::Sender<CircuitEvent>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { config, circuits: RwLock::new(HashMap::new()), total_trips: AtomicU64::new(0), events }
    }

    /// Subscribe to circuit transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.events.subscribe()
    }

    /// Check whether an operation may proceed for this account.
    ///
    /// The first check after the open timeout transitions the circuit to
    /// half-open and admits that caller as the first trial.
    pub fn can_execute(&self, account_id: &str) -> ExecutionDecision {
        let now = now_ms();
        let mut circuits = self.circuits.write();
        let circuit =
            circuits.entry(account_id.to_string()).or_insert_with(|| AccountCircuit::new(now));

        match circuit.state {
            CircuitState::Closed => ExecutionDecision::allowed(CircuitState::Closed),
            CircuitState::Open => {
                let opened_at = circuit.opened_at_ms.unwrap_or(circuit.last_state_change_ms);
                let elapsed = (now - opened_at).max(0) as u64;
                if elapsed >= self.config.open_timeout_ms {
                    Self::transition(
                        &self.events,
                        account_id,
                        circuit,
                        CircuitState::HalfOpen,
                        Some("Timeout elapsed, testing recovery"),
                        now,
                    );
                    circuit.half_open_attempts = 1;
                    return ExecutionDecision::allowed(CircuitState::HalfOpen);
                }
                ExecutionDecision::rejected(
                    CircuitState::Open,
                    "Circuit is open",
                    self.config.open_timeout_ms - elapsed,
                )
            },
            CircuitState::HalfOpen => {
                if circuit.half_open_attempts < self.config.half_open_max_attempts {
                    circuit.half_open_attempts += 1;
                    return ExecutionDecision::allowed(CircuitState::HalfOpen);
                }
                ExecutionDecision::rejected(
                    CircuitState::HalfOpen,
                    "Half-open trial limit reached",
                    HALF_OPEN_RETRY_MS,
                )
            },
        }
    }

    pub fn record_success(&self, account_id: &str) {
        let now = now_ms();
        let mut circuits = self.circuits.write();
        let circuit =
            circuits.entry(account_id.to_string()).or_insert_with(|| AccountCircuit::new(now));

        circuit.successes.push(now);
        circuit.total_successes += 1;
        circuit.prune(now, self.config.monitoring_period_ms);

        match circuit.state {
            CircuitState::Closed => {
                circuit.failures.clear();
            },
            CircuitState::HalfOpen => {
                circuit.half_open_successes += 1;
                if circuit.half_open_successes >= self.config.success_threshold {
                    info!(account_id = %account_id, "Circuit closing - account recovered");
                    Self::transition(
                        &self.events,
                        account_id,
                        circuit,
                        CircuitState::Closed,
                        Some("Account recovered"),
                        now,
                    );
                }
            },
            CircuitState::Open => {
                debug!(account_id = %account_id, "Success recorded while circuit open");
            },
        }
    }

    pub fn record_failure(&self, account_id: &str, reason: &str) {
        let now = now_ms();
        let mut circuits = self.circuits.write();
        let circuit =
            circuits.entry(account_id.to_string()).or_insert_with(|| AccountCircuit::new(now));

        circuit.failures.push(now);
        circuit.total_failures += 1;
        circuit.last_failure_ms = Some(now);
        circuit.last_failure_reason = Some(reason.to_string());
        circuit.prune(now, self.config.monitoring_period_ms);

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failures.len() >= self.config.failure_threshold as usize {
                    warn!(
                        account_id = %account_id,
                        failures = circuit.failures.len(),
                        reason = %reason,
                        "Circuit opening - too many failures"
                    );
                    Self::transition(
                        &self.events,
                        account_id,
                        circuit,
                        CircuitState::Open,
                        Some(reason),
                        now,
                    );
                    self.total_trips.fetch_add(1, Ordering::Relaxed);
                }
            },
            CircuitState::HalfOpen => {
                warn!(
                    account_id = %account_id,
                    reason = %reason,
                    "Circuit re-opening - failure during half-open"
                );
                Self::transition(
                    &self.events,
                    account_id,
                    circuit,
                    CircuitState::Open,
                    Some(reason),
                    now,
                );
                self.total_trips.fetch_add(1, Ordering::Relaxed);
            },
            CircuitState::Open => {},
        }
    }

    /// Operator override: open the circuit. No-op when already open.
    pub fn force_open(&self, account_id: &str, reason: &str) {
        let now = now_ms();
        let mut circuits = self.circuits.write();
        let circuit =
            circuits.entry(account_id.to_string()).or_insert_with(|| AccountCircuit::new(now));
        if circuit.state == CircuitState::Open {
            return;
        }
        info!(account_id = %account_id, reason = %reason, "Circuit forced open");
        Self::transition(&self.events, account_id, circuit, CircuitState::Open, Some(reason), now);
    }

    /// Operator override: close the circuit. No-op when already closed.
    pub fn force_close(&self, account_id: &str, reason: &str) {
        let now = now_ms();
        let mut circuits = self.circuits.write();
        let circuit =
            circuits.entry(account_id.to_string()).or_insert_with(|| AccountCircuit::new(now));
        if circuit.state == CircuitState::Closed {
            return;
        }
        info!(account_id = %account_id, reason = %reason, "Circuit forced closed");
        Self::transition(&self.events, account_id, circuit, CircuitState::Closed, Some(reason), now);
    }

    /// Reset an account's circuit to a pristine closed state.
    pub fn reset(&self, account_id: &str) {
        let now = now_ms();
        let mut circuits = self.circuits.write();
        if let Some(circuit) = circuits.get_mut(account_id) {
            if circuit.state != CircuitState::Closed {
                Self::transition(
                    &self.events,
                    account_id,
                    circuit,
                    CircuitState::Closed,
                    Some("Manual reset"),
                    now,
                );
            }
            *circuit = AccountCircuit::new(now);
        }
    }

    /// Drop state for an account that left the fleet.
    pub fn remove(&self, account_id: &str) {
        self.circuits.write().remove(account_id);
    }

    pub fn get_state(&self, account_id: &str) -> CircuitState {
        self.circuits.read().get(account_id).map_or(CircuitState::Closed, |c| c.state)
    }

    pub fn total_trips(&self) -> u64 {
        self.total_trips.load(Ordering::Relaxed)
    }

    /// Operator-facing circuit health for one account.
    pub fn health(&self, account_id: &str) -> CircuitHealth {
        let now = now_ms();
        let mut circuits = self.circuits.write();
        let circuit =
            circuits.entry(account_id.to_string()).or_insert_with(|| AccountCircuit::new(now));
        circuit.prune(now, self.config.monitoring_period_ms);

        let recent_failures = circuit.failures.len();
        let recent_successes = circuit.successes.len();
        let total_recent = recent_failures + recent_successes;
        let failure_rate =
            if total_recent > 0 { recent_failures as f64 / total_recent as f64 } else { 0.0 };

        let health_score = match circuit.state {
            CircuitState::Open => 0,
            CircuitState::HalfOpen => 50,
            CircuitState::Closed => (100.0 - failure_rate * 100.0).max(0.0).round() as u8,
        };

        CircuitHealth {
            account_id: account_id.to_string(),
            state: circuit.state,
            health_score,
            failure_rate,
            recent_failures,
            recent_successes,
            total_failures: circuit.total_failures,
            total_successes: circuit.total_successes,
            last_failure_ms: circuit.last_failure_ms,
            last_state_change_ms: circuit.last_state_change_ms,
        }
    }

    /// Fleet-wide counts for the operator summary endpoint.
    pub fn summary(&self) -> CircuitSummary {
        let circuits = self.circuits.read();
        let mut summary = CircuitSummary {
            total: circuits.len(),
            total_trips: self.total_trips(),
            ..Default::default()
        };
        for circuit in circuits.values() {
            match circuit.state {
                CircuitState::Closed => summary.closed += 1,
                CircuitState::Open => summary.open += 1,
                CircuitState::HalfOpen => summary.half_open += 1,
            }
        }
        summary
    }

    /// Apply a transition with its state-specific resets, then publish.
    fn transition(
        events: &broadcast::Sender<CircuitEvent>,
        account_id: &str,
        circuit: &mut AccountCircuit,
        to: CircuitState,
        reason: Option<&str>,
        now: i64,
    ) {
        let from = circuit.state;
        circuit.state = to;
        circuit.last_state_change_ms = now;

        match to {
            CircuitState::Open => {
                circuit.opened_at_ms = Some(now);
                circuit.half_open_attempts = 0;
                circuit.half_open_successes = 0;
            },
            CircuitState::HalfOpen => {
                circuit.half_open_attempts = 0;
                circuit.half_open_successes = 0;
            },
            CircuitState::Closed => {
                circuit.failures.clear();
                circuit.successes.clear();
                circuit.opened_at_ms = None;
                circuit.half_open_attempts = 0;
                circuit.half_open_successes = 0;
                circuit.last_failure_reason = None;
            },
        }

        debug!(
            account_id = %account_id,
            from = %from,
            to = %to,
            reason = ?reason,
            "Circuit state change"
        );

        let _ = events.send(CircuitEvent {
            account_id: account_id.to_string(),
            from,
            to,
            reason: reason.map(str::to_string),
            at_ms: now,
        });
    }
}
