//! Circuit breaker state types.

use fleetwarden_types::models::CircuitState;

/// Per-account circuit state.
///
/// Failures and successes are rolling timestamp logs pruned to the
/// monitoring window; totals are lifetime counters.
#[derive(Debug)]
pub(crate) struct AccountCircuit {
    pub state: CircuitState,
    pub failures: Vec<i64>,
    pub successes: Vec<i64>,
    pub last_failure_ms: Option<i64>,
    pub last_state_change_ms: i64,
    pub opened_at_ms: Option<i64>,
    pub half_open_attempts: u32,
    pub half_open_successes: u32,
    pub last_failure_reason: Option<String>,
    pub total_failures: u64,
    pub total_successes: u64,
}

impl AccountCircuit {
    pub fn new(now_ms: i64) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: Vec::new(),
            successes: Vec::new(),
            last_failure_ms: None,
            last_state_change_ms: now_ms,
            opened_at_ms: None,
            half_open_attempts: 0,
            half_open_successes: 0,
            last_failure_reason: None,
            total_failures: 0,
            total_successes: 0,
        }
    }

    /// Drop window entries older than `window_ms`.
    pub fn prune(&mut self, now_ms: i64, window_ms: u64) {
        let cutoff = now_ms - window_ms as i64;
        self.failures.retain(|&ts| ts >= cutoff);
        self.successes.retain(|&ts| ts >= cutoff);
    }
}

/// Fleet-wide circuit counts.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CircuitSummary {
    pub total: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub total_trips: u64,
}
