//! Account health monitoring: rolling stats, weighted scoring, anomaly
//! detection, and advisory failure prediction.
//!
//! Consumes the typed transport event stream per account. The outputs
//! (score, prediction, anomalies) feed alerting and operator queries;
//! they never gate operations directly.

mod state;


use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use fleetwarden_types::models::{HealthSnapshot, MonitorConfig, Prediction, RiskLevel};

use crate::now_ms;
use state::AccountHealthState;

/// Typed health events, one per transport observation.
#[derive(Debug, Clone)]
pub enum HealthEvent {
    Connect,
    Disconnect,
    Latency { ms: u64 },
    Error { message: String },
    MessageSent,
    MessageFailed,
}

/// Tracks health for every account in the fleet.
pub struct HealthMonitor {
    config: MonitorConfig,
    accounts: DashMap<String, Arc<Mutex<AccountHealthState>>>,
}

impl HealthMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config, accounts: DashMap::new() }
    }

    /// Register an account for tracking. Idempotent.
    pub fn register_account(&self, account_id: &str) {
        self.accounts
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AccountHealthState::new(now_ms()))));
    }

    pub fn unregister_account(&self, account_id: &str) {
        self.accounts.remove(account_id);
    }

    /// Record one event and refresh the derived signals.
    pub fn record_event(&self, account_id: &str, event: HealthEvent) {
        self.record_event_at(account_id, event, now_ms());
    }

    pub(crate) fn record_event_at(&self, account_id: &str, event: HealthEvent, now_ms: i64) {
        let entry = Arc::clone(
            &self
                .accounts
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(AccountHealthState::new(now_ms)))),
        );
        entry.lock().apply(account_id, &self.config, event, now_ms);
    }

    /// Current health score; unknown accounts rate a perfect 100.
    pub fn score(&self, account_id: &str) -> u8 {
        self.accounts.get(account_id).map_or(100, |e| e.lock().score)
    }

    pub fn prediction(&self, account_id: &str) -> Prediction {
        self.accounts
            .get(account_id)
            .map(|e| e.lock().prediction.clone())
            .unwrap_or_default()
    }

    /// Operator-facing snapshot for one account.
    pub fn snapshot(&self, account_id: &str) -> Option<HealthSnapshot> {
        let entry = self.accounts.get(account_id)?;
        let state = entry.lock();
        Some(HealthSnapshot {
            account_id: account_id.to_string(),
            score: state.score,
            prediction: state.prediction.clone(),
            stats: state.stats(),
            recent_anomalies: state.recent_anomalies(&self.config, now_ms()),
        })
    }

    pub fn all_snapshots(&self) -> Vec<HealthSnapshot> {
        let mut out: Vec<HealthSnapshot> = self
            .accounts
            .iter()
            .filter_map(|entry| self.snapshot(entry.key()))
            .collect();
        out.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        out
    }

    /// Accounts currently predicted at the given risk level.
    pub fn count_at_risk(&self, risk: RiskLevel) -> usize {
        self.accounts.iter().filter(|e| e.value().lock().prediction.risk == risk).count()
    }

    pub fn tracked_accounts(&self) -> usize {
        self.accounts.len()
    }
}
