//! Per-account model types: age classes, circuit state, health snapshots.

use serde::{Deserialize, Serialize};

/// Account age class, selecting the rate-limit tier.
///
/// Younger accounts are throttled harder because providers watch them
/// more closely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgeClass {
    /// Less than 7 days old
    New,
    /// Between 7 and 30 days old
    #[default]
    Normal,
    /// More than 30 days old
    Established,
}

impl std::fmt::Display for AgeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgeClass::New => write!(f, "new"),
            AgeClass::Normal => write!(f, "normal"),
            AgeClass::Established => write!(f, "established"),
        }
    }
}

/// State of a per-account circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Account is failing - requests fail immediately
    Open,
    /// Testing recovery - limited requests allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Operator-facing circuit health for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitHealth {
    pub account_id: String,
    pub state: CircuitState,
    /// 0-100: 0 when open, 50 when half-open, otherwise 100 minus the
    /// recent failure rate
    pub health_score: u8,
    /// Failures / (failures + successes) within the monitoring window
    pub failure_rate: f64,
    pub recent_failures: usize,
    pub recent_successes: usize,
    pub total_failures: u64,
    pub total_successes: u64,
    pub last_failure_ms: Option<i64>,
    pub last_state_change_ms: i64,
}

/// Discrete failure-risk level produced by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Advisory failure prediction for one account.
///
/// This signal feeds alerting only; it never blocks operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub risk: RiskLevel,
    pub reasons: Vec<String>,
    /// 0-100, accumulated per triggered rule and capped
    pub confidence: u8,
    pub evaluated_at_ms: i64,
}

impl Default for Prediction {
    fn default() -> Self {
        Self {
            risk: RiskLevel::Low,
            reasons: vec!["No data".to_string()],
            confidence: 0,
            evaluated_at_ms: 0,
        }
    }
}

/// Anomaly categories raised by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    HighDisconnectRate,
    HighLatency,
    HighErrorRate,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyKind::HighDisconnectRate => write!(f, "high_disconnect_rate"),
            AnomalyKind::HighLatency => write!(f, "high_latency"),
            AnomalyKind::HighErrorRate => write!(f, "high_error_rate"),
        }
    }
}

/// A deduplicated anomaly record (one per kind per account per minute).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub account_id: String,
    pub kind: AnomalyKind,
    pub first_seen_ms: i64,
    /// Kind-specific payload (observed value and threshold)
    pub payload: serde_json::Value,
}

/// Rolling-window statistics included in a health snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStats {
    pub disconnects: usize,
    pub errors: usize,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub uptime_ms: i64,
    pub downtime_ms: i64,
}

/// Operator-facing health snapshot for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub account_id: String,
    /// Weighted 0-100 score
    pub score: u8,
    pub prediction: Prediction,
    pub stats: HealthStats,
    pub recent_anomalies: Vec<Anomaly>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_class_roundtrip() {
        let json = serde_json::to_string(&AgeClass::Established).expect("serialize");
        assert_eq!(json, "\"established\"");
        let back: AgeClass = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, AgeClass::Established);
    }

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }
}
