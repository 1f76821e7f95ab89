//! Per-account health state: rolling windows, scoring, anomaly
//! detection, and failure prediction.

use std::collections::HashMap;

use fleetwarden_types::models::{
    Anomaly, AnomalyKind, HealthStats, MonitorConfig, Prediction, RiskLevel,
};
use serde_json::json;
use tracing::warn;

use super::HealthEvent;

const MAX_ANOMALIES: usize = 100;
/// Message sample size below which ratio-based rules stay quiet.
const MIN_MESSAGES_FOR_RATIO: u64 = 10;

#[derive(Debug)]
pub(super) struct AccountHealthState {
    disconnects: Vec<i64>,
    latencies: Vec<(i64, u64)>,
    errors: Vec<i64>,
    messages_sent: u64,
    messages_failed: u64,
    connected_at_ms: Option<i64>,
    last_disconnect_ms: Option<i64>,
    total_uptime_ms: i64,
    total_downtime_ms: i64,
    pub score: u8,
    pub prediction: Prediction,
    anomalies: Vec<Anomaly>,
    anomaly_last_seen: HashMap<AnomalyKind, i64>,
}

impl AccountHealthState {
    pub fn new(now_ms: i64) -> Self {
        Self {
            disconnects: Vec::new(),
            latencies: Vec::new(),
            errors: Vec::new(),
            messages_sent: 0,
            messages_failed: 0,
            connected_at_ms: Some(now_ms),
            last_disconnect_ms: None,
            total_uptime_ms: 0,
            total_downtime_ms: 0,
            score: 100,
            prediction: Prediction::default(),
            anomalies: Vec::new(),
            anomaly_last_seen: HashMap::new(),
        }
    }

    pub fn apply(&mut self, account_id: &str, config: &MonitorConfig, event: HealthEvent, now_ms: i64) {
        match event {
            HealthEvent::Connect => {
                self.connected_at_ms = Some(now_ms);
                if let Some(last) = self.last_disconnect_ms.take() {
                    self.total_downtime_ms += (now_ms - last).max(0);
                }
            },
            HealthEvent::Disconnect => {
                self.disconnects.push(now_ms);
                self.last_disconnect_ms = Some(now_ms);
                if let Some(connected_at) = self.connected_at_ms.take() {
                    self.total_uptime_ms += (now_ms - connected_at).max(0);
                }
            },
            HealthEvent::Latency { ms } => {
                self.latencies.push((now_ms, ms));
            },
            HealthEvent::Error { .. } => {
                self.errors.push(now_ms);
            },
            HealthEvent::MessageSent => {
                self.messages_sent += 1;
            },
            HealthEvent::MessageFailed => {
                self.messages_failed += 1;
            },
        }

        self.prune(config, now_ms);
        self.update_score(config, now_ms);
        self.detect_anomalies(account_id, config, now_ms);
        self.predict_failure(config, now_ms);
    }

    fn prune(&mut self, config: &MonitorConfig, now_ms: i64) {
        let cutoff = now_ms - config.window_ms as i64;
        self.disconnects.retain(|&ts| ts >= cutoff);
        self.latencies.retain(|&(ts, _)| ts >= cutoff);
        self.errors.retain(|&ts| ts >= cutoff);
    }

    fn average_latency(&self) -> Option<f64> {
        if self.latencies.is_empty() {
            return None;
        }
        let sum: u64 = self.latencies.iter().map(|&(_, v)| v).sum();
        Some(sum as f64 / self.latencies.len() as f64)
    }

    fn error_ratio(&self) -> Option<f64> {
        let total = self.messages_sent + self.messages_failed;
        if total > MIN_MESSAGES_FOR_RATIO {
            Some(self.messages_failed as f64 / total as f64)
        } else {
            None
        }
    }

    /// Weighted 0-100 score from five normalized sub-scores.
    fn update_score(&mut self, config: &MonitorConfig, _now_ms: i64) {
        let weights = &config.weights;
        let mut score = 100.0;

        let disconnect_score = (100.0 - self.disconnects.len() as f64 * 20.0).max(0.0);
        score -= (100.0 - disconnect_score) * weights.disconnects;

        if let Some(avg) = self.average_latency() {
            let latency_score = (100.0 - avg / 20.0).max(0.0);
            score -= (100.0 - latency_score) * weights.latency;
        }

        let error_score = (100.0 - self.errors.len() as f64 * 10.0).max(0.0);
        score -= (100.0 - error_score) * weights.error_rate;

        let total_messages = self.messages_sent + self.messages_failed;
        if total_messages > 0 {
            let success_rate = self.messages_sent as f64 / total_messages as f64;
            score -= (100.0 - success_rate * 100.0) * weights.message_success;
        }

        let total_time = self.total_uptime_ms + self.total_downtime_ms;
        if total_time > 0 {
            let uptime_pct = self.total_uptime_ms as f64 / total_time as f64 * 100.0;
            score -= (100.0 - uptime_pct) * weights.uptime;
        }

        self.score = score.clamp(0.0, 100.0).round() as u8;
    }

    fn detect_anomalies(&mut self, account_id: &str, config: &MonitorConfig, now_ms: i64) {
        if self.disconnects.len() >= config.disconnect_threshold {
            self.add_anomaly(
                account_id,
                AnomalyKind::HighDisconnectRate,
                json!({
                    "count": self.disconnects.len(),
                    "threshold": config.disconnect_threshold,
                }),
                config,
                now_ms,
            );
        }

        if let Some(avg) = self.average_latency() {
            if avg > config.latency_threshold_ms as f64 {
                self.add_anomaly(
                    account_id,
                    AnomalyKind::HighLatency,
                    json!({
                        "average_ms": avg.round() as u64,
                        "threshold_ms": config.latency_threshold_ms,
                    }),
                    config,
                    now_ms,
                );
            }
        }

        if let Some(ratio) = self.error_ratio() {
            if ratio > config.error_rate_threshold {
                self.add_anomaly(
                    account_id,
                    AnomalyKind::HighErrorRate,
                    json!({
                        "rate_pct": (ratio * 100.0).round() as u64,
                        "threshold_pct": (config.error_rate_threshold * 100.0).round() as u64,
                    }),
                    config,
                    now_ms,
                );
            }
        }
    }

    /// Record an anomaly unless the same kind fired within the dedup
    /// horizon.
    fn add_anomaly(
        &mut self,
        account_id: &str,
        kind: AnomalyKind,
        payload: serde_json::Value,
        config: &MonitorConfig,
        now_ms: i64,
    ) {
        if let Some(&last) = self.anomaly_last_seen.get(&kind) {
            if now_ms - last < config.anomaly_dedup_ms as i64 {
                return;
            }
        }
        self.anomaly_last_seen.insert(kind, now_ms);
        self.anomalies.push(Anomaly {
            account_id: account_id.to_string(),
            kind,
            first_seen_ms: now_ms,
            payload: payload.clone(),
        });
        if self.anomalies.len() > MAX_ANOMALIES {
            self.anomalies.remove(0);
        }
        warn!(account_id = %account_id, kind = %kind, payload = %payload, "Anomaly detected");
    }

    /// Pattern-based failure prediction. Advisory only.
    fn predict_failure(&mut self, config: &MonitorConfig, now_ms: i64) {
        let mut risk = RiskLevel::Low;
        let mut reasons = Vec::new();
        let mut confidence: u32 = 0;

        if self.score < 50 {
            risk = RiskLevel::High;
            reasons.push("Health score below 50".to_string());
            confidence += 30;
        } else if self.score < 70 {
            risk = RiskLevel::Medium;
            reasons.push("Health score below 70".to_string());
            confidence += 20;
        }

        let recent = self.disconnects.len();
        if recent >= 3 {
            risk = RiskLevel::High;
            reasons.push(format!("{recent} disconnects in window"));
            confidence += 25;
        } else if recent == 2 {
            risk = risk.max(RiskLevel::Medium);
            reasons.push(format!("{recent} disconnects in window"));
            confidence += 15;
        }

        // Strictly shrinking gaps between disconnects mean the
        // connection is deteriorating, not just flapping.
        if recent >= 3 {
            let intervals: Vec<i64> =
                self.disconnects.windows(2).map(|pair| pair[1] - pair[0]).collect();
            let tightening = intervals.windows(2).all(|pair| pair[1] < pair[0]);
            if tightening {
                risk = RiskLevel::High;
                reasons.push("Disconnect frequency increasing".to_string());
                confidence += 20;
            }
        }

        if let Some(ratio) = self.error_ratio() {
            let pct = (ratio * 100.0).round() as u64;
            if ratio > 0.2 {
                risk = RiskLevel::High;
                reasons.push(format!("Error rate {pct}%"));
                confidence += 15;
            } else if ratio > 0.1 {
                risk = risk.max(RiskLevel::Medium);
                reasons.push(format!("Error rate {pct}%"));
                confidence += 10;
            }
        }

        if reasons.is_empty() {
            reasons.push("No issues detected".to_string());
        }

        self.prediction = Prediction {
            risk,
            reasons,
            confidence: confidence.min(100) as u8,
            evaluated_at_ms: now_ms,
        };
    }

    pub fn stats(&self) -> HealthStats {
        HealthStats {
            disconnects: self.disconnects.len(),
            errors: self.errors.len(),
            messages_sent: self.messages_sent,
            messages_failed: self.messages_failed,
            uptime_ms: self.total_uptime_ms,
            downtime_ms: self.total_downtime_ms,
        }
    }

    pub fn recent_anomalies(&self, config: &MonitorConfig, now_ms: i64) -> Vec<Anomaly> {
        let cutoff = now_ms - config.window_ms as i64;
        self.anomalies.iter().filter(|a| a.first_seen_ms >= cutoff).cloned().collect()
    }
}
