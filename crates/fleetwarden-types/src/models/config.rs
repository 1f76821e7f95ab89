//! Typed configuration with validated defaults.
//!
//! Every threshold and duration in the reliability layer is overridable
//! here; `FleetConfig::validate` runs once at startup so malformed values
//! fail fast instead of surfacing mid-operation.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures within the monitoring window before opening the circuit
    pub failure_threshold: u32,
    /// Successes in half-open state before closing
    pub success_threshold: u32,
    /// Milliseconds to keep the circuit open before testing recovery
    pub open_timeout_ms: u64,
    /// Rolling window for failure/success tracking, milliseconds
    pub monitoring_period_ms: u64,
    /// Trial calls admitted while half-open
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_ms: 60_000,
            monitoring_period_ms: 300_000,
            half_open_max_attempts: 3,
        }
    }
}

/// One rate-limit tier, selected by account age class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitTier {
    pub messages_per_hour: usize,
    pub messages_per_day: usize,
    pub burst_size: usize,
    pub burst_window_ms: u64,
    pub min_delay_ms: u64,
}

/// Per-recipient caps, independent of the account budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipientLimits {
    pub messages_per_hour: usize,
    pub messages_per_day: usize,
    pub min_delay_ms: u64,
}

impl Default for RecipientLimits {
    fn default() -> Self {
        Self { messages_per_hour: 10, messages_per_day: 30, min_delay_ms: 5_000 }
    }
}

/// Rate limiter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// New accounts (< 7 days)
    pub new: LimitTier,
    /// Normal accounts (7-30 days)
    pub normal: LimitTier,
    /// Established accounts (> 30 days)
    pub established: LimitTier,
    pub recipient: RecipientLimits,
    /// Cap applied to the drain loop's blocked-sleep, milliseconds
    pub max_queue_wait_ms: u64,
    /// Requeue attempts before a failed send is dropped
    pub max_send_attempts: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            new: LimitTier {
                messages_per_hour: 20,
                messages_per_day: 100,
                burst_size: 3,
                burst_window_ms: 60_000,
                min_delay_ms: 3_000,
            },
            normal: LimitTier {
                messages_per_hour: 50,
                messages_per_day: 300,
                burst_size: 5,
                burst_window_ms: 60_000,
                min_delay_ms: 2_000,
            },
            established: LimitTier {
                messages_per_hour: 100,
                messages_per_day: 600,
                burst_size: 10,
                burst_window_ms: 60_000,
                min_delay_ms: 1_000,
            },
            recipient: RecipientLimits::default(),
            max_queue_wait_ms: 60_000,
            max_send_attempts: 3,
        }
    }
}

/// Proxy pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyPoolConfig {
    pub health_check_interval_ms: u64,
    pub health_check_timeout_ms: u64,
    /// Consecutive failures before a proxy is auto-disabled
    pub max_failures: u32,
    /// Rotate the account to a fresh proxy when its current one fails
    pub rotate_on_failure: bool,
    /// Fixed external endpoint probed during health checks
    pub test_url: String,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 300_000,
            health_check_timeout_ms: 10_000,
            max_failures: 3,
            rotate_on_failure: true,
            test_url: "https://api.ipify.org?format=json".to_string(),
        }
    }
}

/// Health score weights. Must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthWeights {
    pub disconnects: f64,
    pub latency: f64,
    pub error_rate: f64,
    pub message_success: f64,
    pub uptime: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            disconnects: 0.30,
            latency: 0.20,
            error_rate: 0.20,
            message_success: 0.15,
            uptime: 0.15,
        }
    }
}

impl HealthWeights {
    pub fn sum(&self) -> f64 {
        self.disconnects + self.latency + self.error_rate + self.message_success + self.uptime
    }
}

/// Health monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Rolling window for scoring and anomaly detection, milliseconds
    pub window_ms: u64,
    /// Disconnects in the window that raise an anomaly
    pub disconnect_threshold: usize,
    /// Average latency (ms) that raises an anomaly
    pub latency_threshold_ms: u64,
    /// Failed/total message ratio that raises an anomaly
    pub error_rate_threshold: f64,
    pub weights: HealthWeights,
    /// Anomaly dedup horizon, milliseconds
    pub anomaly_dedup_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_ms: 300_000,
            disconnect_threshold: 3,
            latency_threshold_ms: 2_000,
            error_rate_threshold: 0.1,
            weights: HealthWeights::default(),
            anomaly_dedup_ms: 60_000,
        }
    }
}

/// Backfill scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    pub enabled: bool,
    /// Periodic tick interval, milliseconds
    pub interval_ms: u64,
    /// Lease duration; must exceed expected execution time
    pub lease_ms: u64,
    /// Skip accounts with a success newer than this
    pub success_cooldown_ms: u64,
    /// Skip accounts with an attempt newer than this
    pub attempt_backoff_ms: u64,
    /// Accounts taken per tick, ordered by staleness
    pub max_accounts_per_tick: usize,
    /// Concurrent executions per instance
    pub max_concurrency: usize,
    /// Initial-backfill jitter bounds after connect, milliseconds
    pub initial_delay_min_ms: u64,
    pub initial_delay_max_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 12 * 60 * 1000,
            lease_ms: 15 * 60 * 1000,
            success_cooldown_ms: 60 * 60 * 1000,
            attempt_backoff_ms: 10 * 60 * 1000,
            max_accounts_per_tick: 4,
            max_concurrency: 2,
            initial_delay_min_ms: 10_000,
            initial_delay_max_ms: 40_000,
        }
    }
}

/// Incident and alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Missed heartbeats in the last hour before an incident opens
    pub missed_heartbeats_per_hour: u64,
    /// Consecutive same-type probe failures before an incident opens
    pub consecutive_probe_failures: usize,
    /// Alert throttle per key, milliseconds
    pub throttle_ms: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            missed_heartbeats_per_hour: 5,
            consecutive_probe_failures: 3,
            throttle_ms: 3_600_000,
        }
    }
}

/// Telemetry pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub heartbeat_interval_sec: u64,
    /// Leader lease duration, seconds
    pub leader_lease_sec: u64,
    /// Leader lease renewal interval, seconds; must be below the duration
    pub leader_renew_sec: u64,
    pub outbound_probe_interval_hours: u64,
    pub inbound_probe_interval_hours: u64,
    pub queue_probe_interval_hours: u64,
    /// Heartbeat coverage below which a rollup is flagged insufficient
    pub insufficient_data_threshold: f64,
    pub alerts: AlertThresholds,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_sec: 60,
            leader_lease_sec: 120,
            leader_renew_sec: 60,
            outbound_probe_interval_hours: 6,
            inbound_probe_interval_hours: 6,
            queue_probe_interval_hours: 24,
            insufficient_data_threshold: 0.8,
            alerts: AlertThresholds::default(),
        }
    }
}

/// Root configuration for the reliability layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub breaker: BreakerConfig,
    pub limiter: LimiterConfig,
    pub proxy: ProxyPoolConfig,
    pub monitor: MonitorConfig,
    pub backfill: BackfillConfig,
    pub telemetry: TelemetryConfig,
}

impl FleetConfig {
    /// Validate cross-field invariants. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid("breaker.failure_threshold", "must be at least 1"));
        }
        if self.breaker.success_threshold == 0 {
            return Err(ConfigError::invalid("breaker.success_threshold", "must be at least 1"));
        }
        let weight_sum = self.monitor.weights.sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::invalid(
                "monitor.weights",
                format!("must sum to 1.0, got {weight_sum}"),
            ));
        }
        if self.backfill.initial_delay_min_ms > self.backfill.initial_delay_max_ms {
            return Err(ConfigError::invalid(
                "backfill.initial_delay_min_ms",
                "must not exceed initial_delay_max_ms",
            ));
        }
        if self.backfill.max_concurrency == 0 {
            return Err(ConfigError::invalid("backfill.max_concurrency", "must be at least 1"));
        }
        if self.telemetry.leader_renew_sec >= self.telemetry.leader_lease_sec {
            return Err(ConfigError::invalid(
                "telemetry.leader_renew_sec",
                "must be shorter than leader_lease_sec",
            ));
        }
        if !(0.0..=1.0).contains(&self.telemetry.insufficient_data_threshold) {
            return Err(ConfigError::invalid(
                "telemetry.insufficient_data_threshold",
                "must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        FleetConfig::default().validate().expect("default config must validate");
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut config = FleetConfig::default();
        config.monitor.weights.uptime = 0.5;
        let err = config.validate().expect_err("weights no longer sum to 1");
        assert!(format!("{err}").contains("monitor.weights"));
    }

    #[test]
    fn test_renew_must_be_shorter_than_lease() {
        let mut config = FleetConfig::default();
        config.telemetry.leader_renew_sec = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: FleetConfig =
            serde_json::from_str(r#"{"breaker":{"failure_threshold":7}}"#).expect("parse");
        assert_eq!(config.breaker.failure_threshold, 7);
        assert_eq!(config.breaker.success_threshold, 2);
        assert_eq!(config.limiter.new.messages_per_hour, 20);
    }
}
