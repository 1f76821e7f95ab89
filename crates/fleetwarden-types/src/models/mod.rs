//! Data models shared across the workspace.

mod account;
mod config;
mod proxy;
mod telemetry;

pub use account::{
    AgeClass, Anomaly, AnomalyKind, CircuitHealth, CircuitState, HealthSnapshot, HealthStats,
    Prediction, RiskLevel,
};
pub use config::{
    AlertThresholds, BackfillConfig, BreakerConfig, FleetConfig, HealthWeights, LimiterConfig,
    LimitTier, MonitorConfig, ProxyPoolConfig, RecipientLimits, TelemetryConfig,
};
pub use proxy::{ProxyHealth, ProxyRecord, ProxySnapshot, ProxyStatus};
pub use telemetry::{
    BackfillMeta, BackfillStats, BackfillStatus, Heartbeat, Incident, IncidentKind, ProbeKind,
    ProbeOutcome, ProbeRecord, ProbeResult, Rollup,
};
