//! Durable telemetry documents: heartbeats, probes, incidents, rollups,
//! and backfill metadata.
//!
//! These structs are serialized to JSON values and written to the
//! document store under deterministic, time-bucketed paths so concurrent
//! writers and restarts cannot create duplicates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One heartbeat document, keyed by an interval-truncated bucket id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub bucket_id: String,
    pub ts_ms: i64,
    pub instance_id: String,
    pub uptime_sec: u64,
    pub memory_rss_bytes: u64,
    pub connected_count: usize,
    pub reconnecting_count: usize,
    pub queue_depth: usize,
    pub expected_interval_sec: u64,
    /// Absolute deviation from the expected interval, seconds
    pub drift_sec: u64,
}

/// Synthetic probe categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Outbound,
    Inbound,
    Queue,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 3] = [ProbeKind::Outbound, ProbeKind::Inbound, ProbeKind::Queue];

    /// Key prefix used in probe document ids.
    pub fn key_prefix(self) -> &'static str {
        match self {
            ProbeKind::Outbound => "OUT",
            ProbeKind::Inbound => "IN",
            ProbeKind::Queue => "QUEUE",
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::Outbound => write!(f, "outbound"),
            ProbeKind::Inbound => write!(f, "inbound"),
            ProbeKind::Queue => write!(f, "queue"),
        }
    }
}

/// Probe pass/fail result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeResult {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
}

/// Outcome returned by a probe executor before it is persisted.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub result: ProbeResult,
    pub latency_ms: u64,
    pub detail: Option<String>,
}

/// One persisted probe document, keyed by `{type, truncated time}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub probe_key: String,
    pub kind: ProbeKind,
    pub ts_ms: i64,
    pub result: ProbeResult,
    pub latency_ms: u64,
    pub instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Incident categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    MissedHeartbeats,
    ProbeFailureStreak,
}

/// One persisted incident document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub kind: IncidentKind,
    pub ts_start_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts_end_ms: Option<i64>,
    /// Time to recovery in seconds, set when the incident closes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_sec: Option<u64>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_kind: Option<ProbeKind>,
    pub instance_id: String,
}

/// Daily fleet rollup, one document per UTC date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rollup {
    pub date: String,
    pub expected_heartbeats: u64,
    pub written_heartbeats: u64,
    pub missed_heartbeats: u64,
    pub uptime_pct: f64,
    /// Pass rate percentage per probe kind
    pub probe_pass_rates: HashMap<String, f64>,
    pub recovery_p50_sec: Option<u64>,
    pub recovery_p90_sec: Option<u64>,
    pub recovery_p95_sec: Option<u64>,
    pub incident_count: usize,
    /// True when heartbeat coverage fell below the configured threshold
    pub insufficient_data: bool,
    pub coverage: f64,
    pub instance_id: String,
}

/// Counters produced by one backfill execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillStats {
    pub threads: u64,
    pub messages: u64,
    pub errors: u64,
    pub duration_ms: u64,
}

/// Terminal or in-flight status of the most recent backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BackfillStatus {
    Running { holder: String, started_at_ms: i64 },
    Ok { stats: BackfillStats },
    Error { error_code: String, error_message: String, duration_ms: u64 },
}

impl BackfillStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Durable per-account backfill metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<BackfillStatus>,
}
