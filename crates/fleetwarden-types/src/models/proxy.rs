//! Proxy pool model types.

use serde::{Deserialize, Serialize};

/// One egress endpoint in the proxy pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub proxy_id: String,
    /// Normalized endpoint URL (http://, https://, socks5://)
    pub endpoint: String,
    /// Sticky proxies are exempt from rotation
    pub sticky: bool,
    pub enabled: bool,
}

/// Probe status of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// Health-check bookkeeping for one proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyHealth {
    pub last_check_ms: i64,
    pub status: ProxyStatus,
    pub latency_ms: u64,
    /// Consecutive failures since the last success
    pub consecutive_failures: u32,
    pub last_failure_ms: i64,
}

/// Operator-facing view of one proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySnapshot {
    pub proxy_id: String,
    pub endpoint: String,
    pub sticky: bool,
    pub enabled: bool,
    pub health: ProxyHealth,
    pub assigned_accounts: usize,
}
