//! Server configuration loading.
//!
//! A single JSON file carries the daemon settings plus the full
//! `FleetConfig` threshold surface; anything omitted falls back to the
//! documented defaults. Validation runs once here, before any component
//! is constructed.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use fleetwarden_types::models::FleetConfig;

/// One proxy entry registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEntry {
    pub proxy_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// One account managed from startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    pub account_id: String,
    #[serde(default)]
    pub age_class: fleetwarden_types::models::AgeClass,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the transport connector service
    pub connector_url: Option<String>,
    /// Webhook receiving plain-text operator alerts
    pub alert_webhook_url: Option<String>,
    /// Proxies registered at startup
    pub proxies: Vec<ProxyEntry>,
    /// Accounts managed from startup
    pub accounts: Vec<AccountEntry>,
    /// Reliability-layer thresholds
    pub fleet: FleetConfig,
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("parsing config {}", path.display()))?
            },
            None => Self::default(),
        };
        config.fleet.validate().context("invalid fleet configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        ServerConfig::load(None).expect("defaults must be valid");
    }

    #[test]
    fn test_partial_json_parses() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "connector_url": "http://localhost:9100",
                "proxies": [{"proxy_id": "p1", "endpoint": "http://10.0.0.1:8080"}],
                "fleet": {"backfill": {"max_concurrency": 3}}
            }"#,
        )
        .expect("parse");
        assert_eq!(config.proxies.len(), 1);
        assert!(config.proxies[0].enabled);
        assert_eq!(config.fleet.backfill.max_concurrency, 3);
        assert_eq!(config.fleet.backfill.max_accounts_per_tick, 4);
    }
}
