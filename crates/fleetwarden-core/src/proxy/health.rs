//! Background proxy health checking.
//!
//! Each enabled proxy is probed against a fixed external endpoint
//! through its own proxied client. Latency and failures are recorded in
//! the pool's health map; proxies that fail repeatedly are disabled the
//! same way transport-reported failures disable them.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fleetwarden_types::models::ProxyStatus;
use tracing::{debug, info, warn};

use super::ProxyManager;
use crate::now_ms;

impl ProxyManager {
    /// Start the periodic health checker. Returns the task handle.
    pub fn start_health_checker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut shutdown_rx = manager.shutdown_tx.subscribe();
        let interval = Duration::from_millis(manager.config.health_check_interval_ms);

        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Proxy health checker started");
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        manager.check_all().await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Proxy health checker shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Probe every enabled proxy once, sequentially with a small gap so
    /// the probe target never sees a burst from this instance.
    pub async fn check_all(&self) {
        let ids: Vec<String> = {
            let proxies = self.proxies.read();
            proxies.values().filter(|p| p.enabled).map(|p| p.proxy_id.clone()).collect()
        };

        for proxy_id in ids {
            self.check_one(&proxy_id).await;
            tokio::time::sleep(Duration::from_millis(1_000)).await;
        }
    }

    /// Probe a single proxy and record the outcome.
    pub async fn check_one(&self, proxy_id: &str) {
        let Some(endpoint) = self.proxies.read().get(proxy_id).map(|p| p.endpoint.clone()) else {
            return;
        };

        self.stats.health_checks.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let result = self.probe_endpoint(&endpoint).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                let mut health = self.health.write();
                if let Some(entry) = health.get_mut(proxy_id) {
                    entry.last_check_ms = now_ms();
                    entry.status = ProxyStatus::Healthy;
                    entry.latency_ms = latency_ms;
                    entry.consecutive_failures = 0;
                }
                debug!(proxy_id = %proxy_id, latency_ms, "Proxy health check passed");
            },
            Err(e) => {
                {
                    let mut health = self.health.write();
                    if let Some(entry) = health.get_mut(proxy_id) {
                        entry.last_check_ms = now_ms();
                        entry.status = ProxyStatus::Unhealthy;
                        entry.latency_ms = latency_ms;
                    }
                }
                warn!(proxy_id = %proxy_id, error = %e, "Proxy health check failed");
                self.record_proxy_failure(proxy_id);
            },
        }
    }

    async fn probe_endpoint(&self, endpoint: &str) -> Result<(), String> {
        let proxy = reqwest::Proxy::all(endpoint).map_err(|e| e.to_string())?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(Duration::from_millis(self.config.health_check_timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;

        let response =
            client.get(&self.config.test_url).send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("probe returned status {}", response.status()))
        }
    }
}
