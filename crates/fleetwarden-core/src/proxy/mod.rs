//! Egress proxy pool: per-account assignment, rotation, health checking.
//!
//! Every account routes through at most one proxy at a time. Assignment
//! is least-loaded; rotation picks a random different enabled, non-sticky
//! proxy. A background checker probes each enabled proxy against a fixed
//! external endpoint and disables proxies that fail repeatedly.

mod health;

#[cfg(test)]
mod tests;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use fleetwarden_types::models::{ProxyHealth, ProxyPoolConfig, ProxyRecord, ProxySnapshot};
use fleetwarden_types::ProxyError;

use crate::now_ms;

/// Parse and normalize a proxy endpoint.
///
/// Supports `http://`, `https://`, `socks5://` and `socks5h://` URLs,
/// plus the bare `host:port` shorthand which normalizes to `http://`.
/// Validation happens here, at registration, never at use.
pub fn parse_endpoint(raw: &str) -> Result<String, ProxyError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProxyError::InvalidEndpoint {
            endpoint: raw.to_string(),
            message: "empty endpoint".to_string(),
        });
    }

    if trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
        || trimmed.starts_with("socks5://")
        || trimmed.starts_with("socks5h://")
    {
        url::Url::parse(trimmed).map_err(|e| ProxyError::InvalidEndpoint {
            endpoint: trimmed.to_string(),
            message: e.to_string(),
        })?;
        return Ok(trimmed.to_string());
    }

    // Bare host:port shorthand
    let parts: Vec<&str> = trimmed.splitn(2, ':').collect();
    if parts.len() == 2 && parts[1].parse::<u16>().is_ok() {
        return Ok(format!("http://{trimmed}"));
    }

    Err(ProxyError::InvalidEndpoint {
        endpoint: trimmed.to_string(),
        message: "expected http://host:port, socks5://host:port, or host:port".to_string(),
    })
}

#[derive(Debug, Default)]
struct PoolStats {
    rotations: AtomicU64,
    failures: AtomicU64,
    health_checks: AtomicU64,
}

/// Manages the proxy pool and account-to-proxy assignments.
pub struct ProxyManager {
    config: ProxyPoolConfig,
    proxies: RwLock<HashMap<String, ProxyRecord>>,
    health: RwLock<HashMap<String, ProxyHealth>>,
    assignments: RwLock<HashMap<String, String>>,
    stats: PoolStats,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl ProxyManager {
    pub fn new(config: ProxyPoolConfig) -> Arc<Self> {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);
        Arc::new(Self {
            config,
            proxies: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            assignments: RwLock::new(HashMap::new()),
            stats: PoolStats::default(),
            shutdown_tx,
        })
    }

    /// Register a proxy. The endpoint is validated here; a malformed
    /// endpoint is rejected before it can ever be assigned.
    pub fn register(
        &self,
        proxy_id: &str,
        endpoint: &str,
        sticky: bool,
        enabled: bool,
    ) -> Result<(), ProxyError> {
        let normalized = parse_endpoint(endpoint)?;
        self.proxies.write().insert(
            proxy_id.to_string(),
            ProxyRecord { proxy_id: proxy_id.to_string(), endpoint: normalized, sticky, enabled },
        );
        self.health.write().insert(proxy_id.to_string(), ProxyHealth::default());
        info!(proxy_id = %proxy_id, sticky, enabled, "Proxy registered");
        Ok(())
    }

    /// Remove a proxy and clear any assignments pointing at it.
    pub fn remove(&self, proxy_id: &str) -> bool {
        let existed = self.proxies.write().remove(proxy_id).is_some();
        if existed {
            self.health.write().remove(proxy_id);
            self.assignments.write().retain(|_, assigned| assigned != proxy_id);
            info!(proxy_id = %proxy_id, "Proxy removed");
        }
        existed
    }

    pub fn set_enabled(&self, proxy_id: &str, enabled: bool) -> Result<(), ProxyError> {
        let mut proxies = self.proxies.write();
        let proxy = proxies
            .get_mut(proxy_id)
            .ok_or_else(|| ProxyError::NotFound { proxy_id: proxy_id.to_string() })?;
        proxy.enabled = enabled;
        if enabled {
            // Give a re-enabled proxy a clean slate
            if let Some(health) = self.health.write().get_mut(proxy_id) {
                health.consecutive_failures = 0;
            }
        }
        Ok(())
    }

    /// Assign a specific proxy to an account.
    pub fn assign(&self, account_id: &str, proxy_id: &str) -> Result<(), ProxyError> {
        let proxies = self.proxies.read();
        let proxy = proxies
            .get(proxy_id)
            .ok_or_else(|| ProxyError::NotFound { proxy_id: proxy_id.to_string() })?;
        if !proxy.enabled {
            return Err(ProxyError::Disabled { proxy_id: proxy_id.to_string() });
        }
        drop(proxies);
        self.assignments.write().insert(account_id.to_string(), proxy_id.to_string());
        info!(account_id = %account_id, proxy_id = %proxy_id, "Proxy assigned");
        Ok(())
    }

    /// Auto-assign the enabled proxy with the fewest current assignments.
    pub fn auto_assign(&self, account_id: &str) -> Result<String, ProxyError> {
        let proxies = self.proxies.read();
        let mut counts: Vec<(String, usize)> = proxies
            .values()
            .filter(|p| p.enabled)
            .map(|p| (p.proxy_id.clone(), 0usize))
            .collect();
        if counts.is_empty() {
            return Err(ProxyError::NoneAvailable { reason: "pool is empty or fully disabled".to_string() });
        }
        drop(proxies);

        {
            let assignments = self.assignments.read();
            for assigned in assignments.values() {
                if let Some(slot) = counts.iter_mut().find(|(id, _)| id == assigned) {
                    slot.1 += 1;
                }
            }
        }

        // Stable tie-break on proxy id keeps the choice deterministic
        counts.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let selected = counts[0].0.clone();
        self.assignments.write().insert(account_id.to_string(), selected.clone());
        info!(account_id = %account_id, proxy_id = %selected, "Proxy auto-assigned");
        Ok(selected)
    }

    /// Rotate an account to a random different enabled proxy.
    ///
    /// Sticky assignments are rotation-exempt: the current proxy id is
    /// returned unchanged. With no alternative available the current
    /// assignment is kept.
    pub fn rotate(&self, account_id: &str) -> Result<String, ProxyError> {
        let current = self.assignments.read().get(account_id).cloned();

        if let Some(ref current_id) = current {
            let proxies = self.proxies.read();
            if proxies.get(current_id).is_some_and(|p| p.sticky) {
                info!(account_id = %account_id, proxy_id = %current_id, "Proxy is sticky, not rotating");
                return Ok(current_id.clone());
            }
        }

        let candidates: Vec<String> = {
            let proxies = self.proxies.read();
            proxies
                .values()
                .filter(|p| p.enabled && !p.sticky && Some(&p.proxy_id) != current.as_ref())
                .map(|p| p.proxy_id.clone())
                .collect()
        };

        let Some(new_id) = candidates.choose(&mut rand::thread_rng()).cloned() else {
            return match current {
                Some(id) => {
                    warn!(account_id = %account_id, "No alternative proxy available for rotation");
                    Ok(id)
                },
                None => Err(ProxyError::NoneAvailable {
                    reason: "no enabled, non-sticky proxy to rotate to".to_string(),
                }),
            };
        };

        self.assignments.write().insert(account_id.to_string(), new_id.clone());
        self.stats.rotations.fetch_add(1, Ordering::Relaxed);
        info!(
            account_id = %account_id,
            from = ?current,
            to = %new_id,
            "Proxy rotated"
        );
        Ok(new_id)
    }

    /// The proxy record currently assigned to an account, if any.
    pub fn endpoint_for(&self, account_id: &str) -> Option<ProxyRecord> {
        let proxy_id = self.assignments.read().get(account_id).cloned()?;
        self.proxies.read().get(&proxy_id).cloned()
    }

    /// React to a transport-level failure attributed to the account's
    /// assigned proxy: count it, disable at the threshold, and rotate
    /// when configured to.
    pub fn handle_proxy_failure(&self, account_id: &str, error: &str) {
        let Some(proxy_id) = self.assignments.read().get(account_id).cloned() else {
            return;
        };

        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        let disabled = self.record_proxy_failure(&proxy_id);
        warn!(
            account_id = %account_id,
            proxy_id = %proxy_id,
            error = %error,
            disabled,
            "Proxy failure reported"
        );

        if self.config.rotate_on_failure {
            let _ = self.rotate(account_id);
        }
    }

    /// Count a failure against a proxy; disable it at the threshold.
    /// Returns whether the proxy was disabled by this call.
    fn record_proxy_failure(&self, proxy_id: &str) -> bool {
        let failures = {
            let mut health = self.health.write();
            let Some(entry) = health.get_mut(proxy_id) else { return false };
            entry.consecutive_failures += 1;
            entry.last_failure_ms = now_ms();
            entry.consecutive_failures
        };

        if failures >= self.config.max_failures {
            let mut proxies = self.proxies.write();
            if let Some(proxy) = proxies.get_mut(proxy_id) {
                if proxy.enabled {
                    proxy.enabled = false;
                    warn!(
                        proxy_id = %proxy_id,
                        failures,
                        "Proxy disabled after repeated failures"
                    );
                    return true;
                }
            }
        }
        false
    }

    /// Operator-facing pool listing.
    pub fn snapshots(&self) -> Vec<ProxySnapshot> {
        let proxies = self.proxies.read();
        let health = self.health.read();
        let assignments = self.assignments.read();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for assigned in assignments.values() {
            *counts.entry(assigned.as_str()).or_default() += 1;
        }

        let mut out: Vec<ProxySnapshot> = proxies
            .values()
            .map(|p| ProxySnapshot {
                proxy_id: p.proxy_id.clone(),
                endpoint: p.endpoint.clone(),
                sticky: p.sticky,
                enabled: p.enabled,
                health: health.get(&p.proxy_id).cloned().unwrap_or_default(),
                assigned_accounts: counts.get(p.proxy_id.as_str()).copied().unwrap_or(0),
            })
            .collect();
        out.sort_by(|a, b| a.proxy_id.cmp(&b.proxy_id));
        out
    }

    pub fn assignment_of(&self, account_id: &str) -> Option<String> {
        self.assignments.read().get(account_id).cloned()
    }

    /// Drop an account's assignment when it leaves the fleet.
    pub fn unassign(&self, account_id: &str) {
        self.assignments.write().remove(account_id);
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ProxyManager {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
