//! Fleet composition: one injectable service object owning the
//! per-account reliability components and the wiring between them.
//!
//! Transport events feed the health monitor and circuit breaker; the
//! breaker gates whether an account may act at all; the rate limiter
//! gates outbound sends; the proxy manager supplies egress and hears
//! about failures. Constructed once per process and shared by
//! reference.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use fleetwarden_types::models::{AgeClass, CircuitHealth, FleetConfig, HealthSnapshot};
use fleetwarden_types::SendError;
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::health::{HealthEvent, HealthMonitor};
use crate::limiter::{OutboundSender, QueuedMessage, RateLimiter, SendCheck};
use crate::proxy::ProxyManager;
use crate::telemetry::FleetStats;
use crate::transport::{ThrottleSeverity, Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connected,
    Disconnected,
}

/// The per-process reliability layer for all accounts.
pub struct FleetService {
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    proxies: Arc<ProxyManager>,
    monitor: Arc<HealthMonitor>,
    connections: DashMap<String, ConnState>,
}

impl FleetService {
    pub fn new(config: &FleetConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
        let proxies = ProxyManager::new(config.proxy.clone());
        let monitor = Arc::new(HealthMonitor::new(config.monitor.clone()));

        let sender = Arc::new(GatedSender {
            breaker: Arc::clone(&breaker),
            proxies: Arc::clone(&proxies),
            monitor: Arc::clone(&monitor),
            transport,
        });
        let limiter = Arc::new(RateLimiter::new(config.limiter.clone(), sender));

        Arc::new(Self { breaker, limiter, proxies, monitor, connections: DashMap::new() })
    }

    /// Bring an account under management.
    pub fn register_account(&self, account_id: &str, age: AgeClass) {
        self.monitor.register_account(account_id);
        self.limiter.init_account(account_id, age);
        self.connections.insert(account_id.to_string(), ConnState::Disconnected);
        info!(account_id = %account_id, age = %age, "Account registered");
    }

    /// Drop an account from management entirely.
    pub fn remove_account(&self, account_id: &str) {
        self.monitor.unregister_account(account_id);
        self.limiter.remove(account_id);
        self.breaker.remove(account_id);
        self.proxies.unassign(account_id);
        self.connections.remove(account_id);
        info!(account_id = %account_id, "Account removed");
    }

    /// Feed one transport event into the monitor, breaker, and limiter.
    /// Returns true when the event marks a fresh connection (the
    /// caller's cue to schedule an initial backfill).
    pub fn handle_event(&self, account_id: &str, event: TransportEvent) -> bool {
        debug!(account_id = %account_id, event = ?event, "Transport event");
        match event {
            TransportEvent::Connected => {
                self.monitor.record_event(account_id, HealthEvent::Connect);
                let previous =
                    self.connections.insert(account_id.to_string(), ConnState::Connected);
                previous != Some(ConnState::Connected)
            },
            TransportEvent::Disconnected { reason } => {
                self.monitor.record_event(account_id, HealthEvent::Disconnect);
                if let Some(reason) = reason {
                    self.monitor.record_event(account_id, HealthEvent::Error { message: reason });
                }
                self.connections.insert(account_id.to_string(), ConnState::Disconnected);
                false
            },
            TransportEvent::MessageReceived { .. } => false,
            TransportEvent::Latency { ms } => {
                self.monitor.record_event(account_id, HealthEvent::Latency { ms });
                false
            },
            TransportEvent::SendSucceeded { .. } => {
                self.monitor.record_event(account_id, HealthEvent::MessageSent);
                self.breaker.record_success(account_id);
                false
            },
            TransportEvent::SendFailed { error, .. } => {
                self.monitor.record_event(account_id, HealthEvent::MessageFailed);
                self.monitor
                    .record_event(account_id, HealthEvent::Error { message: error.clone() });
                self.breaker.record_failure(account_id, &error);
                false
            },
            TransportEvent::Throttled { status } => {
                self.limiter.handle_rate_limit(account_id, ThrottleSeverity::from_status(status));
                false
            },
        }
    }

    /// Enqueue an outbound send, rejecting fast when the breaker or an
    /// active backoff already rules it out.
    pub fn queue_send(
        &self,
        account_id: &str,
        recipient: &str,
        payload: &str,
        priority: i32,
    ) -> Result<Uuid, SendError> {
        let decision = self.breaker.can_execute(account_id);
        if !decision.allowed {
            return Err(SendError::CircuitOpen {
                account_id: account_id.to_string(),
                retry_after_ms: decision.retry_after_ms.unwrap_or(0),
            });
        }
        if let SendCheck::Blocked { reason, retry_after_ms } =
            self.limiter.can_send_now(account_id, recipient)
        {
            // Backoff means the queue would sit on it anyway; tell the
            // caller instead of buffering silently
            if reason == "In backoff period" {
                return Err(SendError::RateLimited { reason, retry_after_ms });
            }
        }
        Ok(self.limiter.queue_message(account_id, recipient, payload, priority))
    }

    pub fn connected_account_ids(&self) -> Vec<String> {
        self.connections
            .iter()
            .filter(|e| *e.value() == ConnState::Connected)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn health_snapshot(&self, account_id: &str) -> Option<HealthSnapshot> {
        self.monitor.snapshot(account_id)
    }

    pub fn circuit_health(&self, account_id: &str) -> CircuitHealth {
        self.breaker.health(account_id)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn proxies(&self) -> &Arc<ProxyManager> {
        &self.proxies
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }
}

impl FleetStats for FleetService {
    fn connected_count(&self) -> usize {
        self.connections.iter().filter(|e| *e.value() == ConnState::Connected).count()
    }

    fn reconnecting_count(&self) -> usize {
        self.connections.iter().filter(|e| *e.value() == ConnState::Disconnected).count()
    }

    fn queue_depth(&self) -> usize {
        self.limiter.total_queue_depth()
    }
}

/// The limiter's sender: re-checks the breaker, resolves egress, sends,
/// and records the outcome everywhere it matters.
struct GatedSender {
    breaker: Arc<CircuitBreaker>,
    proxies: Arc<ProxyManager>,
    monitor: Arc<HealthMonitor>,
    transport: Arc<dyn Transport>,
}

#[async_trait]
impl OutboundSender for GatedSender {
    async fn send(&self, account_id: &str, message: &QueuedMessage) -> Result<(), SendError> {
        let decision = self.breaker.can_execute(account_id);
        if !decision.allowed {
            return Err(SendError::CircuitOpen {
                account_id: account_id.to_string(),
                retry_after_ms: decision.retry_after_ms.unwrap_or(0),
            });
        }

        let egress = self.proxies.endpoint_for(account_id);
        let result = self
            .transport
            .send(account_id, &message.recipient, &message.payload, egress.as_ref())
            .await;

        match result {
            Ok(()) => {
                self.breaker.record_success(account_id);
                self.monitor.record_event(account_id, HealthEvent::MessageSent);
                Ok(())
            },
            Err(error) => {
                self.breaker.record_failure(account_id, &error);
                self.monitor.record_event(account_id, HealthEvent::MessageFailed);
                self.monitor
                    .record_event(account_id, HealthEvent::Error { message: error.clone() });
                self.proxies.handle_proxy_failure(account_id, &error);
                Err(SendError::TransportFailed { message: error })
            },
        }
    }
}

/// Connected-account directory view for the backfill scheduler.
pub struct FleetDirectory {
    fleet: Arc<FleetService>,
}

impl FleetDirectory {
    pub fn new(fleet: Arc<FleetService>) -> Arc<Self> {
        Arc::new(Self { fleet })
    }
}

#[async_trait]
impl crate::backfill::AccountDirectory for FleetDirectory {
    async fn connected_accounts(&self) -> Vec<String> {
        self.fleet.connected_account_ids()
    }
}
