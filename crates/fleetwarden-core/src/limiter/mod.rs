//! Adaptive per-account rate limiting with priority queueing.
//!
//! Limits are selected by account age class and layered: an active
//! provider backoff, then hourly/daily/burst/min-delay account caps,
//! then per-recipient caps. Blocked sends buffer in a per-account
//! priority queue drained by a single worker; provider-reported
//! throttling stacks an exponential backoff on top of the proactive
//! caps.

mod queue;
mod state;

#[cfg(test)]
mod tests;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use fleetwarden_types::models::{AgeClass, LimiterConfig};
use fleetwarden_types::SendError;

pub use queue::QueuedMessage;
use queue::{drain_worker, AccountEntry};
use state::AccountState;

use crate::now_ms;
use crate::transport::ThrottleSeverity;

/// Destination for permitted sends, implemented by the fleet composition.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send(&self, account_id: &str, message: &QueuedMessage) -> Result<(), SendError>;
}

/// Observable limiter events.
#[derive(Debug, Clone)]
pub enum LimiterEvent {
    /// Provider throttling triggered a backoff
    BackoffApplied { account_id: String, severity: ThrottleSeverity, backoff_ms: u64 },
    /// A queued message exhausted its retry budget
    MessageDropped {
        account_id: String,
        message_id: Uuid,
        recipient: String,
        attempts: u32,
        reason: String,
    },
}

/// Result of a proactive limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendCheck {
    Allowed,
    Blocked { reason: String, retry_after_ms: u64 },
}

impl SendCheck {
    fn blocked(reason: &str, retry_after_ms: u64) -> Self {
        Self::Blocked { reason: reason.to_string(), retry_after_ms }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, SendCheck::Allowed)
    }
}

/// Operator-facing queue status for one account.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStatus {
    pub account_id: String,
    pub queued: usize,
    pub rate_limit_hits: u32,
    pub backoff_remaining_ms: u64,
    pub age_class: AgeClass,
}

/// Manages throttle state and outbound queues for all accounts.
pub struct RateLimiter {
    config: LimiterConfig,
    accounts: DashMap<String, Arc<AccountEntry>>,
    sender: Arc<dyn OutboundSender>,
    events: broadcast::Sender<LimiterEvent>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig, sender: Arc<dyn OutboundSender>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { config, accounts: DashMap::new(), sender, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LimiterEvent> {
        self.events.subscribe()
    }

    /// Register an account with its age class. Idempotent.
    pub fn init_account(&self, account_id: &str, age: AgeClass) {
        self.accounts
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(AccountEntry::new(AccountState::new(age))));
    }

    /// Update an account's age class (e.g. when it crosses 7/30 days).
    pub fn set_age_class(&self, account_id: &str, age: AgeClass) {
        if let Some(entry) = self.accounts.get(account_id) {
            entry.state.lock().age = age;
        }
    }

    /// Check whether a send to `recipient` is permitted right now.
    pub fn can_send_now(&self, account_id: &str, recipient: &str) -> SendCheck {
        self.can_send_now_at(account_id, recipient, now_ms())
    }

    pub(crate) fn can_send_now_at(
        &self,
        account_id: &str,
        recipient: &str,
        now_ms: i64,
    ) -> SendCheck {
        match self.accounts.get(account_id) {
            Some(entry) => entry.state.lock().can_send_now(&self.config, recipient, now_ms),
            None => SendCheck::blocked("Account not initialized", 1_000),
        }
    }

    /// Record a completed send into all relevant windows.
    pub fn record_message(&self, account_id: &str, recipient: &str) {
        self.record_message_at(account_id, recipient, now_ms());
    }

    pub(crate) fn record_message_at(&self, account_id: &str, recipient: &str, now_ms: i64) {
        if let Some(entry) = self.accounts.get(account_id) {
            entry.state.lock().record_message(&self.config, recipient, now_ms);
        }
    }

    /// Queue a message for dispatch, starting the account's drain worker
    /// on first use. Returns the message id.
    pub fn queue_message(
        &self,
        account_id: &str,
        recipient: &str,
        payload: &str,
        priority: i32,
    ) -> Uuid {
        let entry = Arc::clone(
            &self
                .accounts
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(AccountEntry::new(AccountState::new(AgeClass::default())))),
        );

        let message = QueuedMessage {
            id: Uuid::new_v4(),
            recipient: recipient.to_string(),
            payload: payload.to_string(),
            priority,
            enqueued_at_ms: now_ms(),
            attempts: 0,
        };
        let id = message.id;
        entry.push(message);

        if !entry.worker_started.swap(true, Ordering::SeqCst) {
            tokio::spawn(drain_worker(
                account_id.to_string(),
                entry,
                self.config.clone(),
                Arc::clone(&self.sender),
                self.events.clone(),
            ));
        }
        id
    }

    /// React to provider-side throttling: grow the account's backoff
    /// exponentially with repeated hits.
    pub fn handle_rate_limit(&self, account_id: &str, severity: ThrottleSeverity) {
        let base_ms = match severity {
            ThrottleSeverity::Low => 60_000,
            ThrottleSeverity::Medium => 300_000,
            ThrottleSeverity::High => 1_800_000,
        };

        let Some(entry) = self.accounts.get(account_id) else {
            warn!(account_id = %account_id, "Rate limit reported for unknown account");
            return;
        };

        let backoff_ms = entry.state.lock().apply_backoff(base_ms, now_ms());
        info!(
            account_id = %account_id,
            severity = ?severity,
            backoff_ms,
            "Provider rate limit detected, backing off"
        );
        let _ = self.events.send(LimiterEvent::BackoffApplied {
            account_id: account_id.to_string(),
            severity,
            backoff_ms,
        });
    }

    pub fn queue_status(&self, account_id: &str) -> Option<QueueStatus> {
        let entry = self.accounts.get(account_id)?;
        let state = entry.state.lock();
        Some(QueueStatus {
            account_id: account_id.to_string(),
            queued: entry.depth(),
            rate_limit_hits: state.rate_limit_hits,
            backoff_remaining_ms: state.backoff_remaining_ms(now_ms()),
            age_class: state.age,
        })
    }

    /// Total queued messages across all accounts (heartbeat payload).
    pub fn total_queue_depth(&self) -> usize {
        self.accounts.iter().map(|e| e.depth()).sum()
    }

    /// Drop all state for an account that left the fleet.
    pub fn remove(&self, account_id: &str) {
        self.accounts.remove(account_id);
    }
}
