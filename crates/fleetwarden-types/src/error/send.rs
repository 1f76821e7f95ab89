//! Outbound-send errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced when an outbound send is rejected or fails.
///
/// Rejections carry a `retry_after_ms` hint so callers can requeue
/// instead of hammering a gate that will keep refusing them.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum SendError {
    /// The account's circuit breaker is open
    #[error("Circuit open for {account_id}, retry after {retry_after_ms}ms")]
    CircuitOpen { account_id: String, retry_after_ms: u64 },

    /// A proactive rate limit or active backoff refused the send
    #[error("Rate limited: {reason}, retry after {retry_after_ms}ms")]
    RateLimited { reason: String, retry_after_ms: u64 },

    /// The queued message exhausted its retry budget and was dropped
    #[error("Message to {recipient} dropped after {attempts} attempts: {reason}")]
    Dropped { recipient: String, attempts: u32, reason: String },

    /// The transport reported a delivery failure
    #[error("Transport failure: {message}")]
    TransportFailed { message: String },

    /// The account has no limiter state yet
    #[error("Account {account_id} not registered")]
    AccountUnknown { account_id: String },
}

impl SendError {
    /// Retry hint in milliseconds, when the error carries one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::CircuitOpen { retry_after_ms, .. } | Self::RateLimited { retry_after_ms, .. } => {
                Some(*retry_after_ms)
            },
            _ => None,
        }
    }

    /// Whether the failure should count against the account's circuit.
    pub fn should_trip_circuit(&self) -> bool {
        matches!(self, Self::TransportFailed { .. })
    }
}
