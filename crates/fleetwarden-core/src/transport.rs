//! Transport collaborator trait and its typed event stream.
//!
//! The actual protocol client (pairing, encryption, framing) lives
//! outside this crate. It delivers connection lifecycle and delivery
//! events as [`TransportEvent`]s and accepts sends through [`Transport`],
//! with the egress endpoint chosen by the proxy manager.

use async_trait::async_trait;
use fleetwarden_types::models::ProxyRecord;
use serde::{Deserialize, Serialize};

/// Events emitted by a transport connection, consumed by the health
/// monitor, circuit breaker, and rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    Connected,
    Disconnected {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    MessageReceived {
        from: String,
    },
    Latency {
        ms: u64,
    },
    SendSucceeded {
        recipient: String,
    },
    SendFailed {
        recipient: String,
        error: String,
    },
    /// Provider-side throttling was reported for this account
    Throttled {
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },
}

/// Severity of a provider throttle signal, selecting the backoff base.
///
/// Transports report throttling with a status code but no formal
/// severity; this mapping makes the classification explicit instead of
/// leaving it to each caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleSeverity {
    /// Transient pushback (timeouts, connection-level throttles)
    Low,
    /// Explicit rate limiting (429)
    #[default]
    Medium,
    /// Provider pushback that precedes bans (403, persistent 5xx)
    High,
}

impl ThrottleSeverity {
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(408) | Some(425) => Self::Low,
            Some(429) => Self::Medium,
            Some(403) => Self::High,
            Some(code) if code >= 500 => Self::High,
            _ => Self::Medium,
        }
    }
}

/// Outbound message delivery through the external protocol client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `payload` to `recipient` on the account's session, via
    /// the given egress when one is assigned. Errors are transient
    /// transport failures; the caller records them and retries through
    /// normal paths.
    async fn send(
        &self,
        account_id: &str,
        recipient: &str,
        payload: &str,
        egress: Option<&ProxyRecord>,
    ) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(ThrottleSeverity::from_status(Some(429)), ThrottleSeverity::Medium);
        assert_eq!(ThrottleSeverity::from_status(Some(403)), ThrottleSeverity::High);
        assert_eq!(ThrottleSeverity::from_status(Some(503)), ThrottleSeverity::High);
        assert_eq!(ThrottleSeverity::from_status(Some(408)), ThrottleSeverity::Low);
        assert_eq!(ThrottleSeverity::from_status(None), ThrottleSeverity::Medium);
    }
}
