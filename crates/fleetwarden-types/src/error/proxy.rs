//! Proxy pool errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during proxy pool operations.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum ProxyError {
    /// Endpoint failed validation at registration time
    #[error("Invalid proxy endpoint '{endpoint}': {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    /// No enabled proxy is available for assignment
    #[error("No available proxies: {reason}")]
    NoneAvailable { reason: String },

    /// The referenced proxy does not exist in the pool
    #[error("Proxy not found: {proxy_id}")]
    NotFound { proxy_id: String },

    /// The referenced proxy exists but is disabled
    #[error("Proxy disabled: {proxy_id}")]
    Disabled { proxy_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_endpoint() {
        let err = ProxyError::InvalidEndpoint {
            endpoint: "not-a-url".to_string(),
            message: "missing scheme".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("not-a-url"));
        assert!(msg.contains("missing scheme"));
    }
}
