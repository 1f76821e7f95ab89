//! Typed error definitions for Fleetwarden.
//!
//! This module provides a structured error hierarchy with specific error
//! types for different domains. All errors are designed to be:
//!
//! - **Serializable** for API responses via serde
//! - **Displayable** for logging via Display trait
//! - **Matchable** for error handling logic via enum variants
//! - **Composable** via thiserror derive macros

mod config;
mod proxy;
mod send;
mod store;

pub use config::ConfigError;
pub use proxy::ProxyError;
pub use send::SendError;
pub use store::StoreError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type that wraps all domain-specific errors.
///
/// Use this when a single error type must represent any Fleetwarden error.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "domain", content = "error")]
pub enum TypedError {
    /// Wraps an outbound-send rejection or failure
    #[error("Send error: {0}")]
    Send(#[from] SendError),

    /// Wraps a proxy pool error
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// Wraps a document store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Wraps a configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Standard Result type using TypedError.
pub type Result<T> = std::result::Result<T, TypedError>;
