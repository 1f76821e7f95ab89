//! Configuration errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum ConfigError {
    /// A field holds a value outside its valid range
    #[error("Invalid config field '{field}': {message}")]
    Invalid { field: String, message: String },

    /// Configuration file could not be read or parsed
    #[error("Failed to load config from {path}: {message}")]
    Load { path: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid { field: field.into(), message: message.into() }
    }
}
