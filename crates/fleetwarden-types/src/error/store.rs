//! Document store errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when talking to the durable document store.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum StoreError {
    /// Underlying storage I/O or connectivity failure
    #[error("Store backend error: {message}")]
    Backend { message: String },

    /// Transaction lost a write race and could not be retried
    #[error("Transaction conflict on {path}")]
    Conflict { path: String },

    /// Document content could not be (de)serialized
    #[error("Serialization error at {path}: {message}")]
    Serde { path: String, message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }

    pub fn serde(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serde { path: path.into(), message: message.into() }
    }
}
