//! Durable document storage abstraction.
//!
//! The platform's document store (key → JSON document, with transactions)
//! is an external collaborator; this trait captures exactly the surface
//! the reliability layer needs. Both distributed leases are built on
//! [`DocumentStore::run_transaction`], a single-document transactional
//! read-modify-write.

mod memory;
pub mod paths;

pub use memory::MemoryStore;

use async_trait::async_trait;
use fleetwarden_types::StoreError;
use serde_json::Value;

/// Decision returned by a transaction closure.
pub enum TxDecision {
    /// Replace the document with this value
    Write(Value),
    /// Delete the document
    Delete,
    /// Leave the document untouched
    Abort,
}

/// Outcome of a committed or aborted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    Aborted,
}

impl TxOutcome {
    pub fn committed(self) -> bool {
        matches!(self, TxOutcome::Committed)
    }
}

/// Transaction closure: observes the current document (if any) and
/// decides what to do with it, atomically.
pub type TxFn = Box<dyn FnOnce(Option<&Value>) -> TxDecision + Send>;

/// Durable key-document storage with single-document transactions.
///
/// Paths are flat strings built by [`paths`]; prefix listing is the only
/// query primitive, which the time-bucketed key scheme is designed
/// around.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, `None` when absent.
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Write a document. With `merge`, object fields are shallow-merged
    /// into the existing document instead of replacing it.
    async fn set(&self, path: &str, doc: Value, merge: bool) -> Result<(), StoreError>;

    /// Delete a document. Deleting an absent document is not an error.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// List documents whose path starts with `prefix`, ordered by path.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Atomic read-modify-write on one document.
    async fn run_transaction(&self, path: &str, tx: TxFn) -> Result<TxOutcome, StoreError>;
}

/// Deserialize a stored document into a typed struct.
pub fn decode<T: serde::de::DeserializeOwned>(path: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::serde(path, e.to_string()))
}

/// Serialize a typed struct into a storable document.
pub fn encode<T: serde::Serialize>(path: &str, doc: &T) -> Result<Value, StoreError> {
    serde_json::to_value(doc).map_err(|e| StoreError::serde(path, e.to_string()))
}
