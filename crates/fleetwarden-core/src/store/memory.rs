//! In-memory document store.
//!
//! Backs tests and single-instance deployments. A `BTreeMap` behind one
//! async mutex gives ordered prefix listing and makes every operation,
//! including transactions, trivially atomic.

use async_trait::async_trait;
use fleetwarden_types::StoreError;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{DocumentStore, TxDecision, TxFn, TxOutcome};

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents (test helper).
    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.lock().await.is_empty()
    }
}

fn shallow_merge(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(base), Value::Object(patch)) => {
            for (k, v) in patch {
                base.insert(k, v);
            }
        },
        (slot, incoming) => *slot = incoming,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.docs.lock().await.get(path).cloned())
    }

    async fn set(&self, path: &str, doc: Value, merge: bool) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().await;
        if merge {
            if let Some(existing) = docs.get_mut(path) {
                shallow_merge(existing, doc);
                return Ok(());
            }
        }
        docs.insert(path.to_string(), doc);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.docs.lock().await.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let docs = self.docs.lock().await;
        Ok(docs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn run_transaction(&self, path: &str, tx: TxFn) -> Result<TxOutcome, StoreError> {
        let mut docs = self.docs.lock().await;
        let current = docs.get(path);
        match tx(current) {
            TxDecision::Write(doc) => {
                docs.insert(path.to_string(), doc);
                Ok(TxOutcome::Committed)
            },
            TxDecision::Delete => {
                docs.remove(path);
                Ok(TxOutcome::Committed)
            },
            TxDecision::Abort => Ok(TxOutcome::Aborted),
        }
    }
}
