//! Renewable leader lease.
//!
//! Unlike the backfill lock, this lease guards open-ended scheduling
//! rather than one bounded job, so the holder renews it on a shorter
//! interval than its duration and steps down when renewal keeps
//! failing. Acquire and renew both run inside the store's transactional
//! compare-and-set.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::now_ms;
use crate::store::{self, paths, DocumentStore, TxDecision};

/// The durable leader-lock document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderDoc {
    pub holder_instance_id: String,
    pub lease_expiry_ms: i64,
    pub renew_count: u64,
}

pub struct LeaderLease {
    store: Arc<dyn DocumentStore>,
    name: String,
    instance_id: String,
    lease: Duration,
}

impl LeaderLease {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        name: impl Into<String>,
        instance_id: impl Into<String>,
        lease: Duration,
    ) -> Self {
        Self { store, name: name.into(), instance_id: instance_id.into(), lease }
    }

    /// Try to take the lease: succeeds when the lock is absent, expired,
    /// or already held by this instance.
    pub async fn try_acquire(&self) -> bool {
        let path = paths::leader_lock(&self.name);
        let now = now_ms();
        let instance_id = self.instance_id.clone();
        let doc = LeaderDoc {
            holder_instance_id: instance_id.clone(),
            lease_expiry_ms: now + self.lease.as_millis() as i64,
            renew_count: 0,
        };
        let Ok(encoded) = store::encode(&path, &doc) else { return false };

        let outcome = self
            .store
            .run_transaction(
                &path,
                Box::new(move |current| {
                    if let Some(existing) = current {
                        let expiry = existing
                            .get("lease_expiry_ms")
                            .and_then(serde_json::Value::as_i64)
                            .unwrap_or(0);
                        let holder = existing
                            .get("holder_instance_id")
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or("");
                        if expiry > now && holder != instance_id {
                            return TxDecision::Abort;
                        }
                    }
                    TxDecision::Write(encoded)
                }),
            )
            .await;

        match outcome {
            Ok(outcome) if outcome.committed() => {
                info!(lock = %self.name, instance_id = %self.instance_id, "Leader lease acquired");
                true
            },
            Ok(_) => {
                debug!(lock = %self.name, "Leader lease held by another instance");
                false
            },
            Err(e) => {
                warn!(lock = %self.name, error = %e, "Leader lease acquire failed");
                false
            },
        }
    }

    /// Extend the lease. Fails when this instance no longer holds it.
    pub async fn renew(&self) -> bool {
        let path = paths::leader_lock(&self.name);
        let now = now_ms();
        let instance_id = self.instance_id.clone();
        let new_expiry = now + self.lease.as_millis() as i64;

        let outcome = self
            .store
            .run_transaction(
                &path,
                Box::new(move |current| {
                    let Some(existing) = current else { return TxDecision::Abort };
                    let holder = existing
                        .get("holder_instance_id")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("");
                    if holder != instance_id {
                        return TxDecision::Abort;
                    }
                    let renew_count = existing
                        .get("renew_count")
                        .and_then(serde_json::Value::as_u64)
                        .unwrap_or(0);
                    TxDecision::Write(serde_json::json!({
                        "holder_instance_id": instance_id,
                        "lease_expiry_ms": new_expiry,
                        "renew_count": renew_count + 1,
                    }))
                }),
            )
            .await;

        match outcome {
            Ok(outcome) if outcome.committed() => {
                debug!(lock = %self.name, "Leader lease renewed");
                true
            },
            Ok(_) => {
                warn!(lock = %self.name, instance_id = %self.instance_id, "Leader lease lost");
                false
            },
            Err(e) => {
                warn!(lock = %self.name, error = %e, "Leader lease renew failed");
                false
            },
        }
    }

    /// Give the lease up so another instance can take over immediately.
    pub async fn release(&self) {
        let path = paths::leader_lock(&self.name);
        let instance_id = self.instance_id.clone();
        let result = self
            .store
            .run_transaction(
                &path,
                Box::new(move |current| {
                    let Some(existing) = current else { return TxDecision::Abort };
                    let holder = existing
                        .get("holder_instance_id")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("");
                    if holder == instance_id {
                        TxDecision::Delete
                    } else {
                        TxDecision::Abort
                    }
                }),
            )
            .await;
        if let Err(e) = result {
            warn!(lock = %self.name, error = %e, "Leader lease release failed");
        }
    }

    pub async fn current_holder(&self) -> Option<LeaderDoc> {
        let path = paths::leader_lock(&self.name);
        let value = self.store.get(&path).await.ok()??;
        let doc: LeaderDoc = store::decode(&path, value).ok()?;
        (doc.lease_expiry_ms > now_ms()).then_some(doc)
    }
}
