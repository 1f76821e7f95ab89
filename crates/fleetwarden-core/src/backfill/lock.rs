//! Lease-based distributed lock, one document per account.
//!
//! Acquire writes `{owner_id, lease_expiry_ms, started_at_ms}` inside a
//! single transactional read-modify-write, only when no document exists
//! or the existing lease expired. Release deletes the document. There is
//! no renewal: a crashed holder's lease simply expires and another
//! instance picks the account up.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::now_ms;
use crate::store::{self, paths, DocumentStore, TxDecision};

/// The durable lock document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockDoc {
    pub owner_id: String,
    pub lease_expiry_ms: i64,
    pub started_at_ms: i64,
}

/// Status returned by [`BackfillLock::check`].
#[derive(Debug, Clone)]
pub enum LockStatus {
    Free,
    Held { owner_id: String, lease_expiry_ms: i64 },
}

/// Per-account backfill lock on top of the document store.
pub struct BackfillLock {
    store: Arc<dyn DocumentStore>,
}

impl BackfillLock {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Try to acquire the lock for `account_id`. Returns `true` when
    /// acquired. A held, non-expired lease (by anyone, including a
    /// previous run of this owner) means `false` — "skip this tick",
    /// never an error.
    pub async fn acquire(&self, account_id: &str, owner_id: &str, lease: Duration) -> bool {
        let path = paths::backfill_lock(account_id);
        let now = now_ms();
        let doc = LockDoc {
            owner_id: owner_id.to_string(),
            lease_expiry_ms: now + lease.as_millis() as i64,
            started_at_ms: now,
        };
        let encoded = match store::encode(&path, &doc) {
            Ok(v) => v,
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Lock encode failed");
                return false;
            },
        };

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
                        if expiry > now {
                            return TxDecision::Abort;
                        }
                    }
                    TxDecision::Write(encoded)
                }),
            )
            .await;

        match outcome {
            Ok(outcome) if outcome.committed() => {
                debug!(account_id = %account_id, owner_id = %owner_id, "Backfill lock acquired");
                true
            },
            Ok(_) => {
                debug!(account_id = %account_id, "Backfill lock busy");
                false
            },
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Backfill lock acquire failed");
                false
            },
        }
    }

    /// Release the lock by deleting the document. Best-effort: a failed
    /// release is logged and the lease expires on its own.
    pub async fn release(&self, account_id: &str) {
        let path = paths::backfill_lock(account_id);
        if let Err(e) = self.store.delete(&path).await {
            warn!(account_id = %account_id, error = %e, "Backfill lock release failed");
        } else {
            debug!(account_id = %account_id, "Backfill lock released");
        }
    }

    /// Inspect the lock without mutating it. Expired leases read as
    /// free.
    pub async fn check(&self, account_id: &str) -> LockStatus {
        let path = paths::backfill_lock(account_id);
        match self.store.get(&path).await {
            Ok(Some(value)) => {
                let doc: Result<LockDoc, _> = store::decode(&path, value);
                match doc {
                    Ok(doc) if doc.lease_expiry_ms > now_ms() => LockStatus::Held {
                        owner_id: doc.owner_id,
                        lease_expiry_ms: doc.lease_expiry_ms,
                    },
                    _ => LockStatus::Free,
                }
            },
            _ => LockStatus::Free,
        }
    }
}
