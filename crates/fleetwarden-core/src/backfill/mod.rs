//! Distributed backfill: lease-based mutual exclusion plus the periodic
//! scheduler that orders and runs catch-up jobs per account.

mod lock;
mod scheduler;

#[cfg(test)]
mod tests;

pub use lock::{BackfillLock, LockDoc, LockStatus};
pub use scheduler::{BackfillScheduler, RunOutcome};

use async_trait::async_trait;
use fleetwarden_types::models::BackfillStats;

/// Why an account was skipped this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// This instance is already processing the account
    InFlight,
    /// A persisted `running` status points at another holder
    AlreadyRunning,
    /// A success exists within the cooldown window
    SuccessCooldown,
    /// A recent attempt is still inside the backoff window
    AttemptBackoff,
    /// The lease is held by another instance
    LeaseBusy,
}

/// Delegated history retrieval. The reliability layer owns scheduling
/// and coordination; the actual message fetching lives with the
/// platform.
#[async_trait]
pub trait BackfillRunner: Send + Sync {
    async fn run(&self, account_id: &str) -> Result<BackfillStats, String>;
}

/// Who currently holds a live connection.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn connected_accounts(&self) -> Vec<String>;
}
