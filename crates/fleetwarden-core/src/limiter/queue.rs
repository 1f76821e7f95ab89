//! Per-account outbound queue and its drain worker.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error};
use uuid::Uuid;

use fleetwarden_types::models::LimiterConfig;

use super::state::AccountState;
use super::{LimiterEvent, OutboundSender, SendCheck};

/// One outbound message awaiting dispatch.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub recipient: String,
    pub payload: String,
    pub priority: i32,
    pub enqueued_at_ms: i64,
    pub attempts: u32,
}

/// Heap entry: higher priority first, then enqueue order.
pub(super) struct PendingMessage {
    pub message: QueuedMessage,
    pub seq: u64,
}

impl PartialEq for PendingMessage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingMessage {}

impl PartialOrd for PendingMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: larger priority wins; among equals, smaller seq wins.
        self.message
            .priority
            .cmp(&other.message.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Shared per-account limiter entry: throttle state plus the queue.
pub(super) struct AccountEntry {
    pub state: Mutex<AccountState>,
    pub queue: Mutex<BinaryHeap<PendingMessage>>,
    pub notify: Notify,
    pub worker_started: AtomicBool,
    pub seq: AtomicU64,
}

impl AccountEntry {
    pub fn new(state: AccountState) -> Self {
        Self {
            state: Mutex::new(state),
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            worker_started: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        }
    }

    pub fn push(&self, message: QueuedMessage) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.queue.lock().push(PendingMessage { message, seq });
        self.notify.notify_one();
    }

    /// Re-insert a message while keeping its original queue position.
    fn push_back(&self, pending: PendingMessage) {
        self.queue.lock().push(pending);
    }

    fn pop(&self) -> Option<PendingMessage> {
        self.queue.lock().pop()
    }

    pub fn depth(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Drain loop: pops the highest-priority message, re-checks the limits,
/// sends when permitted, sleeps (capped) when blocked, and requeues
/// failed sends up to the attempt budget.
pub(super) async fn drain_worker(
    account_id: String,
    entry: Arc<AccountEntry>,
    config: LimiterConfig,
    sender: Arc<dyn OutboundSender>,
    events: broadcast::Sender<LimiterEvent>,
) {
    debug!(account_id = %account_id, "Queue drain worker started");
    loop {
        let Some(mut pending) = entry.pop() else {
            entry.notify.notified().await;
            continue;
        };

        let check = {
            let mut state = entry.state.lock();
            state.can_send_now(&config, &pending.message.recipient, crate::now_ms())
        };

        match check {
            SendCheck::Allowed => {
                pending.message.attempts += 1;
                match sender.send(&account_id, &pending.message).await {
                    Ok(()) => {
                        let mut state = entry.state.lock();
                        state.record_message(&config, &pending.message.recipient, crate::now_ms());
                    },
                    Err(e) => {
                        if pending.message.attempts < config.max_send_attempts {
                            debug!(
                                account_id = %account_id,
                                message_id = %pending.message.id,
                                attempts = pending.message.attempts,
                                error = %e,
                                "Send failed, requeueing"
                            );
                            entry.push_back(pending);
                        } else {
                            error!(
                                account_id = %account_id,
                                message_id = %pending.message.id,
                                recipient = %pending.message.recipient,
                                attempts = pending.message.attempts,
                                error = %e,
                                "Message dropped after exhausting retries"
                            );
                            let _ = events.send(LimiterEvent::MessageDropped {
                                account_id: account_id.clone(),
                                message_id: pending.message.id,
                                recipient: pending.message.recipient.clone(),
                                attempts: pending.message.attempts,
                                reason: e.to_string(),
                            });
                        }
                    },
                }
            },
            SendCheck::Blocked { retry_after_ms, .. } => {
                entry.push_back(pending);
                let wait = retry_after_ms.min(config.max_queue_wait_ms).max(1);
                tokio::time::sleep(Duration::from_millis(wait)).await;
            },
        }
    }
}
