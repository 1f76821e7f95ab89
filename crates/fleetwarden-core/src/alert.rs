//! Best-effort alert dispatch with per-key throttling.
//!
//! The alerting transport (Telegram, Slack, webhook relay) is external;
//! this module only decides *whether* to send and makes sure delivery
//! failures never block the job that raised the alert.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::now_ms;

/// External alert transport: "send text notification".
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), String>;
}

/// Throttled, fire-and-forget alert dispatcher.
///
/// Repeated alerts for the same key within the throttle window are
/// suppressed so a flapping condition cannot spam operators.
pub struct AlertDispatcher {
    channel: Arc<dyn AlertChannel>,
    last_sent: DashMap<String, i64>,
    throttle: Duration,
}

impl AlertDispatcher {
    pub fn new(channel: Arc<dyn AlertChannel>, throttle: Duration) -> Self {
        Self { channel, last_sent: DashMap::new(), throttle }
    }

    /// Dispatch an alert unless the key is throttled. Returns whether a
    /// send was attempted. Delivery happens on a detached task; failures
    /// are logged, never propagated.
    pub fn dispatch(&self, key: &str, text: String) -> bool {
        let now = now_ms();
        if let Some(last) = self.last_sent.get(key) {
            let elapsed = now.saturating_sub(*last);
            if elapsed < self.throttle.as_millis() as i64 {
                debug!(alert_key = %key, elapsed_ms = elapsed, "Alert throttled");
                return false;
            }
        }
        self.last_sent.insert(key.to_string(), now);

        let channel = Arc::clone(&self.channel);
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = channel.send_text(&text).await {
                warn!(alert_key = %key, error = %e, "Alert delivery failed");
            }
        });
        true
    }

    /// Drop throttle entries older than the window (housekeeping).
    pub fn cleanup(&self) {
        let cutoff = now_ms() - self.throttle.as_millis() as i64;
        self.last_sent.retain(|_, ts| *ts >= cutoff);
    }
}
