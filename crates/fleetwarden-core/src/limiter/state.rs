//! Per-account throttle state and the ordered limit checks.

use std::collections::HashMap;

use fleetwarden_types::models::{AgeClass, LimitTier, LimiterConfig};

use super::SendCheck;

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;

/// Per-recipient counters, preventing one recipient from being spammed
/// even when the account still has budget.
#[derive(Debug, Default)]
pub(super) struct RecipientState {
    hour_window: Vec<i64>,
    day_window: Vec<i64>,
    last_send_ms: i64,
}

/// Throttle state for one account.
#[derive(Debug)]
pub(super) struct AccountState {
    pub age: AgeClass,
    hour_window: Vec<i64>,
    day_window: Vec<i64>,
    burst_window: Vec<i64>,
    last_send_ms: i64,
    pub rate_limit_hits: u32,
    pub backoff_until_ms: i64,
    recipients: HashMap<String, RecipientState>,
}

impl AccountState {
    pub fn new(age: AgeClass) -> Self {
        Self {
            age,
            hour_window: Vec::new(),
            day_window: Vec::new(),
            burst_window: Vec::new(),
            last_send_ms: 0,
            rate_limit_hits: 0,
            backoff_until_ms: 0,
            recipients: HashMap::new(),
        }
    }

    fn tier<'a>(&self, config: &'a LimiterConfig) -> &'a LimitTier {
        match self.age {
            AgeClass::New => &config.new,
            AgeClass::Normal => &config.normal,
            AgeClass::Established => &config.established,
        }
    }

    fn prune(&mut self, config: &LimiterConfig, now_ms: i64) {
        let burst_window = self.tier(config).burst_window_ms as i64;
        self.hour_window.retain(|&ts| now_ms - ts < HOUR_MS);
        self.day_window.retain(|&ts| now_ms - ts < DAY_MS);
        self.burst_window.retain(|&ts| now_ms - ts < burst_window);
    }

    /// Check all limits in order; the first violation wins.
    pub fn can_send_now(
        &mut self,
        config: &LimiterConfig,
        recipient: &str,
        now_ms: i64,
    ) -> SendCheck {
        // Active provider backoff outranks the proactive caps
        if self.backoff_until_ms > now_ms {
            return SendCheck::blocked(
                "In backoff period",
                (self.backoff_until_ms - now_ms) as u64,
            );
        }

        self.prune(config, now_ms);
        let tier = self.tier(config).clone();

        if self.hour_window.len() >= tier.messages_per_hour {
            let retry = HOUR_MS - (now_ms - self.hour_window[0]);
            return SendCheck::blocked("Hourly limit reached", retry.max(1) as u64);
        }

        if self.day_window.len() >= tier.messages_per_day {
            let retry = DAY_MS - (now_ms - self.day_window[0]);
            return SendCheck::blocked("Daily limit reached", retry.max(1) as u64);
        }

        if self.burst_window.len() >= tier.burst_size {
            let retry = tier.burst_window_ms as i64 - (now_ms - self.burst_window[0]);
            return SendCheck::blocked("Burst limit reached", retry.max(1) as u64);
        }

        if now_ms - self.last_send_ms < tier.min_delay_ms as i64 {
            let retry = tier.min_delay_ms as i64 - (now_ms - self.last_send_ms);
            return SendCheck::blocked("Minimum delay not met", retry.max(1) as u64);
        }

        self.check_recipient(config, recipient, now_ms)
    }

    fn check_recipient(
        &mut self,
        config: &LimiterConfig,
        recipient: &str,
        now_ms: i64,
    ) -> SendCheck {
        let limits = &config.recipient;
        let state = self.recipients.entry(recipient.to_string()).or_default();

        state.hour_window.retain(|&ts| now_ms - ts < HOUR_MS);
        state.day_window.retain(|&ts| now_ms - ts < DAY_MS);

        if state.hour_window.len() >= limits.messages_per_hour {
            let retry = HOUR_MS - (now_ms - state.hour_window[0]);
            return SendCheck::blocked("Recipient hourly limit reached", retry.max(1) as u64);
        }

        if state.day_window.len() >= limits.messages_per_day {
            let retry = DAY_MS - (now_ms - state.day_window[0]);
            return SendCheck::blocked("Recipient daily limit reached", retry.max(1) as u64);
        }

        if now_ms - state.last_send_ms < limits.min_delay_ms as i64 {
            let retry = limits.min_delay_ms as i64 - (now_ms - state.last_send_ms);
            return SendCheck::blocked("Recipient minimum delay not met", retry.max(1) as u64);
        }

        SendCheck::Allowed
    }

    /// Stamp a completed send into every relevant window.
    pub fn record_message(&mut self, config: &LimiterConfig, recipient: &str, now_ms: i64) {
        self.hour_window.push(now_ms);
        self.day_window.push(now_ms);
        self.burst_window.push(now_ms);
        self.last_send_ms = now_ms;

        let state = self.recipients.entry(recipient.to_string()).or_default();
        state.hour_window.push(now_ms);
        state.day_window.push(now_ms);
        state.last_send_ms = now_ms;

        self.prune(config, now_ms);
    }

    /// Apply an exponential backoff after provider-side throttling.
    /// Returns the backoff duration in milliseconds.
    pub fn apply_backoff(&mut self, base_ms: u64, now_ms: i64) -> u64 {
        self.rate_limit_hits += 1;
        let exponent = self.rate_limit_hits.saturating_sub(1).min(5);
        let backoff_ms = base_ms.saturating_mul(1u64 << exponent);
        self.backoff_until_ms = now_ms + backoff_ms as i64;
        backoff_ms
    }

    pub fn backoff_remaining_ms(&self, now_ms: i64) -> u64 {
        (self.backoff_until_ms - now_ms).max(0) as u64
    }
}
