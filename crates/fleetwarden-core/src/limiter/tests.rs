use super::*;
use fleetwarden_types::models::{LimitTier, RecipientLimits};
use parking_lot::Mutex;
use std::sync::Arc;

struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    fail_times: Mutex<u32>,
}

impl RecordingSender {
    fn new() -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()), fail_times: Mutex::new(0) })
    }

    fn failing(times: u32) -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()), fail_times: Mutex::new(times) })
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait::async_trait]
impl OutboundSender for RecordingSender {
    async fn send(&self, account_id: &str, message: &QueuedMessage) -> Result<(), SendError> {
        {
            let mut fails = self.fail_times.lock();
            if *fails > 0 {
                *fails -= 1;
                return Err(SendError::TransportFailed { message: "socket reset".to_string() });
            }
        }
        self.sent.lock().push((account_id.to_string(), message.recipient.to_string()));
        Ok(())
    }
}

fn fast_config() -> LimiterConfig {
    let tier = LimitTier {
        messages_per_hour: 1_000,
        messages_per_day: 10_000,
        burst_size: 1_000,
        burst_window_ms: 60_000,
        min_delay_ms: 0,
    };
    LimiterConfig {
        new: tier.clone(),
        normal: tier.clone(),
        established: tier,
        recipient: RecipientLimits {
            messages_per_hour: 1_000,
            messages_per_day: 10_000,
            min_delay_ms: 0,
        },
        max_queue_wait_ms: 20,
        max_send_attempts: 3,
    }
}

#[test]
fn test_hourly_limit_for_new_account() {
    let limiter = RateLimiter::new(LimiterConfig::default(), RecordingSender::new());
    limiter.init_account("acc1", AgeClass::New);

    let base = 1_700_000_000_000i64;
    for i in 0..20 {
        // Spread sends so burst/min-delay gates stay out of the way
        limiter.record_message_at("acc1", &format!("peer-{i}"), base + i * 120_000);
    }

    let check = limiter.can_send_now_at("acc1", "peer-x", base + 20 * 120_000);
    match check {
        SendCheck::Blocked { reason, retry_after_ms } => {
            assert_eq!(reason, "Hourly limit reached");
            assert!(retry_after_ms > 0 && retry_after_ms <= 3_600_000);
        },
        SendCheck::Allowed => panic!("21st message within the hour must be rejected"),
    }
}

#[test]
fn test_min_delay_blocks_immediate_resend_to_recipient() {
    let limiter = RateLimiter::new(LimiterConfig::default(), RecordingSender::new());
    limiter.init_account("acc1", AgeClass::Established);

    let now = 1_700_000_000_000i64;
    limiter.record_message_at("acc1", "peer", now);

    // Immediately after: blocked (account min delay first, 1s for
    // established; recipient delay would also block)
    let check = limiter.can_send_now_at("acc1", "peer", now + 10);
    assert!(!check.is_allowed());

    // After the account delay, the recipient delay still applies
    let check = limiter.can_send_now_at("acc1", "peer", now + 1_500);
    match check {
        SendCheck::Blocked { reason, retry_after_ms } => {
            assert_eq!(reason, "Recipient minimum delay not met");
            assert!(retry_after_ms <= 5_000);
        },
        SendCheck::Allowed => panic!("recipient min delay must block"),
    }

    // A different recipient is fine once the account delay passed
    assert!(limiter.can_send_now_at("acc1", "other", now + 1_500).is_allowed());

    // And the original recipient clears after its delay
    assert!(limiter.can_send_now_at("acc1", "peer", now + 5_001).is_allowed());
}

#[test]
fn test_burst_limit() {
    let limiter = RateLimiter::new(LimiterConfig::default(), RecordingSender::new());
    limiter.init_account("acc1", AgeClass::New);

    let base = 1_700_000_000_000i64;
    // Three sends inside one burst window (min delay respected)
    for i in 0..3 {
        limiter.record_message_at("acc1", &format!("p{i}"), base + i * 4_000);
    }

    let check = limiter.can_send_now_at("acc1", "p9", base + 13_000);
    match check {
        SendCheck::Blocked { reason, .. } => assert_eq!(reason, "Burst limit reached"),
        SendCheck::Allowed => panic!("4th send within the burst window must be rejected"),
    }

    // Past the burst window the same send is allowed
    assert!(limiter.can_send_now_at("acc1", "p9", base + 61_000).is_allowed());
}

#[test]
fn test_backoff_outranks_all_other_checks() {
    let limiter = RateLimiter::new(LimiterConfig::default(), RecordingSender::new());
    limiter.init_account("acc1", AgeClass::Established);
    limiter.handle_rate_limit("acc1", ThrottleSeverity::Medium);

    let check = limiter.can_send_now("acc1", "peer");
    match check {
        SendCheck::Blocked { reason, retry_after_ms } => {
            assert_eq!(reason, "In backoff period");
            assert!(retry_after_ms > 0 && retry_after_ms <= 300_000);
        },
        SendCheck::Allowed => panic!("backoff must block sends"),
    }
}

#[test]
fn test_backoff_grows_exponentially_and_caps() {
    let limiter = RateLimiter::new(LimiterConfig::default(), RecordingSender::new());
    limiter.init_account("acc1", AgeClass::Normal);
    let mut events = limiter.subscribe();

    let expected = [60_000u64, 120_000, 240_000, 480_000, 960_000, 1_920_000, 1_920_000];
    for &want in &expected {
        limiter.handle_rate_limit("acc1", ThrottleSeverity::Low);
        match events.try_recv().expect("backoff event") {
            LimiterEvent::BackoffApplied { backoff_ms, .. } => assert_eq!(backoff_ms, want),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

#[test]
fn test_unknown_account_is_blocked() {
    let limiter = RateLimiter::new(LimiterConfig::default(), RecordingSender::new());
    assert!(!limiter.can_send_now("ghost", "peer").is_allowed());
}

#[tokio::test]
async fn test_drain_loop_sends_in_priority_order() {
    let sender = RecordingSender::new();
    let limiter = RateLimiter::new(fast_config(), sender.clone());
    limiter.init_account("acc1", AgeClass::Established);

    limiter.queue_message("acc1", "low", "msg", 0);
    limiter.queue_message("acc1", "high", "msg", 9);
    limiter.queue_message("acc1", "mid", "msg", 5);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let sent = sender.sent();
    assert_eq!(sent.len(), 3, "all queued messages should be delivered");
    let recipients: Vec<_> = sent.iter().map(|(_, r)| r.as_str()).collect();
    // The first pop races the enqueues; the remaining order is by priority
    assert!(recipients == ["high", "mid", "low"] || recipients == ["low", "high", "mid"]);
}

#[tokio::test]
async fn test_drain_loop_retries_then_drops() {
    let sender = RecordingSender::failing(10);
    let limiter = RateLimiter::new(fast_config(), sender.clone());
    limiter.init_account("acc1", AgeClass::Established);
    let mut events = limiter.subscribe();

    limiter.queue_message("acc1", "peer", "doomed", 0);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert!(sender.sent().is_empty());
    match events.try_recv().expect("drop event") {
        LimiterEvent::MessageDropped { attempts, recipient, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(recipient, "peer");
        },
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(limiter.queue_status("acc1").expect("status").queued, 0);
}

#[tokio::test]
async fn test_drain_loop_waits_out_blocked_windows() {
    let mut config = fast_config();
    config.established.min_delay_ms = 30;
    let sender = RecordingSender::new();
    let limiter = RateLimiter::new(config, sender.clone());
    limiter.init_account("acc1", AgeClass::Established);

    limiter.queue_message("acc1", "a", "1", 0);
    limiter.queue_message("acc1", "b", "2", 0);
    limiter.queue_message("acc1", "c", "3", 0);

    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    assert_eq!(sender.sent().len(), 3, "blocked sends must drain once the delay passes");
}

#[test]
fn test_queue_status_reports_depth_and_hits() {
    let limiter = RateLimiter::new(LimiterConfig::default(), RecordingSender::new());
    limiter.init_account("acc1", AgeClass::New);
    limiter.handle_rate_limit("acc1", ThrottleSeverity::High);

    let status = limiter.queue_status("acc1").expect("status");
    assert_eq!(status.rate_limit_hits, 1);
    assert!(status.backoff_remaining_ms > 0);
    assert_eq!(status.age_class, AgeClass::New);
}
