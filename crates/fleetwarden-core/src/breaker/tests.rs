use super::*;
use fleetwarden_types::models::{BreakerConfig, CircuitState};

fn fast_config() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 5,
        success_threshold: 2,
        open_timeout_ms: 40,
        monitoring_period_ms: 300_000,
        half_open_max_attempts: 3,
    }
}

#[test]
fn test_opens_exactly_once_at_threshold() {
    let breaker = CircuitBreaker::new(fast_config());
    let mut events = breaker.subscribe();

    for i in 0..4 {
        breaker.record_failure("acc1", &format!("error {i}"));
        assert_eq!(breaker.get_state("acc1"), CircuitState::Closed);
    }
    breaker.record_failure("acc1", "error 5");
    assert_eq!(breaker.get_state("acc1"), CircuitState::Open);
    assert_eq!(breaker.total_trips(), 1);

    // Further failures while open do not re-trigger the transition
    breaker.record_failure("acc1", "error 6");
    breaker.record_failure("acc1", "error 7");
    assert_eq!(breaker.total_trips(), 1);

    let event = events.try_recv().expect("transition event");
    assert_eq!(event.from, CircuitState::Closed);
    assert_eq!(event.to, CircuitState::Open);
    assert!(events.try_recv().is_err(), "only one open event expected");
}

#[test]
fn test_never_allowed_while_open_before_timeout() {
    let breaker = CircuitBreaker::new(fast_config());
    for _ in 0..5 {
        breaker.record_failure("acc1", "boom");
    }

    let decision = breaker.can_execute("acc1");
    assert!(!decision.allowed);
    assert_eq!(decision.state, CircuitState::Open);
    let retry = decision.retry_after_ms.expect("retry hint");
    assert!(retry > 0 && retry <= 40);
    assert_eq!(decision.reason.as_deref(), Some("Circuit is open"));
}

#[test]
fn test_timeout_admits_caller_as_half_open_trial() {
    let breaker = CircuitBreaker::new(fast_config());
    for _ in 0..5 {
        breaker.record_failure("acc1", "boom");
    }
    std::thread::sleep(std::time::Duration::from_millis(50));

    let decision = breaker.can_execute("acc1");
    assert!(decision.allowed);
    assert_eq!(decision.state, CircuitState::HalfOpen);
    assert_eq!(breaker.get_state("acc1"), CircuitState::HalfOpen);
}

#[test]
fn test_half_open_trial_limit() {
    let breaker = CircuitBreaker::new(fast_config());
    for _ in 0..5 {
        breaker.record_failure("acc1", "boom");
    }
    std::thread::sleep(std::time::Duration::from_millis(50));

    // Three trials total: the transition check plus two more
    assert!(breaker.can_execute("acc1").allowed);
    assert!(breaker.can_execute("acc1").allowed);
    assert!(breaker.can_execute("acc1").allowed);

    let decision = breaker.can_execute("acc1");
    assert!(!decision.allowed);
    assert_eq!(decision.reason.as_deref(), Some("Half-open trial limit reached"));
}

#[test]
fn test_failure_during_half_open_reopens() {
    let breaker = CircuitBreaker::new(fast_config());
    for _ in 0..5 {
        breaker.record_failure("acc1", "boom");
    }
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(breaker.can_execute("acc1").allowed);

    // A success first does not protect the episode
    breaker.record_success("acc1");
    breaker.record_failure("acc1", "still broken");
    assert_eq!(breaker.get_state("acc1"), CircuitState::Open);

    // opened_at was reset: still rejected right away
    assert!(!breaker.can_execute("acc1").allowed);
}

#[test]
fn test_success_threshold_closes_circuit() {
    let breaker = CircuitBreaker::new(fast_config());
    for _ in 0..5 {
        breaker.record_failure("acc1", "boom");
    }
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(breaker.can_execute("acc1").allowed);

    breaker.record_success("acc1");
    assert_eq!(breaker.get_state("acc1"), CircuitState::HalfOpen);
    breaker.record_success("acc1");
    assert_eq!(breaker.get_state("acc1"), CircuitState::Closed);

    // Counters cleared: one failure does not reopen
    breaker.record_failure("acc1", "late");
    assert_eq!(breaker.get_state("acc1"), CircuitState::Closed);
}

#[test]
fn test_success_resets_closed_failure_window() {
    let breaker = CircuitBreaker::new(fast_config());
    breaker.record_failure("acc1", "a");
    breaker.record_failure("acc1", "b");
    breaker.record_success("acc1");
    for _ in 0..4 {
        breaker.record_failure("acc1", "c");
    }
    assert_eq!(breaker.get_state("acc1"), CircuitState::Closed);
}

#[test]
fn test_rolling_window_prunes_old_failures() {
    let mut config = fast_config();
    config.monitoring_period_ms = 30;
    let breaker = CircuitBreaker::new(config);

    for _ in 0..4 {
        breaker.record_failure("acc1", "early");
    }
    std::thread::sleep(std::time::Duration::from_millis(40));
    // Early failures aged out of the window; this is failure #1 again
    breaker.record_failure("acc1", "late");
    assert_eq!(breaker.get_state("acc1"), CircuitState::Closed);
}

#[test]
fn test_force_open_and_close_are_idempotent() {
    let breaker = CircuitBreaker::new(fast_config());
    let mut events = breaker.subscribe();

    breaker.force_open("acc1", "maintenance");
    breaker.force_open("acc1", "maintenance again");
    assert_eq!(breaker.get_state("acc1"), CircuitState::Open);
    assert!(events.try_recv().is_ok());
    assert!(events.try_recv().is_err(), "second force_open must not emit");

    breaker.force_close("acc1", "done");
    breaker.force_close("acc1", "done again");
    assert_eq!(breaker.get_state("acc1"), CircuitState::Closed);
    assert!(events.try_recv().is_ok());
    assert!(events.try_recv().is_err(), "second force_close must not emit");
}

#[test]
fn test_health_reflects_window_and_state() {
    let breaker = CircuitBreaker::new(fast_config());
    breaker.record_success("acc1");
    breaker.record_success("acc1");
    breaker.record_failure("acc1", "x");
    breaker.record_failure("acc1", "y");

    let health = breaker.health("acc1");
    assert_eq!(health.state, CircuitState::Closed);
    assert_eq!(health.recent_failures, 2);
    assert_eq!(health.recent_successes, 2);
    assert!((health.failure_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(health.health_score, 50);

    for _ in 0..3 {
        breaker.record_failure("acc1", "z");
    }
    let health = breaker.health("acc1");
    assert_eq!(health.state, CircuitState::Open);
    assert_eq!(health.health_score, 0);
}

#[test]
fn test_summary_counts_states() {
    let breaker = CircuitBreaker::new(fast_config());
    breaker.record_success("a");
    breaker.force_open("b", "op");
    for _ in 0..5 {
        breaker.record_failure("c", "boom");
    }

    let summary = breaker.summary();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.closed, 1);
    assert_eq!(summary.open, 2);
    assert_eq!(summary.half_open, 0);
    assert_eq!(summary.total_trips, 1);
}
