//! Tests for retry policy module

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
        2.0,
    )
    .without_jitter()
}

// ============================================================================
// Delay Calculation Tests
// ============================================================================

#[test]
fn test_retry_policy_default_values() {
    let policy = RetryPolicy::default();

    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.initial_delay, Duration::from_millis(200));
    assert_eq!(policy.max_delay, Duration::from_secs(5));
    assert_eq!(policy.backoff_multiplier, 2.0);
    assert!(policy.use_jitter);
    assert_eq!(policy.total_attempts(), 4);
}

#[test]
fn test_calculate_delay_without_jitter_grows_and_caps() {
    let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(6), 2.0)
        .without_jitter();

    assert_eq!(policy.calculate_delay(0), Duration::from_secs(1));
    assert_eq!(policy.calculate_delay(1), Duration::from_secs(2));
    assert_eq!(policy.calculate_delay(2), Duration::from_secs(4));
    assert_eq!(policy.calculate_delay(3), Duration::from_secs(6));
    assert_eq!(policy.calculate_delay(9), Duration::from_secs(6));
}

#[test]
fn test_calculate_delay_with_jitter_stays_in_range() {
    let policy = RetryPolicy::new(5, Duration::from_secs(4), Duration::from_secs(60), 2.0);

    for _ in 0..50 {
        let delay = policy.calculate_delay(0).as_secs_f64();
        assert!((3.0..=5.0).contains(&delay), "delay {} out of range", delay);
    }
}

#[test]
fn test_jitter_percent_is_clamped() {
    let policy = RetryPolicy::default().with_jitter_percent(3.0);
    assert_eq!(policy.jitter_percent, 1.0);
}

#[test]
fn test_retry_hint_sets_a_floor_bounded_by_max_delay() {
    let policy =
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(2), 2.0).without_jitter();
    let timeout = QueueError::Timeout {
        duration: Duration::from_secs(30),
    };
    let dropped = QueueError::ConnectionFailed {
        message: "reset".to_string(),
    };
    let busy = QueueError::ServiceError {
        status: 503,
        code: "ServerBusy".to_string(),
        message: "busy".to_string(),
    };

    assert_eq!(policy.delay_for(0, &timeout), Duration::from_secs(1));
    assert_eq!(policy.delay_for(0, &dropped), Duration::from_secs(2));
    assert_eq!(policy.delay_for(0, &busy), Duration::from_millis(1));
}

#[test]
fn test_should_retry_respects_max_attempts() {
    let policy = RetryPolicy::default();

    assert!(policy.should_retry(0));
    assert!(policy.should_retry(2));
    assert!(!policy.should_retry(3));
    assert!(!RetryPolicy::no_retry().should_retry(0));
}

// ============================================================================
// Execute Tests
// ============================================================================

mod execute {
    use super::*;

    #[tokio::test]
    async fn test_success_is_returned_immediately() {
        let calls = &AtomicU32::new(0);

        let result = fast_policy(3)
            .execute("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, QueueError>(7)
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_until_success() {
        let calls = &AtomicU32::new(0);

        let result = fast_policy(3)
            .execute("op", move || async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < 2 {
                    Err(QueueError::ConnectionFailed {
                        message: "reset".to_string(),
                    })
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_waits_at_least_the_hinted_delay() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(
            1,
            Duration::from_millis(1),
            Duration::from_millis(60),
            2.0,
        )
        .without_jitter();
        let started = std::time::Instant::now();

        let result = policy
            .execute("op", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(QueueError::Timeout {
                        duration: Duration::from_secs(30),
                    })
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = fast_policy(3)
            .execute("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(QueueError::QueueNotFound {
                    queue_name: "orders".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = fast_policy(2)
            .execute("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(QueueError::ServiceError {
                    status: 503,
                    code: "ServerBusy".to_string(),
                    message: "busy".to_string(),
                })
            })
            .await;

        assert!(matches!(
            result,
            Err(QueueError::ServiceError { status: 503, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
