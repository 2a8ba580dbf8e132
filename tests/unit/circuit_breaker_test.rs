use lighter_resilience::config::CircuitBreakerConfig;
use lighter_resilience::resilience::errors_are_failures;
use lighter_resilience::{CircuitBreaker, CircuitBreakerError, CircuitState, ManualClock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn breaker(trials: u32) -> (CircuitBreaker<&'static str, String>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let config = CircuitBreakerConfig {
        window_size: 10,
        failure_rate_threshold: 50.0,
        wait_duration_in_open_ms: 2_000,
        permitted_calls_in_half_open: trials,
        call_timeout_ms: 0,
    };
    let cb =
        CircuitBreaker::new("inventory", config, clock.clone(), errors_are_failures()).unwrap();
    (cb, clock)
}

async fn outcome(
    cb: &CircuitBreaker<&'static str, String>,
    ok: bool,
) -> Result<&'static str, CircuitBreakerError<String>> {
    cb.call(|| async move {
        if ok {
            Ok("ok")
        } else {
            Err("unavailable".to_string())
        }
    })
    .await
}

#[tokio::test]
async fn test_trips_recovers_and_closes() {
    let (cb, clock) = breaker(1);

    // Five failures then five successes fill the window at exactly 50%
    for _ in 0..5 {
        let _ = outcome(&cb, false).await;
    }
    for _ in 0..5 {
        assert!(outcome(&cb, true).await.is_ok());
    }
    assert_eq!(cb.state(), CircuitState::Open);

    // While open the operation is never invoked
    let invoked = AtomicU32::new(0);
    let rejected = cb
        .call(|| async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("never")
        })
        .await;
    assert!(matches!(rejected, Err(CircuitBreakerError::Open { ref name }) if name == "inventory"));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    clock.advance(Duration::from_millis(2_000));

    // The trial call succeeds and closes the breaker
    assert_eq!(outcome(&cb, true).await.unwrap(), "ok");
    assert_eq!(cb.state(), CircuitState::Closed);

    let snapshot = cb.snapshot();
    assert_eq!(snapshot.window_len, 0);
    assert_eq!(snapshot.total_rejections, 1);
    assert_eq!(snapshot.total_calls, 11);
    assert_eq!(snapshot.total_failures, 5);
}

#[tokio::test]
async fn test_failed_trial_reopens() {
    let (cb, clock) = breaker(2);
    for _ in 0..10 {
        let _ = outcome(&cb, false).await;
    }
    assert_eq!(cb.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(2));
    assert!(matches!(outcome(&cb, false).await, Err(CircuitBreakerError::Inner(_))));
    assert_eq!(cb.state(), CircuitState::Open);

    let snapshot = cb.snapshot();
    assert_eq!(snapshot.open_remaining, Some(Duration::from_secs(2)));
}

#[tokio::test]
async fn test_concurrent_trials_are_bounded_by_budget() {
    let (cb, clock) = breaker(2);
    let cb = Arc::new(cb);
    for _ in 0..10 {
        let _ = outcome(&cb, false).await;
    }
    clock.advance(Duration::from_secs(2));

    let invoked = Arc::new(AtomicU32::new(0));
    let calls: Vec<_> = (0..6)
        .map(|_| {
            let cb = Arc::clone(&cb);
            let invoked = Arc::clone(&invoked);
            tokio::spawn(async move {
                cb.call(|| async move {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, String>("ok")
                })
                .await
            })
        })
        .collect();

    let results = futures_util::future::join_all(calls).await;
    let rejected = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|r| matches!(r, Err(CircuitBreakerError::Open { .. })))
        .count();

    assert_eq!(invoked.load(Ordering::SeqCst), 2);
    assert_eq!(rejected, 4);
    assert_eq!(cb.state(), CircuitState::Closed);
}
