use lighter_resilience::config::RateLimitConfig;
use lighter_resilience::{ManualClock, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

fn limiter(capacity: f64, rate: f64) -> (Arc<RateLimiter>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let limiter = RateLimiter::new(RateLimitConfig::new(capacity, rate), clock.clone()).unwrap();
    (Arc::new(limiter), clock)
}

#[test]
fn test_burst_of_five_then_one_per_second() {
    let (limiter, clock) = limiter(5.0, 1.0);

    let admitted: Vec<bool> = (0..6).map(|_| limiter.admit("checkout")).collect();
    assert_eq!(admitted, vec![true, true, true, true, true, false]);

    clock.advance(Duration::from_secs(1));
    assert!(limiter.admit("checkout"));
    assert!(!limiter.admit("checkout"));
}

#[test]
fn test_long_idle_period_does_not_exceed_capacity() {
    let (limiter, clock) = limiter(3.0, 10.0);
    for _ in 0..3 {
        assert!(limiter.admit("k"));
    }

    clock.advance(Duration::from_secs(3600));

    let admitted = (0..10).filter(|_| limiter.admit("k")).count();
    assert_eq!(admitted, 3);
}

#[test]
fn test_admissions_over_time_are_bounded() {
    // Over T seconds at most capacity + rate * T requests pass
    let (limiter, clock) = limiter(4.0, 2.0);
    let mut admitted = 0;

    for _ in 0..100 {
        admitted += (0..5).filter(|_| limiter.admit("bounded")).count();
        clock.advance(Duration::from_millis(100));
    }

    // 10 seconds elapsed in total
    assert!(admitted <= 4 + 2 * 10, "admitted {}", admitted);
    assert!(admitted >= 4 + 2 * 9, "admitted {}", admitted);
}

#[tokio::test]
async fn test_concurrent_tasks_share_one_bucket() {
    let (limiter, _) = limiter(25.0, 0.0001);

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { (0..10).filter(|_| limiter.admit("shared")).count() })
        })
        .collect();

    let admitted: usize = futures_util::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .sum();
    assert_eq!(admitted, 25);
}
