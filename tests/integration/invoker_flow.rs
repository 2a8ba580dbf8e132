use lighter_resilience::config::{
    CircuitBreakerConfig, IdempotencyConfig, InvokerConfig, RateLimitConfig, ResilienceSettings,
    WithDefaults,
};
use lighter_resilience::idempotency::RecordStatus;
use lighter_resilience::resilience::errors_are_failures;
use lighter_resilience::{
    CircuitBreakerRegistry, CircuitState, IdempotencyLedger, InvokeError, LedgerKey,
    LocalLedgerStore, ManualClock, RateLimiter, ResilientInvoker, SystemClock,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reservation {
    sku: String,
    quantity: u32,
    confirmation: String,
}

#[derive(Debug, PartialEq, thiserror::Error)]
#[error("inventory service unavailable")]
struct InventoryDown;

type Invoker = ResilientInvoker<Reservation, InventoryDown>;

/// Two invokers sharing one ledger, as two service instances would
fn instances(ledger: Arc<IdempotencyLedger>) -> (Invoker, Invoker) {
    let build = || {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(RateLimitConfig::new(100.0, 100.0), clock.clone()).unwrap();
        let breakers = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            clock,
            errors_are_failures(),
        )
        .unwrap();
        ResilientInvoker::new(
            Arc::clone(&ledger),
            Arc::new(limiter),
            Arc::new(breakers),
            InvokerConfig::default(),
        )
        .unwrap()
    };
    (build(), build())
}

fn shared_ledger() -> Arc<IdempotencyLedger> {
    Arc::new(
        IdempotencyLedger::new(
            Arc::new(LocalLedgerStore::new()),
            IdempotencyConfig::default(),
            Arc::new(SystemClock),
        )
        .unwrap(),
    )
}

async fn reserve(calls: &AtomicU32) -> Result<Reservation, InventoryDown> {
    let n = calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(Reservation {
        sku: "SKU-1".to_string(),
        quantity: 2,
        confirmation: format!("CONF-{}", n),
    })
}

#[tokio::test]
async fn test_concurrent_retries_across_instances_run_once() {
    let (a, b) = instances(shared_ledger());
    let calls = AtomicU32::new(0);

    let (first, second) = tokio::join!(
        a.execute("client-7", "reserve-42", "inventory", || reserve(&calls)),
        b.execute("client-7", "reserve-42", "inventory", || reserve(&calls)),
    );

    let first = first.unwrap();
    assert_eq!(first, second.unwrap());
    assert_eq!(first.confirmation, "CONF-0");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A later retry is answered from the ledger
    let third = a
        .execute("client-7", "reserve-42", "inventory", || reserve(&calls))
        .await
        .unwrap();
    assert_eq!(third, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_many_concurrent_duplicates_produce_one_side_effect() {
    let (invoker, _) = instances(shared_ledger());
    let invoker = Arc::new(invoker);
    let calls = Arc::new(AtomicU32::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let invoker = Arc::clone(&invoker);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                invoker
                    .execute("client-9", "reserve-1", "inventory", || async move {
                        reserve(&calls).await
                    })
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures_util::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r == &results[0]));
}

#[tokio::test]
async fn test_rejections_never_leave_ledger_entries() {
    let clock = Arc::new(ManualClock::new());
    let ledger = Arc::new(
        IdempotencyLedger::new(
            Arc::new(LocalLedgerStore::new()),
            IdempotencyConfig::default(),
            clock.clone(),
        )
        .unwrap(),
    );
    let limiter = RateLimiter::new(RateLimitConfig::new(3.0, 0.001), clock.clone()).unwrap();
    let breakers = CircuitBreakerRegistry::new(
        CircuitBreakerConfig {
            window_size: 2,
            failure_rate_threshold: 50.0,
            ..CircuitBreakerConfig::default()
        },
        clock,
        errors_are_failures(),
    )
    .unwrap();
    let invoker: Invoker = ResilientInvoker::new(
        Arc::clone(&ledger),
        Arc::new(limiter),
        Arc::new(breakers),
        InvokerConfig::default(),
    )
    .unwrap();

    // Two failures open the breaker for "inventory"
    for op in ["op-1", "op-2"] {
        let result = invoker
            .execute("client", op, "inventory", || async { Err(InventoryDown) })
            .await;
        assert!(matches!(result, Err(InvokeError::Work(InventoryDown))));
    }
    assert_eq!(invoker.breakers().get("inventory").state(), CircuitState::Open);

    let open = invoker
        .execute("client", "op-3", "inventory", || async { Err(InventoryDown) })
        .await;
    assert!(matches!(open, Err(InvokeError::CircuitOpen { .. })));

    // The bucket is now empty
    let limited = invoker
        .execute("client", "op-4", "inventory", || async { Err(InventoryDown) })
        .await;
    assert!(matches!(limited, Err(InvokeError::RateLimited { .. })));

    for (op, expected) in [
        ("op-1", Some(RecordStatus::Failed)),
        ("op-2", Some(RecordStatus::Failed)),
        ("op-3", None),
        ("op-4", None),
    ] {
        let status = ledger
            .lookup(&LedgerKey::new("client", op))
            .await
            .unwrap()
            .map(|record| record.status);
        assert_eq!(status, expected, "unexpected ledger state for {}", op);
    }
}

#[tokio::test]
async fn test_cancelled_execution_can_be_retried() {
    let (invoker, _) = instances(shared_ledger());
    let calls = AtomicU32::new(0);

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        invoker.execute("client", "reserve-7", "inventory", || reserve(&calls)),
    )
    .await;
    assert!(cancelled.is_err());

    // Let the spawned resolution task run
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = invoker
        .ledger()
        .lookup(&LedgerKey::new("client", "reserve-7"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, RecordStatus::Failed);

    // Under the default retry policy the operation runs again
    let retried = invoker
        .execute("client", "reserve-7", "inventory", || reserve(&calls))
        .await
        .unwrap();
    assert_eq!(retried.confirmation, "CONF-1");
}

#[tokio::test]
async fn test_invoker_from_default_settings() {
    let settings = ResilienceSettings::with_defaults();
    let invoker: Invoker =
        ResilientInvoker::from_config(&settings, Arc::new(SystemClock), errors_are_failures())
            .await
            .unwrap();

    let result = invoker
        .execute("client", "op", "inventory", || async {
            Ok(Reservation {
                sku: "SKU-9".to_string(),
                quantity: 1,
                confirmation: "CONF-9".to_string(),
            })
        })
        .await
        .unwrap();

    assert_eq!(result.sku, "SKU-9");
    assert_eq!(invoker.limiter().len(), 1);
    assert!(invoker.breakers().contains("inventory"));
}
