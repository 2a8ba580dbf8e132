use lighter_resilience::config::{ResilienceSettings, WithDefaults};
use lighter_resilience::resilience::errors_are_failures;
use lighter_resilience::{ResilientInvoker, SystemClock};
use std::sync::Arc;

#[tokio::test]
async fn test_protected_call_is_exported() {
    let settings = ResilienceSettings::with_defaults();
    let invoker: ResilientInvoker<String, std::io::Error> =
        ResilientInvoker::from_config(&settings, Arc::new(SystemClock), errors_are_failures())
            .await
            .unwrap();

    for _ in 0..2 {
        invoker
            .execute("client", "metrics-op", "search", || async { Ok("hit".to_string()) })
            .await
            .unwrap();
    }

    let output = invoker
        .metrics()
        .expect("metrics are enabled by default")
        .render();
    assert!(output.contains("rate_limit_decisions_total"));
    assert!(output.contains("circuit_breaker_calls_total"));
    assert!(output.contains("idempotency_lookups_total"));
    assert!(output.contains("invoker_executions_total"));
    assert!(output.contains("outcome=\"replayed\""));
    assert!(output.contains("service=\"lighter-resilience\""));
}
