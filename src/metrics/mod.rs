//! Counters emitted by the resilience components
//!
//! Components record through the `metrics` facade, so nothing is exported
//! until a recorder is installed. [`ResilienceMetrics`] installs the
//! Prometheus recorder and renders the text exposition.

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::config::ResilienceSettings;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Clone)]
pub struct ResilienceMetrics {
    prometheus_handle: PrometheusHandle,
}

impl ResilienceMetrics {
    /// Install the process-wide Prometheus recorder, or reuse the one
    /// installed earlier
    pub fn install() -> Result<Self, BuildError> {
        Self::with_config(None)
    }

    /// Install the recorder if `metrics.enabled` is set
    ///
    /// Returns `None` when metrics are disabled. Counters recorded by the
    /// components are then dropped by the facade's no-op recorder.
    pub fn from_settings(settings: &ResilienceSettings) -> Result<Option<Self>, BuildError> {
        if !settings.metrics.enabled {
            tracing::debug!("Metrics disabled, no recorder installed");
            return Ok(None);
        }
        Self::with_config(Some(settings)).map(Some)
    }

    pub fn with_config(settings: Option<&ResilienceSettings>) -> Result<Self, BuildError> {
        if let Some(handle) = PROMETHEUS_HANDLE.get() {
            return Ok(Self {
                prometheus_handle: handle.clone(),
            });
        }

        let builder = PrometheusBuilder::new();

        let builder = match settings {
            Some(cfg) if cfg.metrics.global_labels => builder
                .add_global_label("service", cfg.app.name.clone())
                .add_global_label("environment", cfg.app.environment.clone()),
            _ => builder,
        };

        match builder.install_recorder() {
            Ok(handle) => {
                Self::describe_metrics();
                let handle = PROMETHEUS_HANDLE.get_or_init(|| handle).clone();
                Ok(Self {
                    prometheus_handle: handle,
                })
            }
            // Lost the race against another installer in this process
            Err(err) => PROMETHEUS_HANDLE
                .get()
                .cloned()
                .map(|handle| Self {
                    prometheus_handle: handle,
                })
                .ok_or(err),
        }
    }

    fn describe_metrics() {
        describe_counter!(
            "rate_limit_decisions_total",
            "Rate limiter admission decisions"
        );
        describe_counter!(
            "circuit_breaker_transitions_total",
            "Circuit breaker state transitions"
        );
        describe_counter!(
            "circuit_breaker_calls_total",
            "Calls observed by circuit breakers, by outcome"
        );
        describe_counter!(
            "idempotency_lookups_total",
            "Idempotency ledger begin outcomes"
        );
        describe_counter!(
            "invoker_executions_total",
            "Protected executions, by terminal outcome"
        );
    }

    // Prometheus export
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

impl std::fmt::Debug for ResilienceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceMetrics").finish_non_exhaustive()
    }
}

pub(crate) fn record_rate_limit_decision(admitted: bool) {
    let decision = if admitted { "admitted" } else { "rejected" };
    counter!("rate_limit_decisions_total", "decision" => decision).increment(1);
}

pub(crate) fn record_breaker_transition(name: &str, from: &'static str, to: &'static str) {
    counter!(
        "circuit_breaker_transitions_total",
        "circuit_breaker" => name.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
}

pub(crate) fn record_breaker_call(name: &str, outcome: &'static str) {
    counter!(
        "circuit_breaker_calls_total",
        "circuit_breaker" => name.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub(crate) fn record_ledger_lookup(outcome: &'static str) {
    counter!("idempotency_lookups_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_execution(outcome: &'static str) {
    counter!("invoker_executions_total", "outcome" => outcome).increment(1);
}
