use dashmap::DashMap;
use std::sync::Arc;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, FailureClassifier};
use crate::clock::Clock;
use crate::config::{CircuitBreakerConfig, ConfigError, Validate};

/// One circuit breaker per named dependency, created on first use
///
/// Breakers for different dependencies never share state. A dependency that
/// was not configured explicitly gets a breaker built from the registry
/// defaults.
pub struct CircuitBreakerRegistry<T, E> {
    breakers: DashMap<String, Arc<CircuitBreaker<T, E>>>,
    default_config: CircuitBreakerConfig,
    default_classifier: FailureClassifier<T, E>,
    clock: Arc<dyn Clock>,
}

impl<T, E> CircuitBreakerRegistry<T, E> {
    pub fn new(
        default_config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        default_classifier: FailureClassifier<T, E>,
    ) -> Result<Self, ConfigError> {
        default_config.validate()?;

        Ok(Self {
            breakers: DashMap::new(),
            default_config,
            default_classifier,
            clock,
        })
    }

    /// Install a dedicated breaker for `dependency`, replacing any existing one
    pub fn configure(
        &self,
        dependency: impl Into<String>,
        config: CircuitBreakerConfig,
        classifier: FailureClassifier<T, E>,
    ) -> Result<Arc<CircuitBreaker<T, E>>, ConfigError> {
        let dependency = dependency.into();
        let breaker = Arc::new(CircuitBreaker::new(
            dependency.clone(),
            config,
            Arc::clone(&self.clock),
            classifier,
        )?);

        tracing::debug!(circuit_breaker = %dependency, "Configured dedicated circuit breaker");
        self.breakers.insert(dependency, Arc::clone(&breaker));
        Ok(breaker)
    }

    /// Breaker guarding `dependency`
    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker<T, E>> {
        if let Some(breaker) = self.breakers.get(dependency) {
            return Arc::clone(breaker.value());
        }

        let breaker = self.breakers.entry(dependency.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::from_validated(
                dependency.to_string(),
                self.default_config.clone(),
                Arc::clone(&self.clock),
                Arc::clone(&self.default_classifier),
            ))
        });
        Arc::clone(breaker.value())
    }

    pub fn contains(&self, dependency: &str) -> bool {
        self.breakers.contains_key(dependency)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshots of every breaker created so far, sorted by dependency name
    pub fn snapshots(&self) -> Vec<(String, CircuitBreakerSnapshot)> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Reset every breaker to Closed
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}

impl<T, E> std::fmt::Debug for CircuitBreakerRegistry<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("dependencies", &self.breakers.len())
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}
