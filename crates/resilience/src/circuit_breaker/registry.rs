use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::circuit_breaker::breaker::{CircuitBreaker, CircuitBreakerMetrics};
use crate::circuit_breaker::config::CircuitBreakerConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::ConfigResult;
use crate::observability::{default_observer, ResilienceObserver};

/// One shared [`CircuitBreaker`] per dependency name.
///
/// Every breaker created through the registry uses the registry's config,
/// clock and observer. Lookups for an existing name return a handle to the
/// same breaker, so health is tracked once per dependency no matter how many
/// executors call it.
pub struct CircuitBreakerRegistry<C: Clock + Clone = SystemClock> {
    config: CircuitBreakerConfig,
    clock: C,
    observer: Arc<dyn ResilienceObserver>,
    breakers: DashMap<String, CircuitBreaker<C>>,
}

impl<C: Clock + Clone> std::fmt::Debug for CircuitBreakerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

impl CircuitBreakerRegistry<SystemClock> {
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> CircuitBreakerRegistry<C> {
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, clock, observer: default_observer(), breakers: DashMap::new() })
    }

    /// Observer handed to breakers created from now on.
    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The breaker for `name`, created on first use.
    pub fn get_or_create(&self, name: &str) -> CircuitBreaker<C> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(dependency = name, "Creating circuit breaker");
                CircuitBreaker::from_parts(
                    name.to_string(),
                    self.config.clone(),
                    self.clock.clone(),
                    Arc::clone(&self.observer),
                )
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<CircuitBreaker<C>> {
        self.breakers.get(name).map(|entry| entry.clone())
    }

    pub fn remove(&self, name: &str) -> Option<CircuitBreaker<C>> {
        self.breakers.remove(name).map(|(_, breaker)| breaker)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitBreakerMetrics> {
        let mut snapshots: Vec<_> =
            self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::clock::MockClock;

    fn registry() -> CircuitBreakerRegistry<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .open_duration(Duration::from_secs(10))
            .build()
            .expect("valid config");
        CircuitBreakerRegistry::with_clock(config, MockClock::new()).expect("valid registry")
    }

    #[test]
    fn test_same_name_shares_breaker() {
        let registry = registry();
        let first = registry.get_or_create("billing");
        let second = registry.get_or_create("billing");

        first.permit().expect("admitted").record_failure();
        assert_eq!(second.state(), CircuitState::Open);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_are_isolated() {
        let registry = registry();
        registry.get_or_create("billing").permit().expect("admitted").record_failure();

        assert_eq!(registry.get_or_create("search").state(), CircuitState::Closed);
        assert!(registry.get("unknown").is_none());

        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["billing".to_string(), "search".to_string()]);
    }

    #[test]
    fn test_reset_all_and_remove() {
        let registry = registry();
        registry.get_or_create("billing").permit().expect("admitted").record_failure();
        registry.reset_all();
        assert_eq!(registry.get_or_create("billing").state(), CircuitState::Closed);

        assert!(registry.remove("billing").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CircuitBreakerConfig { failure_threshold: 0, ..Default::default() };
        assert!(CircuitBreakerRegistry::new(config).is_err());
    }
}
