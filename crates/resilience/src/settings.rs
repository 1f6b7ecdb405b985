//! File-backed settings
//!
//! Durations are integer milliseconds. Every section and field is optional
//! and falls back to the defaults in [`crate::retry::constants`] and
//! [`crate::circuit_breaker::config`].
//!
//! ```toml
//! [retry]
//! max_attempts = 4
//! base_delay = 200
//! max_delay = 5000
//! strategy = "exponential"
//! jitter = "full"
//! non_retryable_kinds = ["timeout"]
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! open_duration = 30000
//! half_open_max_probes = 1
//!
//! [idempotency]
//! ttl = 86400000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::config::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_HALF_OPEN_MAX_PROBES, DEFAULT_OPEN_DURATION,
};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{ConfigError, ConfigResult, ErrorKind};
use crate::executor::ResilientExecutor;
use crate::idempotency::InMemoryIdempotencyStore;
use crate::retry::constants::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
use crate::retry::{BackoffStrategy, JitterMode, RetryPolicy};
use crate::utils::serde::{duration_millis, option_duration_millis};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub jitter: JitterMode,
    pub retryable_kinds: Vec<ErrorKind>,
    pub non_retryable_kinds: Vec<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            strategy: BackoffStrategy::default(),
            jitter: JitterMode::default(),
            retryable_kinds: Vec::new(),
            non_retryable_kinds: Vec::new(),
        }
    }
}

impl RetrySettings {
    /// Validated policy built from these settings.
    pub fn to_policy(&self) -> ConfigResult<RetryPolicy> {
        let builder = RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .base_delay(self.base_delay)
            .max_delay(self.max_delay)
            .strategy(self.strategy)
            .jitter(self.jitter);
        let builder = self.retryable_kinds.iter().cloned().fold(builder, |b, kind| b.retry_on(kind));
        let builder =
            self.non_retryable_kinds.iter().cloned().fold(builder, |b, kind| b.never_retry_on(kind));
        builder.build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    #[serde(with = "duration_millis")]
    pub open_duration: Duration,
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_duration: DEFAULT_OPEN_DURATION,
            half_open_max_probes: DEFAULT_HALF_OPEN_MAX_PROBES,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_config(&self) -> ConfigResult<CircuitBreakerConfig> {
        CircuitBreakerConfig::builder()
            .failure_threshold(self.failure_threshold)
            .open_duration(self.open_duration)
            .half_open_max_probes(self.half_open_max_probes)
            .build()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdempotencySettings {
    /// Retention for stored results; absent keeps them forever
    #[serde(with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
}

impl IdempotencySettings {
    /// In-memory store honoring the configured retention.
    pub fn in_memory_store<T>(&self) -> InMemoryIdempotencyStore<T> {
        let store = InMemoryIdempotencyStore::new();
        match self.ttl {
            Some(ttl) => store.with_ttl(ttl),
            None => store,
        }
    }
}

/// All resilience settings for one dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceSettings {
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub idempotency: IdempotencySettings,
}

impl ResilienceSettings {
    /// Parse and validate settings from TOML.
    pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
        let settings: Self =
            toml::from_str(input).map_err(|err| ConfigError::Parse { message: err.to_string() })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string(self).map_err(|err| ConfigError::Parse { message: err.to_string() })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.retry.to_policy()?;
        self.circuit_breaker.to_config()?;
        Ok(())
    }

    /// Executor for `dependency` configured from these settings.
    pub fn executor(&self, dependency: impl Into<String>) -> ConfigResult<ResilientExecutor> {
        let policy = self.retry.to_policy()?;
        let breaker = CircuitBreaker::new(dependency, self.circuit_breaker.to_config()?)?;
        Ok(ResilientExecutor::new(policy, breaker))
    }
}
