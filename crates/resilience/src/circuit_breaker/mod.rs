//! Circuit breaker: per-dependency health tracking and call gating
//!
//! A breaker is long-lived and shared by every call to one dependency. The
//! state lives in a single tagged enum behind one `parking_lot::Mutex`, and
//! all transitions are pure functions over that enum.

mod breaker;
pub mod config;
mod registry;
pub(crate) mod state;

pub use breaker::{
    Admission, CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerMetrics, CircuitOpenError,
};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use registry::CircuitBreakerRegistry;
pub use state::CircuitState;
