//! Retry policies and the retry loop
//!
//! - [`BackoffStrategy`]: how the delay grows per attempt
//! - [`JitterCalculator`]: per-sequence randomization of that delay
//! - [`RetryPolicy`]: immutable limits and classification, shared by calls
//! - [`RetryContext`]: mutable state of one call, never shared
//! - [`RetryExecutor`]: drives an async operation through the policy

pub mod backoff;
pub mod constants;
pub mod context;
pub mod executor;
pub mod jitter;
pub mod policy;

pub use backoff::BackoffStrategy;
pub use context::{Attempt, AttemptRecord, RetryContext};
pub use executor::{RetryExecutor, RetryOutcome};
pub use jitter::{JitterCalculator, JitterMode};
pub use policy::{RetryPolicy, RetryPolicyBuilder};
