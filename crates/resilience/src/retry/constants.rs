// Defaults and bounds for retry policies
use std::time::Duration;

/// Default maximum number of attempts, first call included
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay fed into the backoff strategy
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default cap applied to every computed delay before jitter
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Minimum allowed max_attempts value
pub const MIN_MAX_ATTEMPTS: u32 = 1;

/// Maximum allowed max_attempts value
pub const MAX_MAX_ATTEMPTS: u32 = 100;
