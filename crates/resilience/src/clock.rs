//! Time sources for breaker timing and idempotency retention
//!
//! Breakers compare monotonic [`Instant`]s to decide when an open circuit may
//! probe again; idempotency records carry wall-clock [`SystemTime`]s so they
//! can outlive the process in an external store. Both are read through
//! [`Clock`] so tests can step time with [`MockClock`].
//!
//! ```
//! use std::time::{Duration, UNIX_EPOCH};
//!
//! use pulsearc_resilience::clock::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let opened = clock.now();
//! clock.advance(Duration::from_secs(5));
//! assert_eq!(clock.now().duration_since(opened), Duration::from_secs(5));
//! assert_eq!(clock.age(UNIX_EPOCH), Duration::from_secs(5));
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

pub trait Clock: Send + Sync + 'static {
    /// Monotonic time for breaker state durations.
    fn now(&self) -> Instant;

    /// Wall-clock time for stored records.
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time elapsed since `timestamp`; zero if it lies ahead.
    fn age(&self, timestamp: SystemTime) -> Duration {
        self.system_time().duration_since(timestamp).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to.
///
/// Clones share one offset, so the copy handed to a breaker or store follows
/// every `advance` made from the test body. Wall-clock time starts at the
/// anchor given to [`MockClock::at`] (the UNIX epoch by default).
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    anchor: SystemTime,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::at(UNIX_EPOCH)
    }

    /// Mock clock whose wall-clock time starts at `anchor`.
    pub fn at(anchor: SystemTime) -> Self {
        Self { origin: Instant::now(), anchor, offset: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock();
        *offset = offset.saturating_add(duration);
    }

    /// Total time advanced so far.
    pub fn offset(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + self.offset()
    }

    fn system_time(&self) -> SystemTime {
        self.anchor + self.offset()
    }
}
