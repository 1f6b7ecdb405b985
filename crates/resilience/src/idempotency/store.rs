//! Storage for idempotent results

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};

/// Result stored under an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdempotencyRecord<T> {
    pub key: String,
    pub result: T,
    pub created_at: SystemTime,
}

/// The store could not answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for idempotency records, usually shared between processes.
///
/// `put_if_absent` must be atomic: when two writers race for one key exactly
/// one of them gets `true`. A record, once written, is never replaced.
#[async_trait]
pub trait IdempotencyStore<T>: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord<T>>, StoreError>;

    /// Store `record` unless its key already has one. Returns whether the
    /// record was written.
    async fn put_if_absent(&self, record: IdempotencyRecord<T>) -> Result<bool, StoreError>;
}

/// Process-local store backed by a `DashMap`.
///
/// With a TTL, records older than the TTL are treated as absent and may be
/// replaced; [`purge_expired`](Self::purge_expired) drops them for good.
#[derive(Debug)]
pub struct InMemoryIdempotencyStore<T, C: Clock = SystemClock> {
    records: DashMap<String, IdempotencyRecord<T>>,
    ttl: Option<Duration>,
    clock: C,
}

impl<T> InMemoryIdempotencyStore<T, SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<T> Default for InMemoryIdempotencyStore<T, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C: Clock> InMemoryIdempotencyStore<T, C> {
    pub fn with_clock(clock: C) -> Self {
        Self { records: DashMap::new(), ttl: None, clock }
    }

    /// Keep records for `ttl` only.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove expired records. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !self.is_expired(record));
        before.saturating_sub(self.records.len())
    }

    fn is_expired(&self, record: &IdempotencyRecord<T>) -> bool {
        self.ttl.is_some_and(|ttl| self.clock.age(record.created_at) >= ttl)
    }
}

#[async_trait]
impl<T, C> IdempotencyStore<T> for InMemoryIdempotencyStore<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Clock,
{
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord<T>>, StoreError> {
        Ok(self
            .records
            .get(key)
            .filter(|record| !self.is_expired(record))
            .map(|record| record.value().clone()))
    }

    async fn put_if_absent(&self, record: IdempotencyRecord<T>) -> Result<bool, StoreError> {
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(mut existing) => {
                if self.is_expired(existing.get()) {
                    existing.insert(record);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }
}
