use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument};

use crate::clock::{Clock, SystemClock};
use crate::idempotency::store::{
    IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore, StoreError,
};
use crate::observability::{default_observer, EventKind, ResilienceEvent, ResilienceObserver};

/// Why the guard refused to hand out a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictReason {
    /// Another writer stored a result for the key first.
    #[error("another writer stored a result first")]
    LostRace,
    /// The store could not be read or written.
    #[error("idempotency store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for ConflictReason {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(message) => Self::StoreUnavailable(message),
        }
    }
}

/// Errors returned by [`IdempotencyGuard::execute`]
#[derive(Debug, Error)]
pub enum IdempotencyError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The operation ran and failed; nothing was stored.
    #[error(transparent)]
    Operation(E),

    /// The guard failed closed rather than risk a second execution.
    #[error("idempotency conflict for key '{key}': {reason}")]
    Conflict { key: String, reason: ConflictReason },
}

/// Value produced through the guard and whether it came from the store.
#[derive(Debug)]
pub(crate) struct Guarded<T> {
    pub(crate) value: T,
    pub(crate) replayed: bool,
}

/// Runs an operation at most once per idempotency key.
///
/// The first call for a key runs the operation and stores its result; later
/// calls get the stored result back without running anything. Concurrent
/// first calls in this process queue on a per-key lock, so only one of them
/// executes. Failed executions store nothing and may be retried.
///
/// When the store reports that someone else committed first, or cannot be
/// reached, the guard returns [`ConflictReason`] instead of a result that was
/// never recorded.
pub struct IdempotencyGuard<T> {
    store: Arc<dyn IdempotencyStore<T>>,
    in_flight: DashMap<String, Arc<AsyncMutex<()>>>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn ResilienceObserver>,
}

impl<T> std::fmt::Debug for IdempotencyGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard").field("in_flight", &self.in_flight.len()).finish()
    }
}

impl<T> IdempotencyGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn IdempotencyStore<T>>) -> Self {
        Self {
            store,
            in_flight: DashMap::new(),
            clock: Arc::new(SystemClock),
            observer: default_observer(),
        }
    }

    /// Guard over a fresh process-local store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryIdempotencyStore::new()))
    }

    /// Clock used to timestamp stored records.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &Arc<dyn IdempotencyStore<T>> {
        &self.store
    }

    /// Run `operation` under `key`, or return the result stored for it.
    pub async fn execute<F, Fut, E>(&self, key: &str, operation: F) -> Result<T, IdempotencyError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(key, None, operation).await.map(|guarded| guarded.value)
    }

    #[instrument(skip_all, fields(key = %key))]
    pub(crate) async fn run<F, Fut, E>(
        &self,
        key: &str,
        dependency: Option<&str>,
        operation: F,
    ) -> Result<Guarded<T>, IdempotencyError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(record) = self.lookup::<E>(key, dependency).await? {
            return Ok(self.replay(record, dependency));
        }

        let slot = InFlightSlot::acquire(&self.in_flight, key);
        let _permit = slot.lock.lock().await;

        // Whoever held the lock before us may have stored a result.
        if let Some(record) = self.lookup::<E>(key, dependency).await? {
            return Ok(self.replay(record, dependency));
        }

        let value = operation().await.map_err(IdempotencyError::Operation)?;
        let record = IdempotencyRecord {
            key: key.to_string(),
            result: value.clone(),
            created_at: self.clock.system_time(),
        };

        match self.store.put_if_absent(record).await {
            Ok(true) => {
                debug!("Stored idempotent result");
                Ok(Guarded { value, replayed: false })
            }
            Ok(false) => Err(self.conflict(key, dependency, ConflictReason::LostRace)),
            Err(error) => Err(self.conflict(key, dependency, error.into())),
        }
    }

    async fn lookup<E>(
        &self,
        key: &str,
        dependency: Option<&str>,
    ) -> Result<Option<IdempotencyRecord<T>>, IdempotencyError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.store.get(key).await.map_err(|error| self.conflict(key, dependency, error.into()))
    }

    fn replay(&self, record: IdempotencyRecord<T>, dependency: Option<&str>) -> Guarded<T> {
        self.observer
            .on_event(&ResilienceEvent::new(EventKind::IdempotentReplay).dependency(dependency));
        Guarded { value: record.result, replayed: true }
    }

    fn conflict<E>(
        &self,
        key: &str,
        dependency: Option<&str>,
        reason: ConflictReason,
    ) -> IdempotencyError<E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.observer
            .on_event(&ResilienceEvent::new(EventKind::IdempotencyConflict).dependency(dependency));
        IdempotencyError::Conflict { key: key.to_string(), reason }
    }
}

/// Shared per-key lock, removed from the map once nobody holds it.
struct InFlightSlot<'a> {
    map: &'a DashMap<String, Arc<AsyncMutex<()>>>,
    key: String,
    lock: Arc<AsyncMutex<()>>,
}

impl<'a> InFlightSlot<'a> {
    fn acquire(map: &'a DashMap<String, Arc<AsyncMutex<()>>>, key: &str) -> Self {
        let lock = Arc::clone(&map.entry(key.to_string()).or_default());
        Self { map, key: key.to_string(), lock }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        // Two references left means the map's and ours.
        self.map.remove_if(&self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}
