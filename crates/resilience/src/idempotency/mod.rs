//! Idempotent execution keyed by a caller-supplied key
//!
//! [`IdempotencyGuard`] makes retried non-idempotent operations safe: a key
//! that already has a stored result is answered from the store.
//! [`IdempotencyStore`] is the persistence seam; [`InMemoryIdempotencyStore`]
//! covers single-process use.

mod guard;
mod store;

pub(crate) use guard::Guarded;
pub use guard::{ConflictReason, IdempotencyError, IdempotencyGuard};
pub use store::{IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore, StoreError};
