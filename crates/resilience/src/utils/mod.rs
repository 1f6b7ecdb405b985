//! Shared helpers

#[cfg(feature = "serde")]
pub mod serde;
