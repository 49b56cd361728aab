//! Wrappers that add behaviour around any [`crate::StorageClient`].

#[cfg(feature = "trace-wrapper")]
mod trace;

#[cfg(feature = "trace-wrapper")]
pub use self::trace::TracedStorage;
