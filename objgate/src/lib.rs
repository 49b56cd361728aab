//! Pluggable object storage.
//!
//! Backends implement [`StorageClient`] and are constructed by a named
//! [`StorageProvider`] from an endpoint string plus static credentials.
//! A [`ProviderRegistry`] resolves providers by name at runtime.

pub mod endpoint;
mod error;
mod provider;
mod registry;
mod store;
mod types;
pub mod wrapper;

pub use self::{
    endpoint::{Endpoint, HostConvention, Scheme},
    error::{Capability, Outcome, StorageError},
    provider::{ConstructorFn, FnProvider, StaticCredentials, StorageProvider},
    registry::ProviderRegistry,
    store::{DynStorageClient, PutBuilder, StorageClient, StorageClientExt},
    types::*,
};
