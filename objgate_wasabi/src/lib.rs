//! Wasabi backend for objgate.
//!
//! Endpoints are virtual-hosted: `[scheme://]<bucket>.s3.<region>.wasabisys.com`.

mod provider;
mod store;

pub use self::{provider::WasabiProvider, store::WasabiStore};
