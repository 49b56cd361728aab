//! S3 backend for objgate.
//!
//! [`S3Store`] talks to any S3-compatible service. It is used directly by the
//! `s3` provider and wrapped by vendor adapters such as `objgate_wasabi`.

mod config;
mod provider;
mod store;
mod transport;
mod util;

pub use self::{
    config::{PayloadSigning, S3Config, UrlStyle},
    provider::S3Provider,
    store::S3Store,
    transport::shared_client,
    util::parse_object_headers,
};
