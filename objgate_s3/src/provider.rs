use std::sync::Arc;

use objgate::{DynStorageClient, StaticCredentials, StorageError, StorageProvider};

use crate::{S3Config, S3Store};

/// Provider for generic S3-compatible services, registered as `s3`.
///
/// Endpoints use the path-style format understood by [`S3Config::from_endpoint`].
#[derive(Clone, Copy, Debug, Default)]
pub struct S3Provider;

impl S3Provider {
    pub const NAME: &'static str = "s3";

    pub const fn new() -> Self {
        Self
    }
}

impl StorageProvider for S3Provider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn build(
        &self,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        token: &str,
    ) -> Result<DynStorageClient, StorageError> {
        let creds = StaticCredentials::new(access_key, secret_key, token);
        creds.validate()?;
        let config = S3Config::from_endpoint(endpoint, creds)?;
        let store = S3Store::new(config).map_err(StorageError::config_load)?;
        Ok(Arc::new(store) as DynStorageClient)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use objgate::StorageClient as _;

    use super::*;

    #[test]
    fn test_build_from_endpoint() {
        let client = S3Provider::new()
            .build("http://localhost:9000/bucket", "ak", "sk", "")
            .unwrap();
        assert_eq!(client.kind(), S3Store::KIND);
        assert_eq!(client.describe(), "s3://localhost/bucket");
    }

    #[test]
    fn test_build_rejects_bad_input() {
        let err = S3Provider::new().build("", "ak", "sk", "").unwrap_err();
        assert!(err.is_invalid_endpoint());

        let err = S3Provider::new()
            .build("http://localhost:9000/bucket", "ak", "", "")
            .unwrap_err();
        assert!(matches!(err, StorageError::ConfigLoad(_)), "{err}");
    }
}
