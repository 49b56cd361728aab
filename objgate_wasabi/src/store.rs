use bytes::Bytes;
use url::Url;

use objgate::{
    Capability, DownloadUrlArgs, Endpoint, HostConvention, KeyPage, ListArgs, ObjectMeta,
    ObjectMetaPage, Outcome, Put, StaticCredentials, StorageClient, StorageError, ValueStream,
};
use objgate_s3::{PayloadSigning, S3Config, S3Store, UrlStyle};

/// Wasabi hosts are `<bucket>.s3.<region>.wasabisys.com`.
const CONVENTION: HostConvention = HostConvention::new(2);

/// Wasabi object storage.
///
/// A thin adapter over [`S3Store`]: Wasabi needs virtual-host addressing,
/// rejects signed payload hashes and does not support changing the storage
/// class.
#[derive(Clone, Debug)]
pub struct WasabiStore {
    inner: S3Store,
    endpoint: Endpoint,
    safe_uri: Url,
}

impl WasabiStore {
    /// The kind of this store (see [`StorageClient::kind`]).
    pub const KIND: &'static str = "objgate.wasabi";

    /// Build a client from a virtual-hosted endpoint and static credentials.
    ///
    /// An empty `token` means non-session credentials.
    pub fn new(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        token: &str,
    ) -> Result<Self, StorageError> {
        let parsed = CONVENTION.parse(endpoint)?;
        let config = Self::s3_config(&parsed, StaticCredentials::new(access_key, secret_key, token))?;
        let inner = S3Store::new(config).map_err(StorageError::config_load)?;

        let safe_uri = Url::parse(&format!("wasabi://{}/", parsed.bucket))
            .map_err(|e| StorageError::invalid_endpoint(endpoint, e))?;

        tracing::debug!(
            bucket = %parsed.bucket,
            region = %parsed.region,
            base_url = %parsed.base_url_string(),
            "created wasabi client"
        );

        Ok(Self {
            inner,
            endpoint: parsed,
            safe_uri,
        })
    }

    /// Configuration of the underlying S3 client for `endpoint`.
    pub fn s3_config(
        endpoint: &Endpoint,
        credentials: StaticCredentials,
    ) -> Result<S3Config, StorageError> {
        credentials.validate()?;
        let mut config = S3Config::new(
            endpoint.base_url()?,
            endpoint.bucket.clone(),
            endpoint.region.clone(),
            credentials,
        );
        config.url_style = UrlStyle::VirtualHost;
        config.payload_signing = PayloadSigning::Unsigned;
        config.max_attempts = 1;
        Ok(config)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn inner(&self) -> &S3Store {
        &self.inner
    }
}

#[async_trait::async_trait]
impl StorageClient for WasabiStore {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn safe_uri(&self) -> &Url {
        &self.safe_uri
    }

    async fn healthcheck(&self) -> Result<(), anyhow::Error> {
        self.inner.healthcheck().await
    }

    async fn meta(&self, key: &str) -> Result<Option<ObjectMeta>, anyhow::Error> {
        self.inner.meta(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, anyhow::Error> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> Result<Option<ValueStream>, anyhow::Error> {
        self.inner.get_stream(key).await
    }

    async fn get_with_meta(&self, key: &str) -> Result<Option<(Bytes, ObjectMeta)>, anyhow::Error> {
        self.inner.get_with_meta(key).await
    }

    async fn generate_download_url(
        &self,
        args: DownloadUrlArgs,
    ) -> Result<Outcome<Url>, anyhow::Error> {
        self.inner.generate_download_url(args).await
    }

    async fn send_put(&self, put: Put) -> Result<ObjectMeta, anyhow::Error> {
        self.inner.send_put(put).await
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), anyhow::Error> {
        self.inner.delete_prefix(prefix).await
    }

    async fn list(&self, args: ListArgs) -> Result<ObjectMetaPage, anyhow::Error> {
        self.inner.list(args).await
    }

    async fn list_keys(&self, args: ListArgs) -> Result<KeyPage, anyhow::Error> {
        self.inner.list_keys(args).await
    }

    fn set_storage_class(&self, _class: &str) -> Result<Outcome<()>, anyhow::Error> {
        Ok(Outcome::NotSupported(Capability::StorageClass))
    }
}

#[cfg(test)]
mod tests {
    use objgate::Scheme;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_new_from_endpoint() {
        let store = WasabiStore::new("mybucket.s3.us-east-1.example.com", "AK", "SK", "").unwrap();
        let endpoint = store.endpoint();
        assert_eq!(endpoint.scheme, Scheme::Https);
        assert_eq!(endpoint.bucket, "mybucket");
        assert_eq!(endpoint.region, "us-east-1");
        assert_eq!(endpoint.base_url_string(), "https://s3.us-east-1.example.com");

        assert_eq!(store.inner().bucket_name(), "mybucket");
        assert_eq!(store.inner().region(), "us-east-1");
        assert_eq!(
            store.inner().base_url().as_str(),
            "https://mybucket.s3.us-east-1.example.com/"
        );
        assert_eq!(store.inner().payload_signing(), PayloadSigning::Unsigned);
        assert_eq!(store.inner().max_attempts(), 1);
    }

    #[test]
    fn test_s3_config() {
        let endpoint = CONVENTION
            .parse("http://data.s3.eu-central-2.example.com:8080")
            .unwrap();
        let config = WasabiStore::s3_config(&endpoint, StaticCredentials::new("AK", "SK", "TOK"))
            .unwrap();
        assert_eq!(config.url.as_str(), "http://s3.eu-central-2.example.com:8080/");
        assert_eq!(config.bucket, "data");
        assert_eq!(config.region, "eu-central-2");
        assert_eq!(config.url_style, UrlStyle::VirtualHost);
        assert_eq!(config.payload_signing, PayloadSigning::Unsigned);
        assert_eq!(config.max_attempts, 1);
        assert!(!config.is_tls());
        assert_eq!(config.credentials.token.as_deref(), Some("TOK"));
    }

    #[test]
    fn test_describe() {
        let store = WasabiStore::new("mybucket.s3.us-east-1.example.com", "", "", "").unwrap();
        assert_eq!(store.describe(), "wasabi://mybucket/");
        assert_eq!(store.safe_uri().as_str(), "wasabi://mybucket/");
    }

    #[test]
    fn test_invalid_endpoint_yields_no_client() {
        for raw in [
            "",
            "mybucket",
            "mybucket.s3",
            ".s3.us-east-1.example.com",
            "ftp://mybucket.s3.us-east-1.example.com",
        ] {
            let err = WasabiStore::new(raw, "AK", "SK", "").unwrap_err();
            assert!(err.is_invalid_endpoint(), "{raw}: {err}");
        }
    }

    #[test]
    fn test_incomplete_credentials() {
        let err = WasabiStore::new("mybucket.s3.us-east-1.example.com", "AK", "", "").unwrap_err();
        assert!(matches!(err, StorageError::ConfigLoad(_)), "{err}");
    }

    #[test]
    fn test_set_storage_class_not_supported() {
        let store = WasabiStore::new("mybucket.s3.us-east-1.example.com", "AK", "SK", "").unwrap();
        for class in ["", "STANDARD", "GLACIER", "not a class"] {
            let out = store.set_storage_class(class).unwrap();
            assert_eq!(out, Outcome::NotSupported(Capability::StorageClass));
        }
        assert_eq!(store.inner().storage_class(), None);
    }

    #[tokio::test]
    #[test_log::test]
    async fn test_download_url_is_virtual_hosted() {
        let store = WasabiStore::new("mybucket.s3.us-east-1.example.com", "AK", "SK", "").unwrap();
        let url = store
            .generate_download_url(DownloadUrlArgs::new(
                "a/b.txt",
                std::time::Duration::from_secs(60),
            ))
            .await
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(url.host_str(), Some("mybucket.s3.us-east-1.example.com"));
        assert_eq!(url.path(), "/a/b.txt");
    }
}
