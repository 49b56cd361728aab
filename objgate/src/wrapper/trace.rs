use bytes::Bytes;

use crate::{
    DownloadUrlArgs, KeyPage, ListArgs, ObjectMeta, ObjectMetaPage, Outcome, Put, StorageClient,
    ValueStream,
};

/// Wraps a [`StorageClient`] and logs every operation with `tracing`.
///
/// * Reads (meta, get, listing) are logged at `TRACE`.
/// * Writes and deletes are logged at `TRACE` when they start and at `DEBUG`
///   when they complete.
/// * Rejected capabilities are logged at `DEBUG`.
/// * Errors are logged at `ERROR`.
#[derive(Debug)]
pub struct TracedStorage<S> {
    name: String,
    inner: S,
}

impl<S> TracedStorage<S> {
    /// All log lines carry `name` in the `store` field.
    pub fn new(name: impl Into<String>, inner: S) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn failed<T>(&self, op: &str, res: Result<T, anyhow::Error>) -> Result<T, anyhow::Error> {
        if let Err(e) = &res {
            tracing::error!(store = &self.name, op, error = %e, "storage operation failed");
        }
        res
    }

    fn outcome<T>(&self, op: &str, out: &Outcome<T>) {
        if let Outcome::NotSupported(capability) = out {
            tracing::debug!(store = &self.name, op, %capability, "capability not supported");
        }
    }
}

#[async_trait::async_trait]
impl<S> StorageClient for TracedStorage<S>
where
    S: StorageClient,
{
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn safe_uri(&self) -> &url::Url {
        self.inner.safe_uri()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn healthcheck(&self) -> Result<(), anyhow::Error> {
        let res = self.failed("healthcheck", self.inner.healthcheck().await);
        if res.is_ok() {
            tracing::debug!(store = &self.name, "healthcheck::ok");
        }
        res
    }

    async fn meta(&self, key: &str) -> Result<Option<ObjectMeta>, anyhow::Error> {
        let meta = self.failed("meta", self.inner.meta(key).await)?;
        tracing::trace!(store = &self.name, key, ?meta, "meta");
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, anyhow::Error> {
        let value = self.failed("get", self.inner.get(key).await)?;
        tracing::trace!(store = &self.name, key, found = value.is_some(), "get");
        Ok(value)
    }

    async fn get_stream(&self, key: &str) -> Result<Option<ValueStream>, anyhow::Error> {
        let value = self.failed("get_stream", self.inner.get_stream(key).await)?;
        tracing::trace!(store = &self.name, key, found = value.is_some(), "get_stream");
        Ok(value)
    }

    async fn get_with_meta(&self, key: &str) -> Result<Option<(Bytes, ObjectMeta)>, anyhow::Error> {
        let value = self.failed("get_with_meta", self.inner.get_with_meta(key).await)?;
        tracing::trace!(store = &self.name, key, found = value.is_some(), "get_with_meta");
        Ok(value)
    }

    async fn generate_download_url(
        &self,
        args: DownloadUrlArgs,
    ) -> Result<Outcome<url::Url>, anyhow::Error> {
        let key = args.key.clone();
        let out = self.failed(
            "generate_download_url",
            self.inner.generate_download_url(args).await,
        )?;
        self.outcome("generate_download_url", &out);
        tracing::trace!(store = &self.name, key, "generate_download_url");
        Ok(out)
    }

    async fn send_put(&self, put: Put) -> Result<ObjectMeta, anyhow::Error> {
        let key = put.key.clone();
        tracing::trace!(store = &self.name, key, "put::start");
        let meta = self.failed("put", self.inner.send_put(put).await)?;
        tracing::debug!(store = &self.name, key, size = ?meta.size, "put::ok");
        Ok(meta)
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        tracing::trace!(store = &self.name, key, "delete::start");
        self.failed("delete", self.inner.delete(key).await)?;
        tracing::debug!(store = &self.name, key, "delete::ok");
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), anyhow::Error> {
        tracing::trace!(store = &self.name, prefix, "delete_prefix::start");
        self.failed("delete_prefix", self.inner.delete_prefix(prefix).await)?;
        tracing::debug!(store = &self.name, prefix, "delete_prefix::ok");
        Ok(())
    }

    async fn list(&self, args: ListArgs) -> Result<ObjectMetaPage, anyhow::Error> {
        let page = self.failed("list", self.inner.list(args).await)?;
        tracing::trace!(store = &self.name, items = page.items.len(), "list");
        Ok(page)
    }

    async fn list_keys(&self, args: ListArgs) -> Result<KeyPage, anyhow::Error> {
        let page = self.failed("list_keys", self.inner.list_keys(args).await)?;
        tracing::trace!(store = &self.name, items = page.items.len(), "list_keys");
        Ok(page)
    }

    fn set_storage_class(&self, class: &str) -> Result<Outcome<()>, anyhow::Error> {
        let out = self.failed("set_storage_class", self.inner.set_storage_class(class))?;
        self.outcome("set_storage_class", &out);
        if out.is_done() {
            tracing::debug!(store = &self.name, class, "set_storage_class::ok");
        }
        Ok(out)
    }
}
