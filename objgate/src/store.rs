use std::sync::Arc;

use anyhow::Context as _;
use bytes::Bytes;
use futures::{StreamExt as _, TryStreamExt as _, stream};

use crate::{
    DataSource, DownloadUrlArgs, KeyPage, KeyStream, ListArgs, ObjectMeta, ObjectMetaPage,
    Outcome, Put, ValueStream,
};

/// Uniform client interface implemented by every storage backend.
///
/// Each capability is either implemented or explicitly rejected with
/// [`Outcome::NotSupported`]; backends never silently ignore a call.
#[async_trait::async_trait]
pub trait StorageClient: Send + Sync + std::fmt::Debug {
    /// Backend implementation name, eg: "objgate.wasabi".
    fn kind(&self) -> &str;

    /// URI identifying the store without credentials, eg: `wasabi://bucket/`.
    fn safe_uri(&self) -> &url::Url;

    /// Human readable self-identification.
    fn describe(&self) -> String {
        self.safe_uri().to_string()
    }

    /// Checks if the store is usable.
    ///
    /// May perform upstream requests to validate connectivity and credentials.
    async fn healthcheck(&self) -> Result<(), anyhow::Error>;

    async fn meta(&self, key: &str) -> Result<Option<ObjectMeta>, anyhow::Error>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, anyhow::Error>;

    async fn get_stream(&self, key: &str) -> Result<Option<ValueStream>, anyhow::Error>;

    async fn get_with_meta(&self, key: &str) -> Result<Option<(Bytes, ObjectMeta)>, anyhow::Error>;

    async fn generate_download_url(
        &self,
        args: DownloadUrlArgs,
    ) -> Result<Outcome<url::Url>, anyhow::Error>;

    async fn send_put(&self, put: Put) -> Result<ObjectMeta, anyhow::Error>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;

    async fn delete_prefix(&self, prefix: &str) -> Result<(), anyhow::Error>;

    async fn list(&self, args: ListArgs) -> Result<ObjectMetaPage, anyhow::Error>;

    async fn list_keys(&self, args: ListArgs) -> Result<KeyPage, anyhow::Error>;

    /// Set the storage class used for subsequent writes.
    ///
    /// An empty class resets to the backend default.
    fn set_storage_class(&self, class: &str) -> Result<Outcome<()>, anyhow::Error>;

    /// List all keys below `prefix`.
    ///
    /// NOTE: pages through every key and accumulates them in memory.
    async fn list_all_keys(&self, prefix: &str) -> Result<Vec<String>, anyhow::Error> {
        let args = ListArgs::new().with_prefix(prefix);
        self.list_keys_stream(args)
            .map_ok(|v| v.items)
            .try_concat()
            .await
    }

    fn list_keys_stream<'a>(&'a self, args: ListArgs) -> KeyStream<'a> {
        let page_stream = stream::try_unfold(Some(args), move |state| async move {
            let Some(args) = state else {
                return Ok(None);
            };
            let page = self.list_keys(args.clone()).await?;
            let next = page.next_cursor.clone().map(|c| args.with_cursor(c));
            Ok::<_, anyhow::Error>(Some((page, next)))
        });
        Box::pin(page_stream)
    }

    async fn purge_all(&self) -> Result<(), anyhow::Error> {
        self.delete_prefix("").await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, anyhow::Error>
    where
        Self: Sized,
    {
        let Some(data) = self.get(key).await? else {
            return Ok(None);
        };
        let jd = &mut serde_json::Deserializer::from_slice(&data);
        let out = serde_path_to_error::deserialize(jd)
            .with_context(|| format!("could not deserialize JSON at key '{key}'"))?;
        Ok(Some(out))
    }
}

pub type DynStorageClient = Arc<dyn StorageClient>;

#[async_trait::async_trait]
impl<S: StorageClient + ?Sized> StorageClient for Arc<S> {
    fn kind(&self) -> &str {
        self.as_ref().kind()
    }

    fn safe_uri(&self) -> &url::Url {
        self.as_ref().safe_uri()
    }

    fn describe(&self) -> String {
        self.as_ref().describe()
    }

    async fn healthcheck(&self) -> Result<(), anyhow::Error> {
        self.as_ref().healthcheck().await
    }

    async fn meta(&self, key: &str) -> Result<Option<ObjectMeta>, anyhow::Error> {
        self.as_ref().meta(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, anyhow::Error> {
        self.as_ref().get(key).await
    }

    async fn get_stream(&self, key: &str) -> Result<Option<ValueStream>, anyhow::Error> {
        self.as_ref().get_stream(key).await
    }

    async fn get_with_meta(&self, key: &str) -> Result<Option<(Bytes, ObjectMeta)>, anyhow::Error> {
        self.as_ref().get_with_meta(key).await
    }

    async fn generate_download_url(
        &self,
        args: DownloadUrlArgs,
    ) -> Result<Outcome<url::Url>, anyhow::Error> {
        self.as_ref().generate_download_url(args).await
    }

    async fn send_put(&self, put: Put) -> Result<ObjectMeta, anyhow::Error> {
        self.as_ref().send_put(put).await
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.as_ref().delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), anyhow::Error> {
        self.as_ref().delete_prefix(prefix).await
    }

    async fn list(&self, args: ListArgs) -> Result<ObjectMetaPage, anyhow::Error> {
        self.as_ref().list(args).await
    }

    async fn list_keys(&self, args: ListArgs) -> Result<KeyPage, anyhow::Error> {
        self.as_ref().list_keys(args).await
    }

    fn set_storage_class(&self, class: &str) -> Result<Outcome<()>, anyhow::Error> {
        self.as_ref().set_storage_class(class)
    }
}

/// Builder for a single put request.
pub struct PutBuilder<'a, S: ?Sized> {
    store: &'a S,
    key: String,
    mime_type: Option<String>,
}

impl<S: StorageClient + ?Sized> PutBuilder<'_, S> {
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn build(self, data: impl Into<DataSource>) -> Put {
        let mut put = Put::new(self.key, data);
        put.mime_type = self.mime_type;
        put
    }

    pub async fn send(self, data: impl Into<DataSource>) -> Result<ObjectMeta, anyhow::Error> {
        let store = self.store;
        store.send_put(self.build(data)).await
    }

    pub async fn json<T: serde::Serialize>(self, data: &T) -> Result<ObjectMeta, anyhow::Error> {
        let data = serde_json::to_vec(data).context("could not serialize JSON data for put")?;
        self.mime_type("application/json")
            .send(DataSource::Data(Bytes::from(data)))
            .await
    }

    pub async fn text(self, text: impl Into<String>) -> Result<ObjectMeta, anyhow::Error> {
        self.send(DataSource::Data(Bytes::from(text.into()))).await
    }

    pub async fn bytes(self, data: impl Into<Bytes>) -> Result<ObjectMeta, anyhow::Error> {
        self.send(DataSource::Data(data.into())).await
    }

    pub async fn stream<D, E>(
        self,
        stream: impl futures::Stream<Item = Result<D, E>> + Send + 'static,
    ) -> Result<ObjectMeta, anyhow::Error>
    where
        Bytes: From<D>,
        anyhow::Error: From<E>,
        E: Send + 'static,
    {
        let stream: ValueStream = stream
            .map_ok(|item: D| Bytes::from(item))
            .map_err(anyhow::Error::from)
            .boxed();
        self.send(DataSource::Stream(stream)).await
    }
}

pub trait StorageClientExt: StorageClient {
    fn put(&self, key: &str) -> PutBuilder<'_, Self> {
        PutBuilder {
            store: self,
            key: key.to_string(),
            mime_type: None,
        }
    }
}

impl<S: StorageClient + ?Sized> StorageClientExt for S {}
