mod provider;

pub use self::provider::MemoryProvider;

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{Arc, PoisonError, RwLock as StdRwLock},
};

use bytes::{Bytes, BytesMut};
use futures::TryStreamExt as _;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use objgate::{
    Capability, DataSource, DownloadUrlArgs, KeyPage, ListArgs, ObjectMeta, ObjectMetaPage,
    Outcome, Put, StorageClient, StorageError, ValueStream,
};
use url::Url;

/// In-memory [`StorageClient`] implementation.
///
/// Supports concurrent access. Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    state: State,
    safe_uri: Url,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("safe_uri", &self.safe_uri.as_str())
            .finish()
    }
}

#[derive(Clone)]
struct Item {
    data: Bytes,
    meta: ObjectMeta,
}

#[derive(Clone)]
struct State {
    data: Arc<RwLock<BTreeMap<String, Item>>>,
    storage_class: Arc<StdRwLock<Option<String>>>,
}

impl MemoryStore {
    /// The kind of this store (see [`StorageClient::kind`]).
    pub const KIND: &'static str = "objgate.memory";

    pub const DEFAULT_LABEL: &'static str = "default";

    const DEFAULT_LIMIT: usize = 1_000;

    pub fn new() -> Self {
        Self::with_safe_uri(Url::parse("mem://default/").expect("valid memory store URI"))
    }

    /// Create a store identified as `mem://<label>/`.
    ///
    /// An empty label selects [`Self::DEFAULT_LABEL`].
    pub fn with_label(label: &str) -> Result<Self, StorageError> {
        let label = match label.trim() {
            "" => Self::DEFAULT_LABEL,
            other => other,
        };
        if label.contains(['/', '?', '#', ':', '@']) {
            return Err(StorageError::invalid_endpoint(
                label,
                "memory store labels must not contain URL delimiters",
            ));
        }
        let uri = Url::parse(&format!("mem://{label}/"))
            .map_err(|e| StorageError::invalid_endpoint(label, e))?;
        Ok(Self::with_safe_uri(uri))
    }

    fn with_safe_uri(safe_uri: Url) -> Self {
        Self {
            safe_uri,
            state: State {
                data: Arc::new(RwLock::new(BTreeMap::new())),
                storage_class: Arc::new(StdRwLock::new(None)),
            },
        }
    }

    pub fn storage_class(&self) -> Option<String> {
        self.state
            .storage_class
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StorageClient for MemoryStore {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn safe_uri(&self) -> &Url {
        &self.safe_uri
    }

    async fn healthcheck(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn meta(&self, key: &str) -> Result<Option<ObjectMeta>, anyhow::Error> {
        let meta = self
            .state
            .data
            .read()
            .await
            .get(key)
            .map(|item| item.meta.clone());
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, anyhow::Error> {
        let bytes = self
            .state
            .data
            .read()
            .await
            .get(key)
            .map(|item| item.data.clone());
        Ok(bytes)
    }

    async fn get_stream(&self, key: &str) -> Result<Option<ValueStream>, anyhow::Error> {
        if let Some(value) = self.get(key).await? {
            let stream = futures::stream::once(async move { Ok(value) });
            Ok(Some(Box::pin(stream)))
        } else {
            Ok(None)
        }
    }

    async fn get_with_meta(&self, key: &str) -> Result<Option<(Bytes, ObjectMeta)>, anyhow::Error> {
        match self.state.data.read().await.get(key).cloned() {
            Some(item) => Ok(Some((item.data, item.meta))),
            None => Ok(None),
        }
    }

    async fn generate_download_url(
        &self,
        _args: DownloadUrlArgs,
    ) -> Result<Outcome<Url>, anyhow::Error> {
        Ok(Outcome::NotSupported(Capability::DownloadUrl))
    }

    async fn send_put(&self, put: Put) -> Result<ObjectMeta, anyhow::Error> {
        use sha2::Digest;

        let value = match put.data {
            DataSource::Data(bytes) => bytes,
            DataSource::Stream(stream) => {
                let data = stream.try_collect::<BytesMut>().await?;
                data.freeze()
            }
        };

        let digest = sha2::Sha256::digest(&value);

        let now = OffsetDateTime::now_utc();
        let mut meta = ObjectMeta::new(put.key.clone());
        meta.size = Some(value.len() as u64);
        meta.etag = Some(format!("sha256:{digest:x}"));
        meta.updated_at = Some(now);
        meta.hash_sha256 = Some(digest.into());
        meta.mime_type = put.mime_type;
        meta.storage_class = self.storage_class();

        let mut data = self.state.data.write().await;
        // Overwrites keep the original creation time.
        meta.created_at = Some(
            data.get(&put.key)
                .and_then(|item| item.meta.created_at)
                .unwrap_or(now),
        );
        data.insert(
            put.key,
            Item {
                data: value,
                meta: meta.clone(),
            },
        );
        Ok(meta)
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.state.data.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, args: ListArgs) -> Result<ObjectMetaPage, anyhow::Error> {
        let data = self.state.data.read().await;

        let limit = match args.limit() {
            Some(limit) => usize::try_from(limit).unwrap_or(usize::MAX),
            None => Self::DEFAULT_LIMIT,
        };
        let prefix = args.prefix().unwrap_or_default();
        let delimiter = args.delimiter();
        let start = match args.cursor() {
            Some(cursor) if cursor >= prefix => cursor,
            _ => prefix,
        };

        // Common prefixes count toward the limit like items do. A prefix is
        // positioned at `<prefix><group><delimiter>` for cursor purposes.
        let mut items = Vec::new();
        let mut prefixes = Vec::new();
        let mut last_entry: Option<String> = None;
        let mut next_cursor = None;
        let candidates = data
            .range::<str, _>((Bound::Included(start), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| args.cursor().is_none_or(|c| key.as_str() > c));

        for (key, item) in candidates {
            let rest = &key[prefix.len()..];
            let group = delimiter
                .filter(|delim| !delim.is_empty())
                .and_then(|delim| rest.find(delim).map(|pos| (pos, delim)));

            let position = match group {
                Some((pos, delim)) => {
                    let marker = format!("{prefix}{}", &rest[..pos + delim.len()]);
                    if args.cursor().is_some_and(|c| marker.as_str() <= c)
                        || last_entry.as_deref() == Some(marker.as_str())
                    {
                        continue;
                    }
                    marker
                }
                None => key.clone(),
            };

            if items.len() + prefixes.len() == limit {
                next_cursor = last_entry;
                break;
            }
            match group {
                Some((pos, _)) => prefixes.push(format!("{prefix}{}", &rest[..pos])),
                None => items.push(item.meta.clone()),
            }
            last_entry = Some(position);
        }

        Ok(ObjectMetaPage {
            items,
            next_cursor,
            prefixes: if prefixes.is_empty() {
                None
            } else {
                Some(prefixes)
            },
        })
    }

    async fn list_keys(&self, args: ListArgs) -> Result<KeyPage, anyhow::Error> {
        let page = self.list(args).await?;
        Ok(KeyPage {
            items: page.items.into_iter().map(|item| item.key).collect(),
            next_cursor: page.next_cursor,
        })
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), anyhow::Error> {
        self.state
            .data
            .write()
            .await
            .retain(|key, _value| !key.starts_with(prefix));
        Ok(())
    }

    fn set_storage_class(&self, class: &str) -> Result<Outcome<()>, anyhow::Error> {
        let class = if class.is_empty() {
            None
        } else {
            Some(class.to_string())
        };
        *self
            .state
            .storage_class
            .write()
            .unwrap_or_else(PoisonError::into_inner) = class;
        Ok(Outcome::Done(()))
    }
}
