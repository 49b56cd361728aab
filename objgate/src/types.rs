use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;

/// Byte stream.
pub type ValueStream = futures::stream::BoxStream<'static, Result<Bytes, anyhow::Error>>;

/// Stream of key-name pages (as returned by `list_keys`).
pub type KeyStream<'a> = futures::stream::BoxStream<'a, Result<KeyPage, anyhow::Error>>;

/// Metadata of a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct ObjectMeta {
    pub key: String,
    pub etag: Option<String>,
    pub size: Option<u64>,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
    pub hash_md5: Option<[u8; 16]>,
    pub hash_sha256: Option<[u8; 32]>,
    /// MIME content type, if the backend records one.
    pub mime_type: Option<String>,
    /// Storage class / tier, if the backend has tiers.
    pub storage_class: Option<String>,
}

impl ObjectMeta {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            etag: None,
            size: None,
            created_at: None,
            updated_at: None,
            hash_md5: None,
            hash_sha256: None,
            mime_type: None,
            storage_class: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Drop sub-second precision from the timestamps.
    ///
    /// Backends report timestamps with differing precision.
    pub fn round_timestamps_second(&mut self) {
        for ts in [self.created_at.as_mut(), self.updated_at.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Ok(new) = ts.replace_nanosecond(0) {
                *ts = new;
            }
        }
    }

    pub fn with_rounded_timestamps_second(mut self) -> Self {
        self.round_timestamps_second();
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct ObjectMetaPage {
    pub items: Vec<ObjectMeta>,
    pub next_cursor: Option<String>,
    /// Common prefixes, when listing with a delimiter.
    pub prefixes: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct KeyPage {
    pub items: Vec<String>,
    pub next_cursor: Option<String>,
}

/// Listing arguments: prefix filter, page size, cursor and delimiter.
///
/// Empty strings and zero limits are treated as unset.
#[derive(Clone, Debug, Default)]
pub struct ListArgs {
    prefix: Option<String>,
    limit: Option<u64>,
    cursor: Option<String>,
    delimiter: Option<String>,
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    if value.is_empty() { None } else { Some(value) }
}

impl ListArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = non_empty(prefix);
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.set_prefix(prefix);
        self
    }

    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    pub fn set_delimiter(&mut self, delimiter: impl Into<String>) {
        self.delimiter = non_empty(delimiter);
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.set_delimiter(delimiter);
        self
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn set_limit(&mut self, limit: u64) {
        self.limit = if limit > 0 { Some(limit) } else { None };
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.set_limit(limit);
        self
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = non_empty(cursor);
        self
    }

    pub fn with_cursor_opt(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor.and_then(non_empty);
        self
    }
}

/// Payload of a put: either fully buffered or streamed.
pub enum DataSource {
    Data(Bytes),
    Stream(ValueStream),
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data(d) => write!(f, "DataSource::Data({} bytes)", d.len()),
            Self::Stream(_) => f.write_str("DataSource::Stream(...)"),
        }
    }
}

impl From<Bytes> for DataSource {
    fn from(data: Bytes) -> Self {
        Self::Data(data)
    }
}

impl From<ValueStream> for DataSource {
    fn from(stream: ValueStream) -> Self {
        Self::Stream(stream)
    }
}

/// Write request for a single object.
#[derive(Debug)]
#[non_exhaustive]
pub struct Put {
    pub key: String,
    pub data: DataSource,
    pub mime_type: Option<String>,
}

impl Put {
    pub fn new(key: impl Into<String>, data: impl Into<DataSource>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = non_empty(mime_type);
        self
    }
}

/// Arguments for a pre-signed download URL.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct DownloadUrlArgs {
    pub key: String,
    pub valid_for: Duration,
    pub response_content_type: Option<String>,
    pub response_content_disposition: Option<String>,
}

impl DownloadUrlArgs {
    pub fn new(key: impl Into<String>, valid_for: Duration) -> Self {
        Self {
            key: key.into(),
            valid_for,
            response_content_type: None,
            response_content_disposition: None,
        }
    }
}
