use std::{
    borrow::Cow,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use anyhow::Context as _;
use bytes::{BufMut as _, Bytes, BytesMut};
use futures::{StreamExt as _, TryStreamExt as _};
use http::{StatusCode, header::ETAG};
use reqwest::{Client, Url};
use rusty_s3::{
    Bucket, S3Action,
    actions::{CompleteMultipartUpload, CreateMultipartUpload, ListObjectsV2Response, UploadPart},
};
use time::OffsetDateTime;

use objgate::{
    DataSource, DownloadUrlArgs, KeyPage, ListArgs, ObjectMeta, ObjectMetaPage, Outcome, Put,
    StorageClient, ValueStream,
};

use crate::{
    PayloadSigning, S3Config, transport,
    util::{
        CHECKSUM_SHA256_HEADER, STORAGE_CLASS_HEADER, clean_etag, md5_from_etag,
        parse_object_headers, sha256_checksum, validate_storage_class,
    },
};

type Headers = Vec<(&'static str, String)>;

/// Client for S3-compatible object storage.
///
/// Signs requests with `rusty-s3` and sends them over a shared `reqwest`
/// client. Vendor adapters wrap it and tune its [`S3Config`].
#[derive(Clone, Debug)]
pub struct S3Store {
    state: Arc<State>,
}

#[derive(Debug)]
struct State {
    safe_uri: Url,
    creds: Option<rusty_s3::Credentials>,
    bucket: Bucket,
    path_prefix: Option<String>,
    client: Client,
    payload_signing: PayloadSigning,
    max_attempts: u32,
    storage_class: RwLock<Option<String>>,
}

impl S3Store {
    /// The kind of this store (see [`StorageClient::kind`]).
    pub const KIND: &'static str = "objgate.s3";

    const DURATION: Duration = Duration::from_secs(180);
    /// Chunk size for multipart upload (minimum 5 MiB per part).
    const PART_SIZE: usize = 8 * 1024 * 1024;

    pub fn new(config: S3Config) -> Result<Self, anyhow::Error> {
        Self::new_with_client(config, transport::shared_client()?)
    }

    pub fn new_with_client(config: S3Config, client: Client) -> Result<Self, anyhow::Error> {
        config.credentials.validate()?;
        if let Some(class) = &config.storage_class {
            validate_storage_class(class)?;
        }

        let path_prefix = config
            .path_prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(|p| format!("{p}/"));

        let safe_uri = format!(
            "s3://{}/{}",
            config.url.host_str().context("missing host in URL")?,
            config.bucket
        )
        .parse::<Url>()
        .context("failed to build safe-url")?;

        Ok(Self {
            state: Arc::new(State {
                safe_uri,
                creds: config.build_credentials(),
                bucket: config.build_bucket()?,
                path_prefix,
                client,
                payload_signing: config.payload_signing,
                max_attempts: config.max_attempts.max(1),
                storage_class: RwLock::new(config.storage_class.clone()),
            }),
        })
    }

    pub fn bucket_name(&self) -> &str {
        self.state.bucket.name()
    }

    pub fn region(&self) -> &str {
        self.state.bucket.region()
    }

    /// Base URL requests are sent to (includes the bucket for virtual-host style).
    pub fn base_url(&self) -> &Url {
        self.state.bucket.base_url()
    }

    pub fn payload_signing(&self) -> PayloadSigning {
        self.state.payload_signing
    }

    pub fn max_attempts(&self) -> u32 {
        self.state.max_attempts
    }

    pub fn storage_class(&self) -> Option<String> {
        self.state
            .storage_class
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn creds(&self) -> Option<&rusty_s3::Credentials> {
        self.state.creds.as_ref()
    }

    fn build_key<'a>(&self, key: &'a str) -> Cow<'a, str> {
        let key = key.trim_start_matches('/');

        match &self.state.path_prefix {
            // The constructor ensures that the prefix ends with a slash.
            Some(prefix) => Cow::Owned(format!("{prefix}{key}")),
            None => Cow::Borrowed(key),
        }
    }

    fn prune_key_prefix(&self, key: String) -> String {
        match &self.state.path_prefix {
            Some(prefix) => match key.strip_prefix(prefix.as_str()) {
                Some(suffix) => suffix.to_string(),
                None => key,
            },
            None => key,
        }
    }

    /// Headers sent with object writes.
    fn write_headers(&self, mime_type: Option<&str>, body: Option<&[u8]>) -> Headers {
        let mut headers = Headers::new();
        if let Some(ct) = mime_type {
            headers.push(("content-type", ct.to_owned()));
        }
        if let Some(class) = self.storage_class() {
            headers.push((STORAGE_CLASS_HEADER, class));
        }
        if let (PayloadSigning::Sha256, Some(body)) = (self.state.payload_signing, body) {
            headers.push((CHECKSUM_SHA256_HEADER, sha256_checksum(body)));
        }
        headers
    }

    pub async fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, anyhow::Error> {
        let s3_key = self.build_key(key);
        let url = self
            .state
            .bucket
            .head_object(self.creds(), &s3_key)
            .sign(Self::DURATION);
        tracing::trace!(%s3_key, "sending head_object request to s3");

        let res = transport::send_with_retry("head_object", self.state.max_attempts, || {
            self.state.client.head(url.clone())
        })
        .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = transport::error_for_status(res).await?;
        let head = parse_object_headers(key.to_owned(), res.headers())?;

        Ok(Some(head))
    }

    pub async fn get_object_response(
        &self,
        key: &str,
    ) -> Result<Option<(ObjectMeta, reqwest::Response)>, anyhow::Error> {
        let s3_key = self.build_key(key);
        tracing::trace!(%s3_key, "loading key from s3");
        let url = self
            .state
            .bucket
            .get_object(self.creds(), &s3_key)
            .sign(Self::DURATION);

        let res = transport::send_with_retry("get_object", self.state.max_attempts, || {
            self.state.client.get(url.clone())
        })
        .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = transport::error_for_status(res).await?;
        let head = parse_object_headers(key.to_owned(), res.headers())?;

        Ok(Some((head, res)))
    }

    pub async fn get_object(
        &self,
        key: &str,
    ) -> Result<Option<(Bytes, ObjectMeta)>, anyhow::Error> {
        match self.get_object_response(key).await? {
            Some((head, res)) => {
                let bytes = res.bytes().await.context("failed to read response body")?;
                Ok(Some((bytes, head)))
            }
            None => Ok(None),
        }
    }

    pub fn presign_download_url(&self, args: &DownloadUrlArgs) -> Url {
        let s3_key = self.build_key(&args.key);
        let mut action = self.state.bucket.get_object(self.creds(), &s3_key);
        if let Some(ct) = &args.response_content_type {
            action.query_mut().insert("response-content-type", ct.as_str());
        }
        if let Some(cd) = &args.response_content_disposition {
            action
                .query_mut()
                .insert("response-content-disposition", cd.as_str());
        }
        action.sign(args.valid_for)
    }

    pub async fn put_object(&self, put: Put) -> Result<ObjectMeta, anyhow::Error> {
        let Put {
            key,
            data,
            mime_type,
            ..
        } = put;

        let data = match data {
            DataSource::Data(bytes) => bytes,
            DataSource::Stream(stream) => {
                return self.multipart_upload(key, mime_type, stream).await;
            }
        };

        let s3_key = self.build_key(&key);
        let headers = self.write_headers(mime_type.as_deref(), Some(&data));
        let mut action = self.state.bucket.put_object(self.creds(), &s3_key);
        for (name, value) in &headers {
            action.headers_mut().insert(*name, value.clone());
        }
        let url = action.sign(Self::DURATION);
        tracing::trace!(%s3_key, size = data.len(), "sending put_object request to s3");

        let res = transport::send_with_retry("put_object", self.state.max_attempts, || {
            let mut req = self.state.client.put(url.clone()).body(data.clone());
            for (name, value) in &headers {
                req = req.header(*name, value);
            }
            req
        })
        .await?;
        let res = transport::error_for_status(res).await?;

        let mut meta = ObjectMeta::new(key);
        meta.etag = res
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(clean_etag);
        meta.hash_md5 = meta.etag.as_deref().and_then(md5_from_etag);
        meta.size = Some(data.len() as u64);
        meta.updated_at = Some(OffsetDateTime::now_utc());
        meta.mime_type = mime_type;
        meta.storage_class = self.storage_class();
        if self.state.payload_signing == PayloadSigning::Sha256 {
            use sha2::Digest as _;
            meta.hash_sha256 = Some(sha2::Sha256::digest(&data).into());
        }
        Ok(meta)
    }

    async fn multipart_upload(
        &self,
        key: String,
        mime_type: Option<String>,
        stream: ValueStream,
    ) -> Result<ObjectMeta, anyhow::Error> {
        let s3_key = self.build_key(&key);
        let headers = self.write_headers(mime_type.as_deref(), None);
        let mut create = self
            .state
            .bucket
            .create_multipart_upload(self.creds(), &s3_key);
        for (name, value) in &headers {
            create.headers_mut().insert(*name, value.clone());
        }
        let url = create.sign(Self::DURATION);
        let res = transport::send_with_retry("create_multipart_upload", 1, || {
            let mut req = self.state.client.post(url.clone());
            for (name, value) in &headers {
                req = req.header(*name, value);
            }
            req
        })
        .await?;
        let res = transport::error_for_status(res).await?;
        let body = res
            .text()
            .await
            .context("reading multipart create response")?;
        let multipart = CreateMultipartUpload::parse_response(&body)
            .context("parsing multipart create response")?;
        let upload_id = multipart.upload_id();

        match self.upload_parts(&s3_key, upload_id, stream).await {
            Ok(()) => {}
            Err(err) => {
                self.abort_multipart_upload(&s3_key, upload_id).await;
                return Err(err);
            }
        }

        self.head_object(&key)
            .await?
            .context("failed to fetch object metadata after multipart upload")
    }

    async fn upload_parts(
        &self,
        s3_key: &str,
        upload_id: &str,
        mut stream: ValueStream,
    ) -> Result<(), anyhow::Error> {
        let mut part_number = 1u16;
        let mut etags = Vec::new();
        let mut buffer = BytesMut::new();
        loop {
            let chunk = stream.try_next().await?;
            let done = chunk.is_none();
            if let Some(chunk) = chunk {
                buffer.put_slice(&chunk);
            }
            // The final part may be empty for an empty stream.
            let flush = buffer.len() >= Self::PART_SIZE
                || (done && (!buffer.is_empty() || etags.is_empty()));
            if flush {
                let data = buffer.split().freeze();
                let etag = self.upload_part(s3_key, upload_id, part_number, data).await?;
                etags.push(etag);
                part_number = part_number
                    .checked_add(1)
                    .context("multipart upload exceeded the maximum number of parts")?;
            }
            if done {
                break;
            }
        }

        let complete = CompleteMultipartUpload::new(
            &self.state.bucket,
            self.creds(),
            s3_key,
            upload_id,
            etags.iter().map(|s| s.as_str()),
        );
        let url = complete.sign(Self::DURATION);
        let body = complete.body();
        let res = transport::send_with_retry(
            "complete_multipart_upload",
            self.state.max_attempts,
            || self.state.client.post(url.clone()).body(body.clone()),
        )
        .await?;
        transport::error_for_status(res).await?;
        Ok(())
    }

    async fn upload_part(
        &self,
        s3_key: &str,
        upload_id: &str,
        part_number: u16,
        data: Bytes,
    ) -> Result<String, anyhow::Error> {
        let upload = UploadPart::new(
            &self.state.bucket,
            self.creds(),
            s3_key,
            part_number,
            upload_id,
        );
        let url = upload.sign(Self::DURATION);
        let res = transport::send_with_retry("upload_part", self.state.max_attempts, || {
            self.state.client.put(url.clone()).body(data.clone())
        })
        .await?;
        let res = transport::error_for_status(res).await?;
        let etag = res
            .headers()
            .get(ETAG)
            .context("missing ETag for multipart part")?
            .to_str()?;
        Ok(clean_etag(etag))
    }

    async fn abort_multipart_upload(&self, s3_key: &str, upload_id: &str) {
        let url = self
            .state
            .bucket
            .abort_multipart_upload(self.creds(), s3_key, upload_id)
            .sign(Self::DURATION);
        let res = match self.state.client.delete(url).send().await {
            Ok(res) => transport::error_for_status(res).await.map(|_| ()),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = res {
            tracing::warn!(%s3_key, upload_id, error = %err, "failed to abort multipart upload");
        }
    }

    pub async fn delete_object(&self, key: &str) -> Result<(), anyhow::Error> {
        let url = self
            .state
            .bucket
            .delete_object(self.creds(), &self.build_key(key))
            .sign(Self::DURATION);

        let res = transport::send_with_retry("delete_object", self.state.max_attempts, || {
            self.state.client.delete(url.clone())
        })
        .await?;
        transport::error_for_status(res).await?;

        Ok(())
    }

    /// List objects; keys in the response are decoded and relative to the
    /// configured path prefix.
    pub async fn list_objects(
        &self,
        args: &ListArgs,
    ) -> Result<ListObjectsV2Response, anyhow::Error> {
        let prefix = match args.prefix() {
            Some(prefix) => Some(self.build_key(prefix).into_owned()),
            None => self.state.path_prefix.clone(),
        };

        let mut prep = self.state.bucket.list_objects_v2(self.creds());
        if let Some(delimiter) = args.delimiter() {
            prep.with_delimiter(delimiter);
        }
        if let Some(prefix) = &prefix
            && !prefix.is_empty()
        {
            prep.with_prefix(prefix);
        }
        if let Some(cursor) = args.cursor() {
            prep.with_continuation_token(cursor);
        }
        if let Some(limit) = args.limit() {
            let limit: usize = limit.try_into().context("limit is too large")?;
            prep.with_max_keys(limit);
        }

        let url = prep.sign(Self::DURATION);
        tracing::trace!(?prefix, "listing objects in s3");
        let res = transport::send_with_retry("list_objects", self.state.max_attempts, || {
            self.state.client.get(url.clone())
        })
        .await?;
        let res = transport::error_for_status(res).await?;

        let body = res.text().await?;
        let mut data = rusty_s3::actions::ListObjectsV2::parse_response(&body)?;

        for content in &mut data.contents {
            let key = std::mem::take(&mut content.key);
            let key = percent_encoding::percent_decode_str(&key)
                .decode_utf8()
                .with_context(|| format!("failed to decode key: '{key}'"))?
                .into_owned();
            content.key = self.prune_key_prefix(key);
        }

        Ok(data)
    }

    fn list_to_metas(list: ListObjectsV2Response) -> Result<Vec<ObjectMeta>, anyhow::Error> {
        list.contents
            .into_iter()
            .map(|o| -> Result<ObjectMeta, anyhow::Error> {
                let updated_at = OffsetDateTime::parse(
                    &o.last_modified,
                    &time::format_description::well_known::Iso8601::DEFAULT,
                )
                .with_context(|| format!("invalid last-modified timestamp: '{}'", o.last_modified))?;

                let mut meta = ObjectMeta::new(o.key);
                meta.etag = Some(clean_etag(&o.etag));
                meta.hash_md5 = meta.etag.as_deref().and_then(md5_from_etag);
                meta.size = Some(o.size);
                meta.updated_at = Some(updated_at);
                Ok(meta)
            })
            .collect()
    }

    /// Delete every key below `prefix`.
    ///
    /// S3 has no "delete prefix" operation, so keys are listed and deleted one
    /// by one.
    pub async fn delete_all(&self, prefix: &str) -> Result<(), anyhow::Error> {
        let mut cursor = None;
        loop {
            let args = ListArgs::new()
                .with_prefix(prefix)
                .with_cursor_opt(cursor.take());
            let list = self.list_objects(&args).await?;

            for obj in list.contents {
                self.delete_object(&obj.key).await?;
            }

            match list.next_continuation_token {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageClient for S3Store {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn safe_uri(&self) -> &Url {
        &self.state.safe_uri
    }

    async fn healthcheck(&self) -> Result<(), anyhow::Error> {
        self.head_object("__healthcheck/i-do-not-exist").await?;
        Ok(())
    }

    async fn meta(&self, key: &str) -> Result<Option<ObjectMeta>, anyhow::Error> {
        self.head_object(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, anyhow::Error> {
        Ok(self.get_object(key).await?.map(|(bytes, _)| bytes))
    }

    async fn get_stream(&self, key: &str) -> Result<Option<ValueStream>, anyhow::Error> {
        match self.get_object_response(key).await? {
            Some((_, res)) => {
                let stream = res.bytes_stream().map_err(anyhow::Error::from);
                Ok(Some(stream.boxed()))
            }
            None => Ok(None),
        }
    }

    async fn get_with_meta(&self, key: &str) -> Result<Option<(Bytes, ObjectMeta)>, anyhow::Error> {
        self.get_object(key).await
    }

    async fn generate_download_url(
        &self,
        args: DownloadUrlArgs,
    ) -> Result<Outcome<url::Url>, anyhow::Error> {
        Ok(Outcome::Done(self.presign_download_url(&args)))
    }

    async fn send_put(&self, put: Put) -> Result<ObjectMeta, anyhow::Error> {
        self.put_object(put).await
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.delete_object(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), anyhow::Error> {
        self.delete_all(prefix).await
    }

    async fn list(&self, args: ListArgs) -> Result<ObjectMetaPage, anyhow::Error> {
        let delim = args.delimiter().unwrap_or_default().to_string();
        let mut list = self.list_objects(&args).await?;
        let next_cursor = list.next_continuation_token.take();

        let prefixes = list
            .common_prefixes
            .drain(..)
            .map(|p| {
                let val = percent_encoding::percent_decode_str(&p.prefix)
                    .decode_utf8()
                    .with_context(|| format!("failed to decode prefix: '{}'", p.prefix))?;
                let val = self.prune_key_prefix(val.into_owned());
                Ok(val.trim_end_matches(delim.as_str()).to_owned())
            })
            .collect::<Result<Vec<String>, anyhow::Error>>()?;
        let prefixes = if prefixes.is_empty() {
            None
        } else {
            Some(prefixes)
        };

        Ok(ObjectMetaPage {
            items: Self::list_to_metas(list)?,
            next_cursor,
            prefixes,
        })
    }

    async fn list_keys(&self, args: ListArgs) -> Result<KeyPage, anyhow::Error> {
        let list = self.list_objects(&args).await?;
        let items = list.contents.into_iter().map(|o| o.key).collect();
        Ok(KeyPage {
            items,
            next_cursor: list.next_continuation_token,
        })
    }

    fn set_storage_class(&self, class: &str) -> Result<Outcome<()>, anyhow::Error> {
        let class = if class.is_empty() {
            None
        } else {
            validate_storage_class(class)?;
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

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use objgate::StaticCredentials;
    use pretty_assertions::assert_eq;

    use super::*;

    fn test_strict() -> bool {
        std::env::var("TEST_STRICT").is_ok()
    }

    /// `S3_TEST_URI` holds `<endpoint>|<access key>|<secret key>`.
    fn load_test_config() -> Result<Option<S3Config>, anyhow::Error> {
        const ENV_VAR: &str = "S3_TEST_URI";
        let Ok(var) = std::env::var(ENV_VAR) else {
            if test_strict() {
                bail!("missing required environment variable: {ENV_VAR}");
            } else {
                eprintln!(
                    "skipping s3 tests due to missing config - set TEST_STRICT=1 env var to require the test"
                );
                return Ok(None);
            }
        };

        let mut parts = var.splitn(3, '|');
        let (Some(endpoint), Some(key), Some(secret)) = (parts.next(), parts.next(), parts.next())
        else {
            bail!("{ENV_VAR} must have the form '<endpoint>|<access key>|<secret key>'");
        };
        let config = S3Config::from_endpoint(endpoint, StaticCredentials::new(key, secret, ""))?;
        Ok(Some(config))
    }

    fn local_config() -> S3Config {
        let mut config = S3Config::from_endpoint(
            "http://127.0.0.1:9000/bucket/nested/",
            StaticCredentials::new("AK", "SK", ""),
        )
        .unwrap();
        config.storage_class = Some("STANDARD".to_string());
        config
    }

    #[test]
    fn test_store_from_config() {
        let store = S3Store::new(local_config()).unwrap();
        assert_eq!(store.bucket_name(), "bucket");
        assert_eq!(store.region(), "us-east-1");
        assert_eq!(store.safe_uri().as_str(), "s3://127.0.0.1/bucket");
        assert_eq!(store.max_attempts(), 3);
        assert_eq!(store.build_key("/a/b"), "nested/a/b");
        assert_eq!(store.prune_key_prefix("nested/a/b".to_string()), "a/b");
        assert_eq!(store.storage_class().as_deref(), Some("STANDARD"));
    }

    #[test]
    fn test_rejects_incomplete_credentials() {
        let mut config = local_config();
        config.credentials = StaticCredentials::new("AK", "", "");
        assert!(S3Store::new(config).is_err());
    }

    #[test]
    fn test_set_storage_class() {
        let store = S3Store::new(local_config()).unwrap();
        assert!(store.set_storage_class("GLACIER").unwrap().is_done());
        assert_eq!(store.storage_class().as_deref(), Some("GLACIER"));

        assert!(store.set_storage_class("not valid").is_err());
        assert_eq!(store.storage_class().as_deref(), Some("GLACIER"));

        assert!(store.set_storage_class("").unwrap().is_done());
        assert_eq!(store.storage_class(), None);
    }

    #[test]
    fn test_write_headers() {
        let store = S3Store::new(local_config()).unwrap();
        let headers = store.write_headers(Some("text/plain"), Some(b"hello"));
        let names: Vec<_> = headers.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec!["content-type", STORAGE_CLASS_HEADER, CHECKSUM_SHA256_HEADER]
        );

        let mut config = local_config();
        config.payload_signing = PayloadSigning::Unsigned;
        config.storage_class = None;
        let store = S3Store::new(config).unwrap();
        assert!(store.write_headers(None, Some(b"hello")).is_empty());
    }

    #[test]
    fn test_presigned_download_url() {
        let store = S3Store::new(local_config()).unwrap();
        let mut args = DownloadUrlArgs::new("file.txt", Duration::from_secs(60));
        args.response_content_type = Some("text/plain".to_string());
        let url = store.presign_download_url(&args);
        assert_eq!(url.path(), "/bucket/nested/file.txt");
        let query: Vec<_> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert!(query.iter().any(|k| k == "X-Amz-Signature"));
        assert!(query.iter().any(|k| k == "response-content-type"));
    }

    #[tokio::test]
    #[test_log::test]
    async fn test_s3_store() {
        let Some(config) = load_test_config().unwrap() else {
            return;
        };

        let store = S3Store::new(config.clone()).expect("failed to create s3 store");
        objgate_test::test_storage_client(&store).await;

        let config = S3Config {
            path_prefix: Some(uuid::Uuid::new_v4().to_string()),
            ..config
        };
        let store = S3Store::new(config).expect("failed to create s3 store");
        objgate_test::test_storage_client(&store).await;
    }
}
