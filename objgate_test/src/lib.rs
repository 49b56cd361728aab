//! Shared conformance suite for [`StorageClient`] implementations.
//!
//! Every backend runs the same checks so they all behave alike.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use objgate::{
    Capability, DownloadUrlArgs, ListArgs, ObjectMeta, Outcome, StorageClient,
    StorageClientExt as _, ValueStream,
};
use pretty_assertions::assert_eq;
use sha2::Digest as _;
use time::OffsetDateTime;
use uuid::Uuid;

fn new_keymeta(key: &str, value: &Bytes) -> ObjectMeta {
    let now = OffsetDateTime::now_utc();

    let mut meta = ObjectMeta::new(key);
    meta.size = Some(value.len() as u64);
    meta.created_at = Some(now);
    meta.updated_at = Some(now);
    meta.hash_md5 = Some(md5::compute(value).0);
    meta.hash_sha256 = Some(sha2::Sha256::digest(value).into());
    meta
}

/// Ensures that a key exists with the given value and metadata.
///
/// Exercises every way of reading the key.
async fn expect_key<S>(store: &S, key: &str, value: &Bytes, meta: &ObjectMeta)
where
    S: StorageClient + ?Sized,
{
    tracing::debug!(key, ?meta, "expecting key");

    let m0 = store
        .meta(key)
        .await
        .expect("meta should be retrievable")
        .expect("meta should exist");
    approximate_meta_match(meta, &m0, "meta");

    let v0 = store
        .get(key)
        .await
        .expect("get should be retrievable")
        .expect("value should exist");
    assert_eq!(v0, value, "value should match");

    let (v1, m1) = store
        .get_with_meta(key)
        .await
        .expect("get_with_meta should be retrievable")
        .expect("value and meta should exist");
    assert_eq!(v1, *value, "value should match in get_with_meta");
    approximate_meta_match(meta, &m1, "get_with_meta");

    let v2 = store
        .get_stream(key)
        .await
        .expect("get_stream should be retrievable")
        .expect("value should exist in stream")
        .try_collect::<BytesMut>()
        .await
        .expect("stream should collect successfully")
        .freeze();
    assert_eq!(v2, *value, "value should match in get_stream");
}

async fn expect_missing<S>(store: &S, key: &str, msg: &str)
where
    S: StorageClient + ?Sized,
{
    assert_eq!(store.get(key).await.unwrap(), None, "get: {msg}");
    assert_eq!(store.meta(key).await.unwrap(), None, "meta: {msg}");
    assert_eq!(
        store.get_with_meta(key).await.unwrap(),
        None,
        "get_with_meta: {msg}"
    );
    assert!(
        store.get_stream(key).await.unwrap().is_none(),
        "get_stream: {msg}"
    );
}

async fn test_single_key_flow<S>(store: &S, base_prefix: &str)
where
    S: StorageClient + ?Sized,
{
    let prefix = format!("{base_prefix}/{}", Uuid::new_v4());
    let key = format!("{prefix}/{}", Uuid::new_v4());

    let keys = store.list_all_keys(&prefix).await.unwrap();
    assert!(keys.is_empty(), "list with prefix should be empty");
    expect_missing(store, &key, "before put").await;

    // Buffered put.
    {
        let value: Bytes = Uuid::new_v4().to_string().into();
        let meta = store.put(&key).bytes(value.clone()).await.unwrap();
        assert_eq!(meta.key, key);

        let keys = store.list_all_keys(&prefix).await.unwrap();
        assert_eq!(
            keys,
            vec![key.clone()],
            "list with prefix should contain just the expected key"
        );

        expect_key(store, &key, &value, &new_keymeta(&key, &value)).await;
    }

    // Deleting twice is fine.
    store.delete(&key).await.unwrap();
    store.delete(&key).await.unwrap();
    let keys = store.list_all_keys(&prefix).await.unwrap();
    assert_eq!(
        keys,
        Vec::<String>::new(),
        "list with prefix should be empty after delete"
    );
    expect_missing(store, &key, "after delete").await;

    // Streamed put.
    {
        let value: Bytes = format!("{}_stream", Uuid::new_v4()).into();
        let stream: ValueStream =
            futures::stream::once(std::future::ready(Ok(value.clone()))).boxed();
        store.put(&key).stream(stream).await.unwrap();

        expect_key(store, &key, &value, &new_keymeta(&key, &value)).await;
        store.delete(&key).await.unwrap();
    }
}

async fn test_multi_key<S>(store: &S)
where
    S: StorageClient + ?Sized,
{
    let prefix = Uuid::new_v4().to_string();
    let entries = [
        (format!("{prefix}/key1"), Bytes::from("val1")),
        (format!("{prefix}/key2"), Bytes::from("val2")),
        (format!("{prefix}/key3"), Bytes::from("val3")),
    ];

    for (key, value) in &entries {
        store.put(key).bytes(value.clone()).await.unwrap();
    }

    for (key, value) in &entries {
        let meta = store.meta(key).await.unwrap().unwrap();
        approximate_meta_match(&new_keymeta(key, value), &meta, "multi-key meta");
    }

    let mut list = store
        .list(ListArgs::new().with_prefix(&prefix))
        .await
        .unwrap()
        .items;
    assert_eq!(list.len(), 3);
    list.sort_by(|a, b| a.key().cmp(b.key()));
    for (meta, (key, value)) in list.iter_mut().zip(&entries) {
        meta.round_timestamps_second();
        approximate_meta_match(&new_keymeta(key, value), meta, "list meta");
    }

    // Paging with a small limit must visit every key exactly once.
    let mut paged = store
        .list_keys_stream(ListArgs::new().with_prefix(&prefix).with_limit(2))
        .map_ok(|page| futures::stream::iter(page.items.into_iter().map(Ok::<_, anyhow::Error>)))
        .try_flatten()
        .try_collect::<Vec<_>>()
        .await
        .unwrap();
    paged.sort();
    let expected: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(paged, expected);

    store.delete_prefix(&prefix).await.unwrap();
    assert!(store.list_all_keys(&prefix).await.unwrap().is_empty());
}

async fn test_delimiter_listing<S>(store: &S)
where
    S: StorageClient + ?Sized,
{
    let prefix = Uuid::new_v4().to_string();
    for key in ["dir1/file1", "dir1/file2", "dir2/file3", "file4"] {
        store
            .put(&format!("{prefix}/{key}"))
            .text("data")
            .await
            .unwrap();
    }

    let page = store
        .list(
            ListArgs::new()
                .with_prefix(format!("{prefix}/"))
                .with_delimiter("/"),
        )
        .await
        .unwrap();
    let keys: Vec<_> = page.items.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(keys, vec![format!("{prefix}/file4")]);

    let mut prefixes = page.prefixes.unwrap_or_default();
    prefixes.sort();
    assert_eq!(
        prefixes,
        vec![format!("{prefix}/dir1"), format!("{prefix}/dir2")]
    );

    store.delete_prefix(&prefix).await.unwrap();
}

async fn test_json_and_mime<S>(store: &S)
where
    S: StorageClient,
{
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Doc {
        name: String,
        value: i32,
    }

    let key = format!("{}/doc.json", Uuid::new_v4());
    let doc = Doc {
        name: "test".to_string(),
        value: 42,
    };
    assert_eq!(store.get_json::<Doc>(&key).await.unwrap(), None);

    store.put(&key).json(&doc).await.unwrap();
    assert_eq!(store.get_json::<Doc>(&key).await.unwrap(), Some(doc));
    if let Some(mime) = store.meta(&key).await.unwrap().unwrap().mime_type {
        assert_eq!(mime, "application/json");
    }

    store.put(&key).text("{ invalid json }").await.unwrap();
    assert!(store.get_json::<Doc>(&key).await.is_err());

    store.delete(&key).await.unwrap();
}

/// Capabilities must either work or be rejected with `NotSupported`.
async fn test_capabilities<S>(store: &S)
where
    S: StorageClient + ?Sized,
{
    let key = format!("{}/class", Uuid::new_v4());
    match store.set_storage_class("STANDARD").unwrap() {
        Outcome::Done(()) => {
            let meta = store.put(&key).text("x").await.unwrap();
            if let Some(class) = meta.storage_class {
                assert_eq!(class, "STANDARD");
            }
            assert!(store.set_storage_class("").unwrap().is_done());
            store.delete(&key).await.unwrap();
        }
        Outcome::NotSupported(capability) => {
            assert_eq!(capability, Capability::StorageClass);
        }
    }

    let args = DownloadUrlArgs::new(&key, Duration::from_secs(60));
    match store.generate_download_url(args).await.unwrap() {
        Outcome::Done(url) => assert!(!url.as_str().is_empty()),
        Outcome::NotSupported(capability) => {
            assert_eq!(capability, Capability::DownloadUrl);
        }
    }
}

/// Run the conformance suite against `store`.
///
/// NOTE: the store must be empty before running this test!
/// A simple way to ensure that is to use a nested path store.
pub async fn test_storage_client<S>(store: &S)
where
    S: StorageClient,
{
    store.healthcheck().await.expect("health check");
    assert!(!store.describe().is_empty());

    let prefix = Uuid::new_v4().to_string();
    store.delete_prefix(&prefix).await.unwrap();

    test_single_key_flow(store, &prefix).await;
    assert!(store.list_all_keys(&prefix).await.unwrap().is_empty());

    test_multi_key(store).await;
    test_delimiter_listing(store).await;
    test_json_and_mime(store).await;
    test_capabilities(store).await;

    store.purge_all().await.unwrap();
    let items = store.list(ListArgs::new()).await.unwrap().items;
    assert_eq!(items.len(), 0);
}

fn approximate_datetime_match(a: OffsetDateTime, b: OffsetDateTime, msg: &str) {
    let diff = if a > b { a - b } else { b - a };
    assert!(
        diff.whole_seconds() < 5,
        "inexact datetime match: {msg} | {a:?} vs {b:?}"
    );
}

/// Compare metadata, skipping fields a backend does not report.
fn approximate_meta_match(a: &ObjectMeta, b: &ObjectMeta, msg: &str) {
    assert_eq!(a.key, b.key, "key should match: {msg}");
    if let (Some(a_size), Some(b_size)) = (a.size, b.size) {
        assert_eq!(a_size, b_size, "size should match: {msg}");
    }
    if let (Some(a_created_at), Some(b_created_at)) = (a.created_at, b.created_at) {
        approximate_datetime_match(
            a_created_at,
            b_created_at,
            &format!("created_at should match: {msg}"),
        );
    }
    if let (Some(a_updated_at), Some(b_updated_at)) = (a.updated_at, b.updated_at) {
        approximate_datetime_match(
            a_updated_at,
            b_updated_at,
            &format!("updated_at should match: {msg}"),
        );
    }
    if let (Some(a_hash), Some(b_hash)) = (a.hash_md5, b.hash_md5) {
        assert_eq!(a_hash, b_hash, "hash_md5 should match: {msg}");
    }
    if let (Some(a_hash), Some(b_hash)) = (a.hash_sha256, b.hash_sha256) {
        assert_eq!(a_hash, b_hash, "hash_sha256 should match: {msg}");
    }
    if let (Some(a_etag), Some(b_etag)) = (&a.etag, &b.etag) {
        assert_eq!(a_etag, b_etag, "etag should match: {msg}");
    }
    if let (Some(a_mime), Some(b_mime)) = (&a.mime_type, &b.mime_type) {
        assert_eq!(a_mime, b_mime, "mime_type should match: {msg}");
    }
}
