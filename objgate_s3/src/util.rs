use anyhow::Context as _;
use base64::Engine as _;
use http::HeaderMap;
use objgate::ObjectMeta;
use sha2::Digest as _;
use time::OffsetDateTime;

pub(crate) const STORAGE_CLASS_HEADER: &str = "x-amz-storage-class";
pub(crate) const CHECKSUM_SHA256_HEADER: &str = "x-amz-checksum-sha256";

/// See https://docs.aws.amazon.com/AmazonS3/latest/API/API_HeadObject.html
pub fn parse_object_headers(key: String, headers: &HeaderMap) -> Result<ObjectMeta, anyhow::Error> {
    let updated_at = match headers.get(http::header::LAST_MODIFIED) {
        Some(v) => {
            let raw = v.to_str().context("invalid last-modified header")?;
            let ts = OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc2822)
                .with_context(|| format!("failed to parse last-modified header: '{raw}'"))?;
            Some(ts)
        }
        None => {
            tracing::trace!("missing last-modified header in response headers");
            None
        }
    };

    let size = match headers.get(http::header::CONTENT_LENGTH) {
        Some(v) => Some(
            v.to_str()
                .context("invalid content-length header")?
                .parse::<u64>()
                .context("invalid content-length header")?,
        ),
        None => None,
    };

    let mut meta = ObjectMeta::new(key);
    meta.size = size;
    meta.updated_at = updated_at;
    meta.etag = header_str(headers, http::header::ETAG.as_str())?.map(clean_etag);
    meta.hash_md5 = meta.etag.as_deref().and_then(md5_from_etag);
    meta.mime_type = header_str(headers, http::header::CONTENT_TYPE.as_str())?.map(str::to_owned);
    meta.storage_class = header_str(headers, STORAGE_CLASS_HEADER)?.map(str::to_owned);

    if let Some(raw) = header_str(headers, CHECKSUM_SHA256_HEADER)? {
        let bytes = base64::prelude::BASE64_STANDARD
            .decode(raw)
            .context("invalid base64 in x-amz-checksum-sha256 header")?;
        match <[u8; 32]>::try_from(bytes.as_slice()) {
            Ok(arr) => meta.hash_sha256 = Some(arr),
            Err(_) => tracing::warn!(len = bytes.len(), "unexpected x-amz-checksum-sha256 length"),
        }
    }

    Ok(meta)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, anyhow::Error> {
    match headers.get(name) {
        Some(v) => {
            let v = v
                .to_str()
                .with_context(|| format!("invalid {name} header"))?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

pub(crate) fn clean_etag(raw: &str) -> String {
    raw.trim().trim_matches('"').trim().to_string()
}

/// Simple (non-multipart) etags are the hex MD5 of the object.
pub(crate) fn md5_from_etag(etag: &str) -> Option<[u8; 16]> {
    if etag.len() != 32 {
        return None;
    }
    let mut arr = [0u8; 16];
    for (i, byte) in arr.iter_mut().enumerate() {
        *byte = u8::from_str_radix(etag.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(arr)
}

/// Value of the `x-amz-checksum-sha256` header for `data`.
pub(crate) fn sha256_checksum(data: &[u8]) -> String {
    let digest = sha2::Sha256::digest(data);
    base64::prelude::BASE64_STANDARD.encode(digest)
}

/// Storage classes are upper-case identifiers like `STANDARD_IA`.
pub(crate) fn validate_storage_class(class: &str) -> Result<(), anyhow::Error> {
    if class
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        Ok(())
    } else {
        anyhow::bail!("invalid storage class '{class}': expected upper-case letters, digits or '_'")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_objectmeta_headers() {
        let mut map = HeaderMap::new();
        map.insert(
            "Last-Modified",
            "Tue, 15 Nov 1994 12:45:26 GMT".parse().unwrap(),
        );
        map.insert("Content-Length", "1234".parse().unwrap());
        map.insert(
            "ETag",
            "\"5d41402abc4b2a76b9719d911017c592\"".parse().unwrap(),
        );
        map.insert("x-amz-storage-class", "STANDARD_IA".parse().unwrap());

        let meta = parse_object_headers("key".to_string(), &map).unwrap();
        assert_eq!(meta.size, Some(1234));
        assert_eq!(
            meta.updated_at
                .unwrap()
                .format(&time::format_description::well_known::Rfc2822)
                .unwrap(),
            "Tue, 15 Nov 1994 12:45:26 +0000",
        );
        assert_eq!(meta.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));
        // md5("hello")
        assert_eq!(
            meta.hash_md5,
            Some([
                0x5d, 0x41, 0x40, 0x2a, 0xbc, 0x4b, 0x2a, 0x76, 0xb9, 0x71, 0x9d, 0x91, 0x10, 0x17,
                0xc5, 0x92
            ])
        );
        assert_eq!(meta.storage_class.as_deref(), Some("STANDARD_IA"));
    }

    #[test]
    fn test_checksum_header_roundtrip() {
        let mut map = HeaderMap::new();
        map.insert(CHECKSUM_SHA256_HEADER, sha256_checksum(b"").parse().unwrap());
        let meta = parse_object_headers("key".to_string(), &map).unwrap();
        assert_eq!(meta.hash_sha256, Some(sha2::Sha256::digest(b"").into()));
    }

    #[test]
    fn test_multipart_etag_has_no_md5() {
        assert_eq!(md5_from_etag("d41d8cd98f00b204e9800998ecf8427e-2"), None);
        assert_eq!(md5_from_etag("zz1d8cd98f00b204e9800998ecf8427e"), None);
    }

    #[test]
    fn test_validate_storage_class() {
        assert!(validate_storage_class("STANDARD").is_ok());
        assert!(validate_storage_class("GLACIER_IR").is_ok());
        assert!(validate_storage_class("standard").is_err());
        assert!(validate_storage_class("A B").is_err());
    }
}
