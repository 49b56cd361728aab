//! Endpoint normalization for virtual-hosted-style provider URLs.
//!
//! Several vendors accept endpoints of the form
//! `[scheme://]<bucket>.<service>.<region>.<domain>`: the bucket is the first
//! host label and the region sits at a vendor-specific label position. This is
//! a provider convention, not a general URL rule, so every provider declares
//! its own [`HostConvention`].
//!
//! Labels are taken from the host as written, so bucket and region keep
//! their case. Hosts that only match after IDNA normalization use the
//! normalized form.

use std::fmt;

use url::Url;

use crate::StorageError;

/// Scheme of a normalized endpoint.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Https)
    }

    fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("https") {
            Some(Self::Https)
        } else if raw.eq_ignore_ascii_case("http") {
            Some(Self::Http)
        } else {
            None
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes where a provider embeds the region in a virtual-hosted host name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostConvention {
    /// Zero-based index of the host label holding the region.
    ///
    /// Label 0 is always the bucket.
    pub region_label: usize,
}

impl HostConvention {
    pub const fn new(region_label: usize) -> Self {
        Self { region_label }
    }

    /// Parse `raw` according to this convention.
    pub fn parse(&self, raw: &str) -> Result<Endpoint, StorageError> {
        Endpoint::parse_virtual_hosted(raw, *self)
    }
}

/// A normalized provider endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    /// Provider host without the bucket label, including an explicit port.
    pub host: String,
    pub bucket: String,
    pub region: String,
}

/// Prefix `https://` unless the endpoint already names a scheme.
pub fn ensure_scheme(raw: &str) -> std::borrow::Cow<'_, str> {
    if raw.contains("://") {
        std::borrow::Cow::Borrowed(raw)
    } else {
        std::borrow::Cow::Owned(format!("https://{raw}"))
    }
}

/// Host part of `url` as written, without userinfo or port.
fn raw_host(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    if host_port.starts_with('[') {
        return None;
    }
    host_port.split(':').next()
}

impl Endpoint {
    /// Normalize a virtual-hosted-style endpoint.
    ///
    /// Fails with [`StorageError::InvalidEndpoint`] if the string is not a
    /// http(s) URL, or if the host has too few labels for `convention`.
    pub fn parse_virtual_hosted(
        raw: &str,
        convention: HostConvention,
    ) -> Result<Self, StorageError> {
        let full = ensure_scheme(raw.trim());
        let url = Url::parse(&full).map_err(|e| StorageError::invalid_endpoint(raw, e))?;

        let scheme = Scheme::parse(url.scheme()).ok_or_else(|| {
            StorageError::invalid_endpoint(
                raw,
                format!("unsupported scheme '{}', expected http or https", url.scheme()),
            )
        })?;

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h,
            _ => return Err(StorageError::invalid_endpoint(raw, "missing host")),
        };
        let host = raw_host(&full)
            .filter(|written| written.eq_ignore_ascii_case(host))
            .unwrap_or(host);

        if url.path() != "/" || url.query().is_some() {
            tracing::debug!(endpoint = raw, path = url.path(), "ignoring path and query of endpoint");
        }

        let labels: Vec<&str> = host.split('.').collect();
        let bucket = labels[0];
        if bucket.is_empty() {
            return Err(StorageError::invalid_endpoint(raw, "empty bucket label"));
        }
        let region = match labels.get(convention.region_label) {
            Some(r) if !r.is_empty() => *r,
            _ => {
                return Err(StorageError::invalid_endpoint(
                    raw,
                    format!(
                        "expected '<bucket>.<service>.<region>...' with the region at label {}, got {} label(s)",
                        convention.region_label,
                        labels.len()
                    ),
                ));
            }
        };

        let mut base_host = match host.get(bucket.len() + 1..) {
            Some(rest) if !rest.is_empty() => rest.to_string(),
            _ => {
                return Err(StorageError::invalid_endpoint(
                    raw,
                    "host has no labels after the bucket",
                ));
            }
        };
        if let Some(port) = url.port() {
            base_host.push(':');
            base_host.push_str(&port.to_string());
        }

        Ok(Self {
            scheme,
            host: base_host,
            bucket: bucket.to_string(),
            region: region.to_string(),
        })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme.is_tls()
    }

    /// The provider's service URL with the bucket label removed.
    pub fn base_url_string(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    pub fn base_url(&self) -> Result<Url, StorageError> {
        let raw = self.base_url_string();
        Url::parse(&raw).map_err(|e| StorageError::invalid_endpoint(raw, e))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const REGION_AT_2: HostConvention = HostConvention::new(2);

    #[test]
    fn test_parse_without_scheme() {
        let ep = REGION_AT_2
            .parse("mybucket.s3.us-east-1.example.com")
            .unwrap();
        assert_eq!(
            ep,
            Endpoint {
                scheme: Scheme::Https,
                host: "s3.us-east-1.example.com".to_string(),
                bucket: "mybucket".to_string(),
                region: "us-east-1".to_string(),
            }
        );
        assert_eq!(ep.base_url_string(), "https://s3.us-east-1.example.com");
        assert!(ep.is_tls());
    }

    #[test]
    fn test_missing_scheme_equals_https() {
        for raw in [
            "data.s3.eu-central-1.wasabisys.com",
            "b.s3.ap-northeast-1.wasabisys.com:8443",
            "x.y.z",
        ] {
            let plain = REGION_AT_2.parse(raw).unwrap();
            let prefixed = REGION_AT_2.parse(&format!("https://{raw}")).unwrap();
            assert_eq!(plain, prefixed, "endpoint: {raw}");
        }
    }

    #[test]
    fn test_parse_http_with_port() {
        let ep = REGION_AT_2
            .parse("http://logs.s3.eu-west-2.local.test:9000")
            .unwrap();
        assert_eq!(ep.scheme, Scheme::Http);
        assert!(!ep.is_tls());
        assert_eq!(ep.bucket, "logs");
        assert_eq!(ep.region, "eu-west-2");
        assert_eq!(ep.host, "s3.eu-west-2.local.test:9000");
        assert_eq!(
            ep.base_url().unwrap().as_str(),
            "http://s3.eu-west-2.local.test:9000/"
        );
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let ep = REGION_AT_2.parse("HTTPS://b.s3.us-west-1.wasabisys.com").unwrap();
        assert_eq!(ep.scheme, Scheme::Https);
    }

    #[test]
    fn test_label_case_is_preserved() {
        let ep = REGION_AT_2
            .parse("MyBucket.s3.US-East-1.example.com:9000")
            .unwrap();
        assert_eq!(ep.bucket, "MyBucket");
        assert_eq!(ep.region, "US-East-1");
        assert_eq!(ep.host, "s3.US-East-1.example.com:9000");
    }

    #[test]
    fn test_raw_host() {
        assert_eq!(raw_host("https://a.b.c:80/x?y"), Some("a.b.c"));
        assert_eq!(raw_host("http://user:pw@A.b.c/"), Some("A.b.c"));
        assert_eq!(raw_host("http://[::1]:80/"), None);
        assert_eq!(raw_host("a.b.c"), None);
    }

    #[test]
    fn test_recomputed_host_strips_bucket_label() {
        let raw = "bucket-01.s3.us-central-1.wasabisys.com";
        let ep = REGION_AT_2.parse(raw).unwrap();
        assert_eq!(format!("{}.{}", ep.bucket, ep.host), raw);
    }

    #[test]
    fn test_path_is_ignored() {
        let ep = REGION_AT_2
            .parse("https://b.s3.us-east-2.wasabisys.com/some/path?x=1")
            .unwrap();
        assert_eq!(ep.host, "s3.us-east-2.wasabisys.com");
    }

    #[test]
    fn test_malformed_endpoints() {
        for raw in [
            "",
            "https://",
            "http://[::1",
            "ftp://b.s3.us-east-1.wasabisys.com",
            "https://.s3.us-east-1.wasabisys.com",
        ] {
            let err = REGION_AT_2.parse(raw).unwrap_err();
            assert!(err.is_invalid_endpoint(), "{raw}: {err}");
        }
    }

    #[test]
    fn test_too_few_labels_is_rejected() {
        for raw in ["bucket", "bucket.s3", "bucket.s3..example.com"] {
            let err = REGION_AT_2.parse(raw).unwrap_err();
            assert!(err.is_invalid_endpoint(), "{raw}: {err}");
        }
    }
}
