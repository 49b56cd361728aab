use anyhow::Context as _;
use objgate::{StaticCredentials, StorageError};
use rusty_s3::Bucket;
use url::Url;

#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UrlStyle {
    /// Requests will use "path-style" url: i.e:
    /// `https://s3.<region>.amazonaws.com/<bucket>/<key>`.
    Path,
    /// Requests will use "virtual-hosted-style" urls, i.e:
    /// `https://<bucket>.s3.<region>.amazonaws.com/<key>`.
    VirtualHost,
}

impl From<UrlStyle> for rusty_s3::UrlStyle {
    fn from(style: UrlStyle) -> Self {
        match style {
            UrlStyle::Path => rusty_s3::UrlStyle::Path,
            UrlStyle::VirtualHost => rusty_s3::UrlStyle::VirtualHost,
        }
    }
}

/// How request payloads are protected.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSigning {
    /// Hash buffered bodies and send the SHA-256 checksum with the request.
    #[default]
    Sha256,
    /// Authenticate headers only; the body is sent as `UNSIGNED-PAYLOAD`.
    Unsigned,
}

fn default_max_attempts() -> u32 {
    S3Config::DEFAULT_MAX_ATTEMPTS
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct S3Config {
    /// Service endpoint without the bucket, eg: `https://s3.us-east-1.amazonaws.com`.
    pub url: Url,
    pub bucket: String,
    pub region: String,
    pub url_style: UrlStyle,
    #[serde(default)]
    pub credentials: StaticCredentials,
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub payload_signing: PayloadSigning,
    /// Total attempts per request, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub storage_class: Option<String>,
}

impl S3Config {
    pub const DEFAULT_REGION: &'static str = "us-east-1";
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(
        url: Url,
        bucket: impl Into<String>,
        region: impl Into<String>,
        credentials: StaticCredentials,
    ) -> Self {
        Self {
            url,
            bucket: bucket.into(),
            region: region.into(),
            url_style: UrlStyle::VirtualHost,
            credentials,
            path_prefix: None,
            payload_signing: PayloadSigning::default(),
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            storage_class: None,
        }
    }

    pub fn is_tls(&self) -> bool {
        self.url.scheme() == "https"
    }

    pub(crate) fn build_bucket(&self) -> Result<Bucket, anyhow::Error> {
        Bucket::new(
            self.url.clone(),
            self.url_style.into(),
            self.bucket.clone(),
            self.region.clone(),
        )
        .context("could not build rusty_s3 bucket")
    }

    /// `None` for anonymous access.
    pub(crate) fn build_credentials(&self) -> Option<rusty_s3::Credentials> {
        let creds = &self.credentials;
        if creds.is_anonymous() {
            return None;
        }
        let out = match &creds.token {
            Some(token) => {
                rusty_s3::Credentials::new_with_token(&creds.access_key, &creds.secret_key, token)
            }
            None => rusty_s3::Credentials::new(&creds.access_key, &creds.secret_key),
        };
        Some(out)
    }

    /// Parse a path-style endpoint for the generic `s3` provider.
    ///
    /// Format: `[scheme://]host[:port]/bucket[/prefix][?region=..&style=path|virtual]`.
    /// The scheme defaults to https, the region to `us-east-1` and the
    /// style to path.
    pub fn from_endpoint(
        endpoint: &str,
        credentials: StaticCredentials,
    ) -> Result<Self, StorageError> {
        let full = objgate::endpoint::ensure_scheme(endpoint.trim());
        let url = Url::parse(&full).map_err(|e| StorageError::invalid_endpoint(endpoint, e))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(StorageError::invalid_endpoint(
                endpoint,
                format!("unsupported scheme '{}', expected http or https", url.scheme()),
            ));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| StorageError::invalid_endpoint(endpoint, "missing host"))?;

        let mut segments = url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty());
        let bucket = segments
            .next()
            .ok_or_else(|| {
                StorageError::invalid_endpoint(endpoint, "missing bucket name as first path segment")
            })?
            .to_string();
        let prefix = segments.collect::<Vec<_>>().join("/");

        let mut region = None;
        let mut url_style = UrlStyle::Path;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "region" if !value.is_empty() => region = Some(value.into_owned()),
                "style" => {
                    url_style = match value.as_ref() {
                        "path" => UrlStyle::Path,
                        "domain" | "virtual" => UrlStyle::VirtualHost,
                        other => {
                            return Err(StorageError::invalid_endpoint(
                                endpoint,
                                format!(
                                    "invalid style: expected 'path' / 'domain' / 'virtual', got '{other}'"
                                ),
                            ));
                        }
                    }
                }
                other => tracing::debug!(endpoint, param = other, "ignoring unknown endpoint parameter"),
            }
        }

        let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
        let base = format!("{}://{}{}", url.scheme(), host, port);
        let base = Url::parse(&base).map_err(|e| StorageError::invalid_endpoint(endpoint, e))?;

        let mut config = Self::new(
            base,
            bucket,
            region.unwrap_or_else(|| Self::DEFAULT_REGION.to_string()),
            credentials,
        );
        config.url_style = url_style;
        config.path_prefix = if prefix.is_empty() { None } else { Some(prefix) };
        Ok(config)
    }
}
