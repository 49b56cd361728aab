use std::fmt;

/// A capability of [`crate::StorageClient`] that a backend may reject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Capability {
    /// Assigning a storage class / tier to newly written objects.
    StorageClass,
    /// Generating pre-signed download URLs.
    DownloadUrl,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StorageClass => "set-storage-class",
            Self::DownloadUrl => "download-url",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while registering, looking up or constructing a backend.
///
/// Object operations (get, put, ...) report transport and protocol failures
/// through [`anyhow::Error`] instead.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to load storage configuration: {0:#}")]
    ConfigLoad(#[source] anyhow::Error),

    #[error("operation not supported by this backend: {0}")]
    NotSupported(Capability),

    #[error("unknown storage backend '{0}'")]
    UnknownBackend(String),

    #[error("storage backend '{0}' is already registered")]
    DuplicateBackend(String),
}

impl StorageError {
    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config_load(err: impl Into<anyhow::Error>) -> Self {
        Self::ConfigLoad(err.into())
    }

    pub fn is_invalid_endpoint(&self) -> bool {
        matches!(self, Self::InvalidEndpoint { .. })
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported(_))
    }
}

/// Result of an operation that a backend may legitimately not offer.
///
/// `NotSupported` is a normal negative answer, not a failure: it tells the
/// caller that the operation is meaningless for this backend.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    Done(T),
    NotSupported(Capability),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(v) => Some(v),
            Self::NotSupported(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Done(v) => Outcome::Done(f(v)),
            Self::NotSupported(c) => Outcome::NotSupported(c),
        }
    }

    /// Fold a rejection into the error channel.
    pub fn into_result(self) -> Result<T, StorageError> {
        match self {
            Self::Done(v) => Ok(v),
            Self::NotSupported(c) => Err(StorageError::NotSupported(c)),
        }
    }
}
