use std::fmt;

use crate::{StorageError, store::DynStorageClient};

/// Static access key / secret / session token triple.
///
/// No discovery chain is involved: the values are used exactly as given.
#[derive(serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq, Default)]
pub struct StaticCredentials {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl StaticCredentials {
    /// Build credentials from the raw triple.
    ///
    /// An empty token means non-session credentials.
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let token = token.into();
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            token: if token.is_empty() { None } else { Some(token) },
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.access_key.is_empty() && self.secret_key.is_empty()
    }

    /// Reject half-filled key pairs.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.access_key.is_empty() != self.secret_key.is_empty() {
            return Err(StorageError::config_load(anyhow::anyhow!(
                "incomplete static credentials: access key and secret key must both be set or both be empty"
            )));
        }
        if self.is_anonymous() && self.token.is_some() {
            return Err(StorageError::config_load(anyhow::anyhow!(
                "a session token requires an access key and secret key"
            )));
        }
        Ok(())
    }
}

/// A named storage backend constructor.
///
/// Each provider normalizes the user supplied endpoint in its own way and
/// returns a ready to use [`crate::StorageClient`].
/// See [`crate::ProviderRegistry`] for lookup by name.
pub trait StorageProvider: Send + Sync {
    /// Unique backend name, eg: "wasabi", "s3", "mem".
    fn name(&self) -> &str;

    /// Construct a client.
    ///
    /// Construction is all-or-nothing: on error no client is returned.
    fn build(
        &self,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        token: &str,
    ) -> Result<DynStorageClient, StorageError>;
}

/// Signature of a plain constructor function.
pub type ConstructorFn = fn(&str, &str, &str, &str) -> Result<DynStorageClient, StorageError>;

/// Adapts a constructor function to [`StorageProvider`].
#[derive(Clone)]
pub struct FnProvider {
    name: String,
    ctor: ConstructorFn,
}

impl FnProvider {
    pub fn new(name: impl Into<String>, ctor: ConstructorFn) -> Self {
        Self {
            name: name.into(),
            ctor,
        }
    }
}

impl fmt::Debug for FnProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProvider").field("name", &self.name).finish()
    }
}

impl StorageProvider for FnProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(
        &self,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        token: &str,
    ) -> Result<DynStorageClient, StorageError> {
        (self.ctor)(endpoint, access_key, secret_key, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_is_none() {
        let creds = StaticCredentials::new("AK", "SK", "");
        assert_eq!(creds.token, None);
        assert!(creds.validate().is_ok());

        let creds = StaticCredentials::new("AK", "SK", "TOKEN");
        assert_eq!(creds.token.as_deref(), Some("TOKEN"));
    }

    #[test]
    fn test_incomplete_credentials() {
        let err = StaticCredentials::new("AK", "", "").validate().unwrap_err();
        assert!(matches!(err, StorageError::ConfigLoad(_)));

        let err = StaticCredentials::new("", "", "TOKEN").validate().unwrap_err();
        assert!(matches!(err, StorageError::ConfigLoad(_)));

        assert!(StaticCredentials::anonymous().validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = StaticCredentials::new("AK", "very-secret", "tok");
        let out = format!("{creds:?}");
        assert!(!out.contains("very-secret"));
        assert!(!out.contains("tok\""));
    }
}
