use std::sync::Arc;

use objgate::{DynStorageClient, StaticCredentials, StorageError, StorageProvider};

/// Registers the in-memory backend under the name `mem`.
///
/// The endpoint is a free-form label; credentials are checked for
/// consistency but otherwise ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryProvider;

impl MemoryProvider {
    pub const NAME: &'static str = "mem";

    pub const fn new() -> Self {
        Self
    }
}

impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn build(
        &self,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        token: &str,
    ) -> Result<DynStorageClient, StorageError> {
        StaticCredentials::new(access_key, secret_key, token).validate()?;
        let store = crate::MemoryStore::with_label(endpoint)?;
        Ok(Arc::new(store) as DynStorageClient)
    }
}

#[cfg(test)]
mod tests {
    use objgate::{ProviderRegistry, StorageClient as _};
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_memory_store_through_registry() {
        let registry = ProviderRegistry::new().with_provider(MemoryProvider::new()).unwrap();
        let client = registry.open("mem", "suite", "", "", "").unwrap();
        assert_eq!(client.kind(), crate::MemoryStore::KIND);
        assert_eq!(client.describe(), "mem://suite/");
        objgate_test::test_storage_client(&client).await;
    }

    #[test]
    fn test_rejects_half_credentials() {
        let err = MemoryProvider::new().build("x", "", "secret", "").unwrap_err();
        assert!(matches!(err, StorageError::ConfigLoad(_)));
    }
}
