use std::sync::Arc;

use objgate::{DynStorageClient, StorageError, StorageProvider};

use crate::WasabiStore;

/// Registers the Wasabi backend under the name `wasabi`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WasabiProvider;

impl WasabiProvider {
    pub const NAME: &'static str = "wasabi";

    pub const fn new() -> Self {
        Self
    }
}

impl StorageProvider for WasabiProvider {
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
        let store = WasabiStore::new(endpoint, access_key, secret_key, token)?;
        Ok(Arc::new(store) as DynStorageClient)
    }
}

#[cfg(test)]
mod tests {
    use objgate::{ProviderRegistry, StorageClient as _};
    use objgate_memory::MemoryProvider;
    use pretty_assertions::assert_eq;

    use super::*;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::from_providers([
            Arc::new(MemoryProvider::new()) as Arc<dyn StorageProvider>,
            Arc::new(WasabiProvider::new()),
        ])
        .unwrap()
    }

    #[test]
    fn test_open_through_registry() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["mem", "wasabi"]);

        let client = registry
            .open("wasabi", "mybucket.s3.us-east-1.example.com", "AK", "SK", "")
            .unwrap();
        assert_eq!(client.kind(), WasabiStore::KIND);
        assert_eq!(client.describe(), "wasabi://mybucket/");
    }

    #[test]
    fn test_registry_reports_invalid_endpoint() {
        let err = registry()
            .open("wasabi", "://bad", "AK", "SK", "")
            .unwrap_err();
        assert!(err.is_invalid_endpoint(), "{err}");
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let registry = registry();
        let err = registry.register(WasabiProvider::new()).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateBackend(name) if name == "wasabi"));
        assert_eq!(registry.names(), vec!["mem", "wasabi"]);
    }
}
