use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    StorageError,
    provider::{ConstructorFn, FnProvider, StorageProvider},
    store::DynStorageClient,
};

/// Maps backend names to their providers.
///
/// Populated at startup from an explicit provider list, then used to open
/// backends by name. Registration and lookup may happen from multiple threads.
///
/// ```ignore
/// let registry = ProviderRegistry::from_providers([
///     Arc::new(objgate_memory::MemoryProvider::new()) as Arc<dyn StorageProvider>,
///     Arc::new(objgate_wasabi::WasabiProvider::new()),
/// ])?;
/// let store = registry.open("wasabi", "bucket.s3.us-east-1.wasabisys.com", "AK", "SK", "")?;
/// ```
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<BTreeMap<String, Arc<dyn StorageProvider>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_providers(
        providers: impl IntoIterator<Item = Arc<dyn StorageProvider>>,
    ) -> Result<Self, StorageError> {
        let registry = Self::new();
        for provider in providers {
            registry.register_arc(provider)?;
        }
        Ok(registry)
    }

    /// Register a provider under its [`StorageProvider::name`].
    ///
    /// Fails with [`StorageError::DuplicateBackend`] if the name is taken;
    /// the existing registration is kept.
    pub fn register<P: StorageProvider + 'static>(&self, provider: P) -> Result<(), StorageError> {
        self.register_arc(Arc::new(provider))
    }

    /// Register a plain constructor function under `name`.
    pub fn register_fn(
        &self,
        name: impl Into<String>,
        ctor: ConstructorFn,
    ) -> Result<(), StorageError> {
        self.register(FnProvider::new(name, ctor))
    }

    pub fn register_arc(&self, provider: Arc<dyn StorageProvider>) -> Result<(), StorageError> {
        let name = provider.name().to_string();
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(&name) {
            return Err(StorageError::DuplicateBackend(name));
        }
        tracing::debug!(backend = %name, "registered storage provider");
        providers.insert(name, provider);
        Ok(())
    }

    pub fn with_provider<P: StorageProvider + 'static>(
        self,
        provider: P,
    ) -> Result<Self, StorageError> {
        self.register(provider)?;
        Ok(self)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn StorageProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Open the backend `name` with the given endpoint and static credentials.
    pub fn open(
        &self,
        name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        token: &str,
    ) -> Result<DynStorageClient, StorageError> {
        let provider = self
            .lookup(name)
            .ok_or_else(|| StorageError::UnknownBackend(name.to_string()))?;

        tracing::debug!(backend = name, endpoint, "opening storage backend");
        let client = provider.build(endpoint, access_key, secret_key, token)?;
        tracing::debug!(backend = name, store = %client.safe_uri(), "opened storage backend");
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn ctor_alpha(
        endpoint: &str,
        _access_key: &str,
        _secret_key: &str,
        _token: &str,
    ) -> Result<DynStorageClient, StorageError> {
        Err(StorageError::invalid_endpoint(endpoint, "alpha"))
    }

    fn ctor_beta(
        endpoint: &str,
        _access_key: &str,
        _secret_key: &str,
        _token: &str,
    ) -> Result<DynStorageClient, StorageError> {
        Err(StorageError::invalid_endpoint(endpoint, "beta"))
    }

    fn reason_of(res: Result<DynStorageClient, StorageError>) -> String {
        match res {
            Err(StorageError::InvalidEndpoint { reason, .. }) => reason,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_lookup_returns_matching_constructor() {
        let registry = ProviderRegistry::new();
        registry.register_fn("alpha", ctor_alpha).unwrap();
        registry.register_fn("beta", ctor_beta).unwrap();

        let alpha = registry.lookup("alpha").expect("alpha registered");
        assert_eq!(alpha.name(), "alpha");
        assert_eq!(reason_of(alpha.build("e", "", "", "")), "alpha");

        let beta = registry.lookup("beta").expect("beta registered");
        assert_eq!(beta.name(), "beta");
        assert_eq!(reason_of(beta.build("e", "", "", "")), "beta");

        assert_eq!(registry.names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_unknown_backend() {
        let registry = ProviderRegistry::new();
        assert!(registry.lookup("nope").is_none());
        assert!(!registry.contains("nope"));

        let err = registry.open("nope", "e", "", "", "").err().unwrap();
        assert!(matches!(err, StorageError::UnknownBackend(ref n) if n == "nope"));
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let registry = ProviderRegistry::new();
        registry.register_fn("alpha", ctor_alpha).unwrap();
        let err = registry.register_fn("alpha", ctor_beta).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateBackend(ref n) if n == "alpha"));

        let alpha = registry.lookup("alpha").unwrap();
        assert_eq!(reason_of(alpha.build("e", "", "", "")), "alpha");
    }

    #[test]
    fn test_from_providers_rejects_duplicates() {
        let res = ProviderRegistry::from_providers([
            Arc::new(FnProvider::new("alpha", ctor_alpha)) as Arc<dyn StorageProvider>,
            Arc::new(FnProvider::new("alpha", ctor_beta)),
        ]);
        assert!(matches!(res, Err(StorageError::DuplicateBackend(_))));
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(ProviderRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || registry.register_fn(format!("p{i}"), ctor_alpha))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(registry.names().len(), 8);
    }
}
