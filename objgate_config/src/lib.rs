//! Named connection profiles for objgate backends.
//!
//! A connection names a registered backend together with its endpoint and
//! static credentials. Profiles are stored as YAML or JSON files, see
//! [`FsConfigStore`].

use std::{fmt, path::PathBuf, sync::Arc};

use objgate::{DynStorageClient, ProviderRegistry, StaticCredentials, StorageError};

mod fs;

pub use self::fs::FsConfigStore;

#[derive(serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub name: String,
    /// Registered backend name, eg: "wasabi".
    pub backend: String,
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials())
            .field("description", &self.description)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(
        name: impl Into<String>,
        backend: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
            endpoint: endpoint.into(),
            access_key: String::new(),
            secret_key: String::new(),
            token: None,
            description: None,
        }
    }

    pub fn with_credentials(mut self, credentials: StaticCredentials) -> Self {
        self.access_key = credentials.access_key;
        self.secret_key = credentials.secret_key;
        self.token = credentials.token;
        self
    }

    pub fn credentials(&self) -> StaticCredentials {
        StaticCredentials::new(
            self.access_key.clone(),
            self.secret_key.clone(),
            self.token.clone().unwrap_or_default(),
        )
    }

    /// Open a client for this connection through `registry`.
    pub fn open(&self, registry: &ProviderRegistry) -> Result<DynStorageClient, StorageError> {
        open_connection(registry, self)
    }
}

/// Open the backend named by `connection`.
pub fn open_connection(
    registry: &ProviderRegistry,
    connection: &ConnectionConfig,
) -> Result<DynStorageClient, StorageError> {
    tracing::debug!(
        connection = %connection.name,
        backend = %connection.backend,
        "opening connection"
    );
    registry.open(
        &connection.backend,
        &connection.endpoint,
        &connection.access_key,
        &connection.secret_key,
        connection.token.as_deref().unwrap_or_default(),
    )
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        ConfigSource::File(path)
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedConnection {
    pub source: Option<ConfigSource>,
    pub config: ConnectionConfig,
}

/// Result of loading connection files.
///
/// Broken files or entries end up in `failed`; they never abort the load.
#[derive(Debug, Clone, Default)]
pub struct LoadedConnections {
    pub connections: Vec<LoadedConnection>,
    pub failed: Vec<ConnectionLoadError>,
}

impl LoadedConnections {
    pub fn get(&self, name: &str) -> Option<&LoadedConnection> {
        self.connections.iter().find(|c| c.config.name == name)
    }

    /// Open the connection named `name`.
    pub fn open(
        &self,
        registry: &ProviderRegistry,
        name: &str,
    ) -> Result<DynStorageClient, StorageError> {
        let conn = self.get(name).ok_or_else(|| {
            StorageError::config_load(anyhow::anyhow!("no connection named '{name}'"))
        })?;
        open_connection(registry, &conn.config)
    }

    fn extend(&mut self, other: Self) {
        self.connections.extend(other.connections);
        self.failed.extend(other.failed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLoadError {
    pub source: ConfigSource,
    pub error: String,
    /// Position in a list file.
    pub index: Option<usize>,
}

impl fmt::Display for ConnectionLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{} (entry {index}): {}", self.source, self.error),
            None => write!(f, "{}: {}", self.source, self.error),
        }
    }
}

#[async_trait::async_trait]
pub trait ConfigStore {
    async fn load_connections(&self) -> Result<LoadedConnections, anyhow::Error>;

    /// Persist a connection.
    ///
    /// With `is_new`, an existing connection of the same name is an error.
    async fn save_connection(
        &self,
        connection: ConnectionConfig,
        is_new: bool,
        source: Option<ConfigSource>,
    ) -> Result<LoadedConnection, anyhow::Error>;
}

pub type DynConfigStore = Arc<dyn ConfigStore + Send + Sync>;
