use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};

use crate::{
    ConfigSource, ConnectionConfig, ConnectionLoadError, LoadedConnection, LoadedConnections,
};

const CONFIG_DIR_NAME: &str = "objgate";
const CONNECTIONS_DIR_NAME: &str = "connections";

/// Connection profiles stored as files in `<dir>/connections/`.
///
/// Each `.yaml`, `.yml` or `.json` file holds a single connection or a list
/// of connections.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    path: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn from_path(path: &Path) -> Result<Self, anyhow::Error> {
        let ext = path
            .extension()
            .context("config file does not have an extension")?
            .to_str()
            .context("config file extension is not valid UTF-8")?;
        match ext {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => bail!("unsupported file extension: '{ext}'"),
        }
    }
}

impl FsConfigStore {
    /// `~/.config/objgate`
    pub fn default_config_dir() -> Result<PathBuf, anyhow::Error> {
        let home = std::env::home_dir().context("could not determine home directory")?;
        Ok(home.join(".config").join(CONFIG_DIR_NAME))
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn new_default() -> Result<Self, anyhow::Error> {
        Ok(Self::new(Self::default_config_dir()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connections_dir(&self) -> PathBuf {
        self.path.join(CONNECTIONS_DIR_NAME)
    }

    /// Load all connection files, in file name order.
    ///
    /// A missing directory yields no connections.
    pub fn connections(&self) -> Result<LoadedConnections, anyhow::Error> {
        let connections_dir = self.connections_dir();

        let reader = match std::fs::read_dir(&connections_dir) {
            Ok(reader) => reader,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %connections_dir.display(), "no connections directory");
                return Ok(LoadedConnections::default());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "failed to read connections directory '{}'",
                        connections_dir.display()
                    )
                });
            }
        };

        let mut paths = Vec::new();
        for res in reader {
            let entry = res?;
            if entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut cons = LoadedConnections::default();
        for path in paths {
            let loaded = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read connection file '{}'", path.display()))
                .and_then(|contents| Self::parse_connection_file(&path, &contents));
            match loaded {
                Ok(new_cons) => cons.extend(new_cons),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "skipping invalid connection file");
                    cons.failed.push(ConnectionLoadError {
                        source: path.into(),
                        error: format!("{err:#}"),
                        index: None,
                    });
                }
            }
        }

        Ok(cons)
    }

    fn parse_connection_file(
        path: &Path,
        contents: &str,
    ) -> Result<LoadedConnections, anyhow::Error> {
        let value = match Format::from_path(path)? {
            Format::Json => serde_json::from_str::<serde_json::Value>(contents)
                .context("failed to parse JSON connection config")?,
            Format::Yaml => serde_yaml::from_str::<serde_json::Value>(contents)
                .context("failed to parse YAML connection config")?,
        };

        let (entries, is_list) = match value {
            obj @ serde_json::Value::Object(_) => (vec![obj], false),
            serde_json::Value::Array(arr) => (arr, true),
            other => {
                bail!(
                    "a config file must contain either a list of connections or a single connection, got: {other}"
                );
            }
        };

        let mut cons = LoadedConnections::default();
        for (index, item) in entries.into_iter().enumerate() {
            match serde_json::from_value::<ConnectionConfig>(item) {
                Ok(config) => cons.connections.push(LoadedConnection {
                    source: Some(path.to_owned().into()),
                    config,
                }),
                Err(err) => cons.failed.push(ConnectionLoadError {
                    source: path.to_owned().into(),
                    error: format!("failed to parse connection config: {err}"),
                    index: is_list.then_some(index),
                }),
            }
        }
        Ok(cons)
    }

    fn serialize(format: Format, config: &ConnectionConfig) -> Result<String, anyhow::Error> {
        match format {
            Format::Json => serde_json::to_string_pretty(config)
                .context("failed to serialize connection config to JSON"),
            Format::Yaml => serde_yaml::to_string(config)
                .context("failed to serialize connection config to YAML"),
        }
    }

    /// Write `config` to `source`, or to `<name>.yaml` in the connections
    /// directory.
    ///
    /// Only single-connection files can be overwritten.
    pub fn write_connection(
        &self,
        config: &ConnectionConfig,
        is_new: bool,
        source: Option<ConfigSource>,
    ) -> Result<LoadedConnection, anyhow::Error> {
        if config.name.is_empty() || config.name.contains(['/', '\\']) || config.name.starts_with('.')
        {
            bail!("invalid connection name: '{}'", config.name);
        }

        if is_new && let Some(existing) = self.connections()?.get(&config.name) {
            let location = existing
                .source
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_default();
            bail!(
                "a connection named '{}' already exists: {location}",
                config.name
            );
        }

        let file_path = match source {
            Some(ConfigSource::File(path)) => path,
            None => {
                let dir = self.connections_dir();
                std::fs::create_dir_all(&dir).with_context(|| {
                    format!("failed to create connections directory '{}'", dir.display())
                })?;
                dir.join(format!("{}.yaml", config.name))
            }
        };

        if let Ok(existing) = std::fs::read_to_string(&file_path) {
            let parsed = Self::parse_connection_file(&file_path, &existing)?;
            if parsed.connections.len() + parsed.failed.len() > 1 {
                bail!(
                    "refusing to overwrite '{}': it holds more than one connection",
                    file_path.display()
                );
            }
        }

        let contents = Self::serialize(Format::from_path(&file_path)?, config)?;
        std::fs::write(&file_path, contents).with_context(|| {
            format!(
                "failed to write connection config to '{}'",
                file_path.display()
            )
        })?;
        tracing::debug!(connection = %config.name, path = %file_path.display(), "saved connection");

        Ok(LoadedConnection {
            source: Some(file_path.into()),
            config: config.clone(),
        })
    }
}

#[async_trait::async_trait]
impl crate::ConfigStore for FsConfigStore {
    async fn load_connections(&self) -> Result<LoadedConnections, anyhow::Error> {
        #[cfg(feature = "tokio")]
        {
            let s = self.clone();
            tokio::task::spawn_blocking(move || s.connections())
                .await
                .context("failed to load connections")?
        }

        #[cfg(not(feature = "tokio"))]
        {
            self.connections()
        }
    }

    async fn save_connection(
        &self,
        config: ConnectionConfig,
        is_new: bool,
        source: Option<ConfigSource>,
    ) -> Result<LoadedConnection, anyhow::Error> {
        #[cfg(feature = "tokio")]
        {
            let s = self.clone();
            tokio::task::spawn_blocking(move || s.write_connection(&config, is_new, source))
                .await
                .context("failed to save connection")?
        }

        #[cfg(not(feature = "tokio"))]
        {
            self.write_connection(&config, is_new, source)
        }
    }
}

#[cfg(test)]
mod tests {
    use objgate::StaticCredentials;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ConfigStore as _;

    fn store_with_files(files: &[(&str, &str)]) -> (tempfile::TempDir, FsConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let conn_dir = dir.path().join(CONNECTIONS_DIR_NAME);
        std::fs::create_dir_all(&conn_dir).unwrap();
        for (name, contents) in files {
            std::fs::write(conn_dir.join(name), contents).unwrap();
        }
        let store = FsConfigStore::new(dir.path().to_owned());
        (dir, store)
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::new(dir.path().join("nope"));
        let cons = store.connections().unwrap();
        assert!(cons.connections.is_empty());
        assert!(cons.failed.is_empty());
    }

    #[test]
    fn test_load_yaml_and_json() {
        let (_dir, store) = store_with_files(&[
            (
                "a.yaml",
                "name: archive\nbackend: wasabi\nendpoint: arch.s3.eu-central-1.wasabisys.com\naccess_key: AK\nsecret_key: SK\n",
            ),
            (
                "b.json",
                r#"[
                    {"name": "scratch", "backend": "mem", "endpoint": "scratch"},
                    {"name": "minio", "backend": "s3", "endpoint": "http://localhost:9000/data", "token": "T", "description": "local"}
                ]"#,
            ),
        ]);

        let cons = store.connections().unwrap();
        assert!(cons.failed.is_empty(), "{:?}", cons.failed);
        let names: Vec<_> = cons
            .connections
            .iter()
            .map(|c| c.config.name.as_str())
            .collect();
        assert_eq!(names, vec!["archive", "scratch", "minio"]);

        let archive = cons.get("archive").unwrap();
        assert_eq!(archive.config.backend, "wasabi");
        assert_eq!(
            archive.config.credentials(),
            StaticCredentials::new("AK", "SK", "")
        );
        assert_eq!(
            archive.source,
            Some(ConfigSource::File(
                store.connections_dir().join("a.yaml")
            ))
        );

        let minio = cons.get("minio").unwrap();
        assert_eq!(minio.config.token.as_deref(), Some("T"));
        assert_eq!(minio.config.description.as_deref(), Some("local"));
    }

    #[test]
    fn test_failures_do_not_abort_load() {
        let (_dir, store) = store_with_files(&[
            ("bad.json", "{ not json"),
            ("list.yml", "- name: ok\n  backend: mem\n  endpoint: x\n- name: missing-backend\n  endpoint: y\n"),
            ("notes.txt", "hello"),
            ("scalar.yaml", "42"),
        ]);

        let cons = store.connections().unwrap();
        assert_eq!(cons.connections.len(), 1);
        assert_eq!(cons.connections[0].config.name, "ok");

        assert_eq!(cons.failed.len(), 4);
        let list_err = cons
            .failed
            .iter()
            .find(|f| f.index.is_some())
            .expect("list entry failure");
        assert_eq!(list_err.index, Some(1));
        assert!(list_err.error.contains("backend"), "{}", list_err.error);
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::new(dir.path().to_owned());

        let conn = ConnectionConfig::new("backup", "wasabi", "b.s3.us-east-1.wasabisys.com")
            .with_credentials(StaticCredentials::new("AK", "SK", ""));
        let saved = store
            .save_connection(conn.clone(), true, None)
            .await
            .unwrap();
        assert_eq!(
            saved.source,
            Some(ConfigSource::File(
                dir.path().join("connections").join("backup.yaml")
            ))
        );

        let loaded = store.load_connections().await.unwrap();
        assert_eq!(loaded.get("backup").unwrap().config, conn);

        let err = store
            .save_connection(conn.clone(), true, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err}");

        let mut updated = conn.clone();
        updated.description = Some("nightly".to_string());
        store
            .save_connection(updated.clone(), false, saved.source)
            .await
            .unwrap();
        let loaded = store.load_connections().await.unwrap();
        assert_eq!(loaded.get("backup").unwrap().config, updated);
    }

    #[test]
    fn test_save_rejects_list_files_and_bad_names() {
        let (_dir, store) = store_with_files(&[(
            "many.json",
            r#"[{"name": "a", "backend": "mem", "endpoint": "a"}, {"name": "b", "backend": "mem", "endpoint": "b"}]"#,
        )]);
        let conn = ConnectionConfig::new("a", "mem", "a");
        let source = ConfigSource::File(store.connections_dir().join("many.json"));
        assert!(store.write_connection(&conn, false, Some(source)).is_err());

        let bad = ConnectionConfig::new("../escape", "mem", "x");
        assert!(store.write_connection(&bad, false, None).is_err());
    }
}
