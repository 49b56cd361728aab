//! Open a storage backend by name and run a single operation against it.
//!
//! ```text
//! provider --backend mem --endpoint demo put hello.txt "hello world"
//! provider --backend wasabi --endpoint mybucket.s3.us-east-1.wasabisys.com ls
//! provider --connection archive get report.csv
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use objgate::{
    DynStorageClient, ListArgs, Outcome, ProviderRegistry, StorageClient,
    StorageClientExt as _, StorageProvider, wrapper::TracedStorage,
};
use objgate_config::{ConfigStore as _, FsConfigStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "provider")]
#[command(about = "Run object storage operations through the objgate provider registry")]
struct Cli {
    /// Registered backend name.
    #[arg(short, long, default_value = "mem", conflicts_with = "connection")]
    backend: String,

    /// Backend specific endpoint.
    #[arg(short, long, default_value = "demo")]
    endpoint: String,

    #[arg(long, env = "OBJGATE_ACCESS_KEY", default_value = "", hide_env_values = true)]
    access_key: String,

    #[arg(long, env = "OBJGATE_SECRET_KEY", default_value = "", hide_env_values = true)]
    secret_key: String,

    #[arg(long, env = "OBJGATE_TOKEN", default_value = "", hide_env_values = true)]
    token: String,

    /// Use a saved connection instead of --backend/--endpoint.
    #[arg(short, long)]
    connection: Option<String>,

    /// Directory holding `connections/` (default: ~/.config/objgate).
    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered backends.
    Backends,
    /// Print the client's description.
    Describe,
    Put { key: String, value: String },
    Get { key: String },
    Ls {
        #[arg(default_value = "")]
        prefix: String,
    },
    Rm { key: String },
    /// Set the storage class for later writes.
    StorageClass { class: String },
}

fn registry() -> Result<ProviderRegistry, objgate::StorageError> {
    ProviderRegistry::from_providers([
        Arc::new(objgate_memory::MemoryProvider::new()) as Arc<dyn StorageProvider>,
        Arc::new(objgate_s3::S3Provider::new()),
        Arc::new(objgate_wasabi::WasabiProvider::new()),
    ])
}

async fn open_client(
    cli: &Cli,
    registry: &ProviderRegistry,
) -> Result<DynStorageClient, anyhow::Error> {
    let client = match &cli.connection {
        Some(name) => {
            let store = match &cli.config_dir {
                Some(dir) => FsConfigStore::new(dir.clone()),
                None => FsConfigStore::new_default()?,
            };
            let loaded = store.load_connections().await?;
            for failure in &loaded.failed {
                tracing::warn!(%failure, "ignoring broken connection config");
            }
            loaded.open(registry, name)?
        }
        None => registry.open(
            &cli.backend,
            &cli.endpoint,
            &cli.access_key,
            &cli.secret_key,
            &cli.token,
        )?,
    };
    let name = client.describe();
    Ok(Arc::new(TracedStorage::new(name, client)) as DynStorageClient)
}

/// A backend without storage classes is a normal answer, not a failure.
fn set_storage_class(client: &impl StorageClient, class: &str) -> Result<String, anyhow::Error> {
    let msg = match client.set_storage_class(class)? {
        Outcome::Done(()) => "storage class set".to_string(),
        Outcome::NotSupported(capability) => {
            format!("{} does not support {capability}", client.describe())
        }
    };
    Ok(msg)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let registry = registry()?;

    if let Command::Backends = cli.command {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let client = open_client(&cli, &registry).await?;

    match &cli.command {
        Command::Backends => {}
        Command::Describe => println!("{} ({})", client.describe(), client.kind()),
        Command::Put { key, value } => {
            let meta = client.put(key).text(value.clone()).await?;
            println!("{} {} bytes", meta.key, meta.size.unwrap_or_default());
        }
        Command::Get { key } => {
            let data = client
                .get(key)
                .await?
                .with_context(|| format!("key not found: '{key}'"))?;
            println!("{}", String::from_utf8_lossy(&data));
        }
        Command::Ls { prefix } => {
            let page = client
                .list(ListArgs::new().with_prefix(prefix.as_str()).with_delimiter("/"))
                .await?;
            for prefix in page.prefixes.unwrap_or_default() {
                println!("{prefix}/");
            }
            for item in page.items {
                println!("{}\t{}", item.key, item.size.unwrap_or_default());
            }
        }
        Command::Rm { key } => client.delete(key).await?,
        Command::StorageClass { class } => println!("{}", set_storage_class(&client, class)?),
    }

    Ok(())
}
