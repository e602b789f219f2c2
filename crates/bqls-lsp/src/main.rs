//! bqls language server
//!
//! Speaks LSP over stdin/stdout. Logs go to stderr.

use anyhow::{Context, Result};
use bqls_catalog::{BigQueryStore, CachedStore, MetadataStore, OfflineStore};
use bqls_core::{Config, MetadataBackend};
use bqls_lsp::{Backend, Project};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_lsp::{LspService, Server};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// BigQuery SQL language server
#[derive(Parser)]
#[command(name = "bqls")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: bqls.toml in the working directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default project for table paths without one
    #[arg(long)]
    project_id: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => {
            let cwd = std::env::current_dir().context("Failed to read working directory")?;
            Config::discover(&cwd)?
        }
    };

    if cli.project_id.is_some() {
        config.project_id = cli.project_id.clone();
    }
    Ok(config)
}

async fn open_store(config: &Config) -> Arc<dyn MetadataStore> {
    let offline = || -> Arc<dyn MetadataStore> { Arc::new(OfflineStore::new(config.offline_dir())) };

    let inner = match (&config.metadata.backend, &config.project_id) {
        (MetadataBackend::BigQuery, Some(project_id)) => match BigQueryStore::with_adc(project_id.as_str()).await {
            Ok(store) => Arc::new(store) as Arc<dyn MetadataStore>,
            Err(err) => {
                tracing::warn!(error = %err, "BigQuery unavailable, using offline snapshots");
                offline()
            }
        },
        (MetadataBackend::BigQuery, None) => {
            tracing::warn!("no project_id configured, using offline snapshots");
            offline()
        }
        (MetadataBackend::Offline, _) => offline(),
    };

    tracing::info!(store = inner.name(), ttl_secs = config.metadata.cache_ttl_secs, "metadata store ready");
    Arc::new(CachedStore::new(
        inner,
        Duration::from_secs(config.metadata.cache_ttl_secs),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::info!(project_id = ?config.project_id, "starting bqls");

    let store = open_store(&config).await;
    let project = Arc::new(Project::new(config, store));

    let (stdin, stdout) = (tokio::io::stdin(), tokio::io::stdout());
    let (service, socket) = LspService::new(|client| Backend::new(client, project));

    Server::new(stdin, stdout, socket).serve(service).await;

    tracing::info!("bqls stopped");
    Ok(())
}
