use anyhow::Result;
use asset_hub::api::{self, AppState};
use asset_hub::config::{load_config, Cli, Commands, Config};
use asset_hub_core::auth::CredentialHasher;
use asset_hub_core::importer::BulkImporter;
use asset_hub_core::storage::{MemoryStore, Store};
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config()?;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::open(&config.data_dir)?);

    match cli.command {
        Commands::Serve { addr } => serve_api(addr, store, &config).await?,
        Commands::Import { file } => import_file(&file, store, &config).await?,
    }

    Ok(())
}

async fn serve_api(addr: SocketAddr, store: Arc<dyn Store>, config: &Config) -> Result<()> {
    let app = api::router(AppState::new(store, config));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn import_file(file: &Path, store: Arc<dyn Store>, config: &Config) -> Result<()> {
    let data = tokio::fs::read(file).await?;
    let importer = BulkImporter::new(store, Arc::new(CredentialHasher::default()))
        .with_workers(config.import_workers);
    let deadline = config.import_timeout.map(|timeout| Instant::now() + timeout);

    let result = importer.import_document(&data, deadline).await?;
    info!(
        total = result.total_users,
        succeeded = result.success_count,
        failed = result.failure_count,
        "import finished"
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
