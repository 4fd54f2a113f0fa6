use blob_bridge::config::AppConfig;
use blob_bridge::infrastructure::{database, store};
use blob_bridge::services::catalog::CatalogStore;
use blob_bridge::services::catalog_sync::CatalogSynchronizer;
use blob_bridge::utils::paths::normalize_prefix;
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Rebuild the SQLite catalog from the remote store's listing.
#[derive(Parser)]
#[command(name = "sync-catalog", version)]
struct Args {
    /// Only reconcile keys under this prefix.
    #[arg(long, default_value = "")]
    prefix: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blob_bridge=info,sync_catalog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env();

    let db = database::setup_database().await?;
    let object_store = store::setup_store(&config);
    let catalog = CatalogStore::new(db);

    let prefix = normalize_prefix(&args.prefix);
    let synchronizer = CatalogSynchronizer::new(object_store, catalog);
    let report = synchronizer.sync(&prefix).await?;

    info!(
        "Done: {} scanned, {} upserted, {} removed",
        report.scanned, report.upserted, report.removed
    );
    Ok(())
}
