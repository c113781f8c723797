use labtracker::catalog::CatalogClient;
use labtracker::env::{SyncConfig, load_environment};
use labtracker::sync::techniques::sync_techniques;
use labtracker::telemetry;
use sqlx::SqlitePool;
use tracing::{error, info};

async fn run(config: SyncConfig) -> anyhow::Result<()> {
    let pool = SqlitePool::connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let client = CatalogClient::new(config.catalog.clone())?;

    let report = sync_techniques(&pool, &client).await?;

    info!(
        machines_processed = report.machines_processed,
        machines_failed = report.machines_failed,
        techniques = report.techniques,
        links = report.links,
        "Technique sync complete"
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    let _otel_guard = telemetry::init_tracing();

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!(error = %e, "Technique sync failed");
        std::process::exit(1);
    }
}
