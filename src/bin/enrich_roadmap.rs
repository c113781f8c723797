use labtracker::env::{SyncConfig, load_environment};
use labtracker::sync::roadmap::enrich_roadmap_file;
use labtracker::telemetry;
use sqlx::SqlitePool;
use tracing::{error, info};

async fn run(config: SyncConfig) -> anyhow::Result<()> {
    let pool = SqlitePool::connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let report = enrich_roadmap_file(&pool, &config.roadmap_file).await?;

    info!(
        machines_linked = report.machines_linked,
        machines_missing = report.machines_missing,
        techniques_linked = report.techniques_linked,
        techniques_missing = report.techniques_missing,
        "Roadmap enrichment complete"
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
        error!(error = %e, "Roadmap enrichment failed");
        std::process::exit(1);
    }
}
