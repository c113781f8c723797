use labtracker::env::{SyncConfig, load_environment};
use labtracker::sync::roadmap::seed_roadmap_file;
use labtracker::telemetry;
use sqlx::SqlitePool;
use tracing::{error, info};

async fn run(config: SyncConfig) -> anyhow::Result<()> {
    let pool = SqlitePool::connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let report = seed_roadmap_file(&pool, &config.roadmap_file).await?;

    info!(
        certifications = report.certifications,
        weeks = report.weeks,
        machine_links = report.machine_links,
        technique_links = report.technique_links,
        "Roadmap seeding complete"
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
        error!(error = %e, "Roadmap seeding failed");
        std::process::exit(1);
    }
}
