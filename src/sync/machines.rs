use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::catalog::{CatalogClient, RawMachine};
use crate::db;
use crate::error::AppError;
use crate::sync::normalize::{normalize_machine, MachineStatus};

#[derive(Debug, Default)]
pub struct MachineSyncReport {
    pub fetched: usize,
    pub upserted: usize,
    pub failed: usize,
}

/// Full catalog sync: both listings are drained, then each machine is
/// normalized and upserted one at a time. A failure on one record is
/// logged and counted, never fatal for the rest of the batch.
#[instrument(skip_all)]
pub async fn sync_machines(
    pool: &Pool<Sqlite>,
    client: &CatalogClient,
    storage_prefix: &str,
) -> Result<MachineSyncReport, AppError> {
    let active = client.active_machines().await?;
    client.pause().await;
    let retired = client.retired_machines().await?;

    info!(
        active = active.len(),
        retired = retired.len(),
        "Fetched machine listings"
    );

    let records: Vec<(RawMachine, MachineStatus)> = active
        .into_iter()
        .map(|raw| (raw, MachineStatus::Active))
        .chain(retired.into_iter().map(|raw| (raw, MachineStatus::Retired)))
        .collect();

    let mut report = MachineSyncReport {
        fetched: records.len(),
        ..Default::default()
    };

    for (listing, status) in records {
        client.pause().await;

        // The detail endpoint carries fields the listing omits (ip, stars).
        // When it fails we fall back to the listing record rather than
        // dropping the machine.
        let raw = match listing.id {
            Some(id) => match client.machine_info(id).await {
                Ok(Some(detail)) => detail,
                Ok(None) => listing,
                Err(err) => {
                    warn!(machine_id = id, error = %err, "Detail fetch failed, using listing record");
                    listing
                }
            },
            _ => listing,
        };

        let machine = match normalize_machine(&raw, status, storage_prefix) {
            Ok(machine) => machine,
            Err(err) => {
                warn!(error = %err, "Skipping record that failed normalization");
                report.failed += 1;
                continue;
            }
        };

        match db::upsert_machine(pool, &machine).await {
            Ok(()) => report.upserted += 1,
            Err(err) => {
                warn!(machine_id = machine.id, error = %err, "Upsert failed");
                report.failed += 1;
            }
        }
    }

    if report.failed > 0 {
        warn!(
            failed = report.failed,
            upserted = report.upserted,
            "Machine sync finished with failures"
        );
    } else {
        info!(upserted = report.upserted, "Machine sync finished");
    }

    Ok(report)
}
