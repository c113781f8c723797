use std::collections::{BTreeMap, BTreeSet};

use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::catalog::CatalogClient;
use crate::db;
use crate::error::AppError;
use crate::models::Technique;

const TECHNIQUE_CATEGORY: &str = "Technique";

#[derive(Debug, Default)]
pub struct TechniqueSyncReport {
    pub machines_processed: usize,
    pub machines_failed: usize,
    pub techniques: usize,
    pub links: usize,
}

/// Rebuilds the technique catalog and the machine↔technique adjacency from
/// per-machine tag data. Requests are serialized with a fixed delay; the
/// final write replaces the link table in one transaction so the table is
/// never observed half-deleted.
#[instrument(skip_all)]
pub async fn sync_techniques(
    pool: &Pool<Sqlite>,
    client: &CatalogClient,
) -> Result<TechniqueSyncReport, AppError> {
    let machines = db::list_machine_refs(pool).await?;
    info!(machines = machines.len(), "Rebuilding technique relationships");

    let mut report = TechniqueSyncReport::default();
    let mut techniques: BTreeMap<i64, Technique> = BTreeMap::new();
    let mut links: BTreeSet<(i64, i64)> = BTreeSet::new();

    for (machine_id, name) in machines {
        client.pause().await;

        let tags = match client.machine_tags(machine_id).await {
            Ok(tags) => tags,
            Err(err) => {
                warn!(machine_id, machine = %name, error = %err, "Tag fetch failed, skipping machine");
                report.machines_failed += 1;
                continue;
            }
        };

        report.machines_processed += 1;

        for tag in tags {
            if tag.category.as_deref() != Some(TECHNIQUE_CATEGORY) {
                continue;
            }
            let (id, name) = match (tag.id, tag.name) {
                (Some(id), Some(name)) => (id, name),
                _ => continue,
            };

            techniques.entry(id).or_insert(Technique {
                id,
                name,
                category: TECHNIQUE_CATEGORY.to_string(),
            });
            links.insert((machine_id, id));
        }
    }

    let technique_list: Vec<Technique> = techniques.into_values().collect();
    let link_list: Vec<(i64, i64)> = links.into_iter().collect();

    report.techniques = technique_list.len();
    report.links = link_list.len();

    db::replace_machine_techniques(pool, &technique_list, &link_list).await?;

    if report.machines_failed > 0 {
        warn!(
            failed = report.machines_failed,
            processed = report.machines_processed,
            techniques = report.techniques,
            links = report.links,
            "Technique sync finished with failures"
        );
    } else {
        info!(
            processed = report.machines_processed,
            techniques = report.techniques,
            links = report.links,
            "Technique sync finished"
        );
    }

    Ok(report)
}
