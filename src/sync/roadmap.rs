use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::db;
use crate::error::AppError;

pub const LINKED: &str = "linked";
pub const MISSING: &str = "missing";

/// Curated roadmaps reference techniques by name, and some of the source
/// material is Spanish. Near-miss lookups go through this alias table
/// before being marked missing.
pub static TECHNIQUE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("inyección sql", "SQL Injection"),
        ("inyección de comandos", "Command Injection"),
        ("escalada de privilegios", "Privilege Escalation"),
        ("ejecución remota de código", "Remote Code Execution"),
        ("fuerza bruta", "Brute Force"),
        ("deserialización", "Deserialization"),
        ("inclusión de archivos locales", "Local File Inclusion"),
        ("subida de archivos", "File Upload"),
        ("recorrido de directorios", "Directory Traversal"),
        ("falsificación de petición del lado del servidor", "SSRF"),
        ("secuestro de sesión", "Session Hijacking"),
        ("envenenamiento de caché", "Cache Poisoning"),
    ])
});

/// One name reference in the curated file. Enrichment fills in `id`,
/// `status` and (for alias hits) `matched_name`; unresolved names keep an
/// explicit `missing` marker instead of being dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedWeek {
    pub certification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_tips: Option<String>,
    pub week_number: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub machines: Vec<NameRef>,
    #[serde(default)]
    pub techniques: Vec<NameRef>,
    // Hand-maintained annotations in the file survive a rewrite
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SeedWeek {
    pub fn linked_machine_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.machines.iter().filter_map(NameRef::linked_id)
    }

    pub fn linked_technique_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.techniques.iter().filter_map(NameRef::linked_id)
    }
}

impl NameRef {
    fn linked_id(&self) -> Option<i64> {
        match self.status.as_deref() {
            Some(LINKED) => self.id,
            _ => None,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct EnrichReport {
    pub machines_linked: usize,
    pub machines_missing: usize,
    pub techniques_linked: usize,
    pub techniques_missing: usize,
}

pub fn load_roadmap_file(path: &Path) -> Result<Vec<SeedWeek>, AppError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn write_roadmap_file(path: &Path, weeks: &[SeedWeek]) -> Result<(), AppError> {
    let pretty = serde_json::to_string_pretty(weeks)?;
    std::fs::write(path, pretty)?;
    Ok(())
}

fn resolve(lookup: &HashMap<String, i64>, name: &str) -> Option<i64> {
    lookup.get(&name.to_lowercase()).copied()
}

/// Annotates every machine and technique reference with its database id.
/// Machine names resolve case-insensitively; technique names additionally
/// fall back to [`TECHNIQUE_ALIASES`]. Names that resolve nowhere are
/// marked `missing`, never guessed.
pub fn enrich_weeks(
    weeks: &mut [SeedWeek],
    machines: &HashMap<String, i64>,
    techniques: &HashMap<String, i64>,
) -> EnrichReport {
    let mut report = EnrichReport::default();

    for week in weeks.iter_mut() {
        for machine_ref in &mut week.machines {
            match resolve(machines, &machine_ref.name) {
                Some(id) => {
                    machine_ref.id = Some(id);
                    machine_ref.status = Some(LINKED.to_string());
                    report.machines_linked += 1;
                }
                _ => {
                    machine_ref.id = None;
                    machine_ref.status = Some(MISSING.to_string());
                    report.machines_missing += 1;
                }
            }
        }

        for technique_ref in &mut week.techniques {
            let direct = resolve(techniques, &technique_ref.name);
            let resolved = match direct {
                Some(id) => Some((id, None)),
                _ => TECHNIQUE_ALIASES
                    .get(technique_ref.name.to_lowercase().as_str())
                    .and_then(|english| {
                        resolve(techniques, english).map(|id| (id, Some(english.to_string())))
                    }),
            };

            match resolved {
                Some((id, matched_name)) => {
                    technique_ref.id = Some(id);
                    technique_ref.status = Some(LINKED.to_string());
                    technique_ref.matched_name = matched_name;
                    report.techniques_linked += 1;
                }
                _ => {
                    technique_ref.id = None;
                    technique_ref.status = Some(MISSING.to_string());
                    technique_ref.matched_name = None;
                    report.techniques_missing += 1;
                }
            }
        }
    }

    report
}

fn name_lookup<I: IntoIterator<Item = (i64, String)>>(pairs: I) -> HashMap<String, i64> {
    pairs
        .into_iter()
        .map(|(id, name)| (name.to_lowercase(), id))
        .collect()
}

/// Resolves the curated roadmap file against the current database contents
/// and rewrites it in place.
#[instrument(skip(pool))]
pub async fn enrich_roadmap_file(
    pool: &Pool<Sqlite>,
    path: &Path,
) -> Result<EnrichReport, AppError> {
    info!("Enriching roadmap file");

    let mut weeks = load_roadmap_file(path)?;

    let machines = name_lookup(db::list_machine_refs(pool).await?);
    let techniques = name_lookup(
        db::all_techniques(pool)
            .await?
            .into_iter()
            .map(|t| (t.id, t.name)),
    );

    let report = enrich_weeks(&mut weeks, &machines, &techniques);

    write_roadmap_file(path, &weeks)?;

    if report.machines_missing > 0 || report.techniques_missing > 0 {
        warn!(
            machines_missing = report.machines_missing,
            techniques_missing = report.techniques_missing,
            "Enrichment left unresolved references"
        );
    }
    info!(
        machines_linked = report.machines_linked,
        techniques_linked = report.techniques_linked,
        "Enrichment finished"
    );

    Ok(report)
}

/// Loads an enriched roadmap file and reseeds the roadmap tables from it.
#[instrument(skip(pool))]
pub async fn seed_roadmap_file(
    pool: &Pool<Sqlite>,
    path: &Path,
) -> Result<db::SeedReport, AppError> {
    let weeks = load_roadmap_file(path)?;
    let report = db::reseed_roadmap(pool, &weeks).await?;

    info!(
        certifications = report.certifications,
        weeks = report.weeks,
        machine_links = report.machine_links,
        technique_links = report.technique_links,
        "Roadmap seeded"
    );

    Ok(report)
}
