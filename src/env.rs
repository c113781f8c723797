use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::catalog::CatalogConfig;
use crate::error::AppError;

const DEFAULT_CATALOG_BASE_URL: &str = "https://labs.hackthebox.com/api/v4";
const DEFAULT_STORAGE_PREFIX: &str = "https://labs.hackthebox.com";
const DEFAULT_ROADMAP_FILE: &str = "data/roadmap.json";

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

fn require(name: &str) -> Result<String, AppError> {
    std::env::var(name)
        .map_err(|_| AppError::Config(format!("{} environment variable is not set", name)))
}

/// Everything a sync binary needs, read from the environment up front.
/// A missing required variable fails here, before any request or write
/// has happened.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub catalog: CatalogConfig,
    pub storage_prefix: String,
    pub roadmap_file: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let token = require("CATALOG_API_TOKEN")?;
        let database_url = require("DATABASE_URL")?;

        let base_url = std::env::var("CATALOG_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_CATALOG_BASE_URL.to_string());
        let storage_prefix = std::env::var("CATALOG_STORAGE_PREFIX")
            .unwrap_or_else(|_| DEFAULT_STORAGE_PREFIX.to_string());
        let roadmap_file = std::env::var("ROADMAP_FILE")
            .unwrap_or_else(|_| DEFAULT_ROADMAP_FILE.to_string());

        let mut catalog = CatalogConfig::new(base_url, token);

        if let Ok(delay_ms) = std::env::var("CATALOG_REQUEST_DELAY_MS") {
            match delay_ms.parse::<u64>() {
                Ok(ms) => catalog.request_delay = Duration::from_millis(ms),
                Err(_) => {
                    return Err(AppError::Config(format!(
                        "CATALOG_REQUEST_DELAY_MS is not a number: {}",
                        delay_ms
                    )));
                }
            }
        }

        Ok(Self {
            database_url,
            catalog,
            storage_prefix,
            roadmap_file: PathBuf::from(roadmap_file),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_is_fatal() {
        temp_env::with_vars(
            [
                ("CATALOG_API_TOKEN", None::<&str>),
                ("DATABASE_URL", Some("sqlite::memory:")),
            ],
            || {
                let result = SyncConfig::from_env();
                assert!(matches!(result, Err(AppError::Config(_))));
            },
        );
    }

    #[test]
    fn missing_database_url_is_fatal() {
        temp_env::with_vars(
            [
                ("CATALOG_API_TOKEN", Some("token")),
                ("DATABASE_URL", None::<&str>),
            ],
            || {
                let result = SyncConfig::from_env();
                assert!(matches!(result, Err(AppError::Config(_))));
            },
        );
    }

    #[test]
    fn optional_variables_fall_back_to_defaults() {
        temp_env::with_vars(
            [
                ("CATALOG_API_TOKEN", Some("token")),
                ("DATABASE_URL", Some("sqlite::memory:")),
                ("CATALOG_BASE_URL", None::<&str>),
                ("CATALOG_STORAGE_PREFIX", None::<&str>),
                ("ROADMAP_FILE", None::<&str>),
            ],
            || {
                let config = SyncConfig::from_env().unwrap();
                assert_eq!(config.catalog.base_url, DEFAULT_CATALOG_BASE_URL);
                assert_eq!(config.storage_prefix, DEFAULT_STORAGE_PREFIX);
                assert_eq!(config.roadmap_file, PathBuf::from(DEFAULT_ROADMAP_FILE));
            },
        );
    }

    #[test]
    fn request_delay_override_is_validated() {
        temp_env::with_vars(
            [
                ("CATALOG_API_TOKEN", Some("token")),
                ("DATABASE_URL", Some("sqlite::memory:")),
                ("CATALOG_REQUEST_DELAY_MS", Some("250")),
            ],
            || {
                let config = SyncConfig::from_env().unwrap();
                assert_eq!(config.catalog.request_delay, Duration::from_millis(250));
            },
        );

        temp_env::with_vars(
            [
                ("CATALOG_API_TOKEN", Some("token")),
                ("DATABASE_URL", Some("sqlite::memory:")),
                ("CATALOG_REQUEST_DELAY_MS", Some("soon")),
            ],
            || {
                assert!(SyncConfig::from_env().is_err());
            },
        );
    }
}
