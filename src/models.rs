use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A practice target from the external catalog. Nullable columns stay
/// `Option` all the way through: the sync pipeline writes explicit NULLs
/// for fields the catalog did not provide.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Machine {
    pub id: i64,
    pub name: String,
    pub os: Option<String>,
    pub ip: Option<String>,
    pub avatar: Option<String>,
    pub points: Option<i64>,
    pub difficulty_text: Option<String>,
    pub status: String,
    pub release_date: Option<String>,
    pub user_owns_count: Option<i64>,
    pub root_owns_count: Option<i64>,
    pub free: Option<bool>,
    pub stars: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Technique {
    pub id: i64,
    pub name: String,
    pub category: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbTechnique {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub category: Option<String>,
}

impl From<DbTechnique> for Technique {
    fn from(technique: DbTechnique) -> Self {
        Self {
            id: technique.id.unwrap_or_default(),
            name: technique.name.unwrap_or_default(),
            category: technique.category.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Certification {
    pub id: i64,
    pub name: String,
    pub summary: Option<String>,
    pub tips: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RoadmapWeek {
    pub id: i64,
    pub certification_id: i64,
    pub week_number: i64,
    pub title: String,
    pub description: Option<String>,
}

/// A machine joined with the timestamp of the user action that attached it
/// (progress completion or wishlist add).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TrackedMachine {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub machine: Machine,
    pub tracked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProgressEntry {
    pub machine_id: i64,
    pub completed_at: DateTime<Utc>,
}

/// Per-technique aggregation for the skill tree view: how many machines
/// exercise the technique and how many of those the user has completed.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SkillNode {
    pub technique_id: i64,
    pub name: String,
    pub category: Option<String>,
    pub machine_count: i64,
    pub completed_count: i64,
}
