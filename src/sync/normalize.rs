use chrono::Utc;
use serde_json::Value;

use crate::catalog::RawMachine;
use crate::error::AppError;
use crate::models::Machine;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MachineStatus {
    Active,
    Retired,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Active => "active",
            MachineStatus::Retired => "retired",
        }
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

/// Relative image paths are rewritten against the storage host; anything
/// already absolute passes through untouched.
fn rewrite_avatar(avatar: Option<&str>, storage_prefix: &str) -> Option<String> {
    avatar.map(|path| {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", storage_prefix, path)
        }
    })
}

/// One raw catalog record → one machine row. Fields the catalog did not
/// send become NULL rather than an error; only a record with no id or no
/// name is rejected, since neither can be stored or displayed.
pub fn normalize_machine(
    raw: &RawMachine,
    status: MachineStatus,
    storage_prefix: &str,
) -> Result<Machine, AppError> {
    let id = raw
        .id
        .ok_or_else(|| AppError::Validation("Catalog record has no id".to_string()))?;
    let name = raw
        .name
        .clone()
        .ok_or_else(|| AppError::Validation(format!("Catalog record {} has no name", id)))?;

    Ok(Machine {
        id,
        name,
        os: raw.os.clone(),
        ip: raw.ip.clone(),
        avatar: rewrite_avatar(raw.avatar.as_deref(), storage_prefix),
        points: raw.points,
        difficulty_text: raw.difficulty_text.clone(),
        status: status.as_str().to_string(),
        release_date: raw.release.clone(),
        user_owns_count: raw.user_owns_count,
        root_owns_count: raw.root_owns_count,
        free: raw.free.as_ref().and_then(coerce_bool),
        stars: raw.star,
        last_updated: Some(Utc::now()),
    })
}
