use std::collections::HashSet;

use serde::Serialize;

/// Rank ladder, ordered by ascending solve-count threshold. The final rank
/// is not listed here: it requires completing every machine in the catalog
/// and is handled separately in [`level_stats`].
pub const LEVELS: [(&str, i64); 5] = [
    ("Script Kiddie", 0),
    ("Hacker", 10),
    ("Pro Hacker", 50),
    ("Elite Hacker", 100),
    ("Guru", 200),
];

pub const TERMINAL_LEVEL: &str = "Omniscient";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelStats {
    pub level: String,
    pub next_level: Option<String>,
    pub solved: i64,
    /// Percent of the way from the current threshold to the next one.
    pub progress_percent: i64,
    /// Solves still needed to reach the next level, 0 at the terminal one.
    pub to_next_level: i64,
}

fn percent(numerator: i64, denominator: i64) -> i64 {
    if denominator <= 0 {
        return 0;
    }
    ((numerator as f64 / denominator as f64) * 100.0).round() as i64
}

/// Ranks a solve count against [`LEVELS`]. The terminal rank applies only
/// at full catalog completion, regardless of thresholds; a user with 250
/// solves out of 300 machines is still a Guru.
pub fn level_stats(solved: i64, total_machines: i64) -> LevelStats {
    let solved = solved.max(0);
    // An empty catalog still counts as one machine so full completion
    // stays a real target rather than instantly satisfied
    let total = total_machines.max(1);

    if solved >= total {
        return LevelStats {
            level: TERMINAL_LEVEL.to_string(),
            next_level: None,
            solved,
            progress_percent: 100,
            to_next_level: 0,
        };
    }

    let index = LEVELS
        .iter()
        .rposition(|(_, threshold)| solved >= *threshold)
        .unwrap_or(0);
    let (level, threshold) = LEVELS[index];

    let (next_level, progress_percent, to_next_level) = match LEVELS.get(index + 1) {
        Some((next, next_threshold)) => (
            next.to_string(),
            percent(solved - threshold, next_threshold - threshold),
            next_threshold - solved,
        ),
        _ => (
            TERMINAL_LEVEL.to_string(),
            percent(solved, total),
            total - solved,
        ),
    };

    LevelStats {
        level: level.to_string(),
        next_level: Some(next_level),
        solved,
        progress_percent: progress_percent.clamp(0, 100),
        to_next_level,
    }
}

/// Completed-over-total as a rounded percentage. A certification whose
/// roadmap carries no machines reports 0 rather than dividing by zero.
pub fn certification_percentage(completed: usize, total: usize) -> i64 {
    if total == 0 {
        return 0;
    }
    percent(completed as i64, total as i64)
}

/// Lock state for each week of a certification roadmap, in week order.
/// A week is locked when the preceding week still has unsolved machines;
/// the first week is never locked and a week without machines counts as
/// complete.
pub fn week_locks(week_machine_ids: &[Vec<i64>], completed: &HashSet<i64>) -> Vec<bool> {
    let mut locks = Vec::with_capacity(week_machine_ids.len());
    // Nothing precedes week 1, so it starts unlocked
    let mut previous_complete = true;

    for machine_ids in week_machine_ids {
        locks.push(!previous_complete);
        previous_complete = machine_ids.iter().all(|id| completed.contains(id));
    }

    locks
}
