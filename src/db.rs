use std::collections::HashMap;

use chrono::Utc;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::auth::{DbUser, DbUserSession, User, UserSession};
use crate::error::AppError;
use crate::models::{
    Certification, DbTechnique, Machine, ProgressEntry, RoadmapWeek, SkillNode, Technique,
    TrackedMachine,
};
use crate::sync::roadmap::SeedWeek;

// ---------------------------------------------------------------------------
// Users and sessions
// ---------------------------------------------------------------------------

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, display_name FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Looking up user by username");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, display_name FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip_all, fields(username))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let existing = sqlx::query("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Validation(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query("INSERT INTO users (username, password, display_name) VALUES (?, ?, ?)")
        .bind(username)
        .bind(hashed_password)
        .bind(display_name)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let row = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, password FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    match row {
        Some((id, hashed)) => match bcrypt::verify(password, &hashed) {
            Ok(true) => Ok(Some(get_user(pool, id).await?)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: chrono::NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Machines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MachineFilter {
    pub search: Option<String>,
    pub difficulty: Option<String>,
    pub os: Option<String>,
    pub status: Option<String>,
    pub page: i64,
    pub page_size: i64,
}

fn push_machine_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &MachineFilter) {
    if let Some(search) = &filter.search {
        builder.push(" AND name LIKE ");
        builder.push_bind(format!("%{}%", search));
    }
    if let Some(difficulty) = &filter.difficulty {
        builder.push(" AND difficulty_text = ");
        builder.push_bind(difficulty.clone());
    }
    if let Some(os) = &filter.os {
        builder.push(" AND os = ");
        builder.push_bind(os.clone());
    }
    if let Some(status) = &filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status.to_lowercase());
    }
}

#[instrument(skip(pool))]
pub async fn list_machines(
    pool: &Pool<Sqlite>,
    filter: &MachineFilter,
) -> Result<(Vec<Machine>, i64), AppError> {
    info!("Listing machines");

    let page = filter.page.max(1);
    let page_size = filter.page_size.clamp(1, 100);

    let mut count_builder =
        QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM machines WHERE 1=1");
    push_machine_filters(&mut count_builder, filter);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(pool)
        .await?;

    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM machines WHERE 1=1");
    push_machine_filters(&mut builder, filter);
    builder.push(" ORDER BY release_date DESC LIMIT ");
    builder.push_bind(page_size);
    builder.push(" OFFSET ");
    builder.push_bind((page - 1) * page_size);

    let machines = builder
        .build_query_as::<Machine>()
        .fetch_all(pool)
        .await?;

    Ok((machines, total))
}

#[instrument]
pub async fn get_machine(pool: &Pool<Sqlite>, id: i64) -> Result<Machine, AppError> {
    info!("Fetching machine by ID");
    let row = sqlx::query_as::<_, Machine>("SELECT * FROM machines WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(machine) => Ok(machine),
        _ => Err(AppError::NotFound(format!(
            "Machine with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn machine_count(pool: &Pool<Sqlite>) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM machines")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Every machine known to the database, id and name only, ordered by id.
/// The technique sync walks this list one serialized request at a time.
#[instrument(skip(pool))]
pub async fn list_machine_refs(pool: &Pool<Sqlite>) -> Result<Vec<(i64, String)>, AppError> {
    let rows = sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM machines ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Insert-or-replace keyed by the catalog id. Every column is overwritten
/// on conflict, there is no partial-field merge.
#[instrument(skip_all, fields(machine_id = machine.id, name = %machine.name))]
pub async fn upsert_machine(pool: &Pool<Sqlite>, machine: &Machine) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO machines
         (id, name, os, ip, avatar, points, difficulty_text, status, release_date,
          user_owns_count, root_owns_count, free, stars, last_updated)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
          name = excluded.name,
          os = excluded.os,
          ip = excluded.ip,
          avatar = excluded.avatar,
          points = excluded.points,
          difficulty_text = excluded.difficulty_text,
          status = excluded.status,
          release_date = excluded.release_date,
          user_owns_count = excluded.user_owns_count,
          root_owns_count = excluded.root_owns_count,
          free = excluded.free,
          stars = excluded.stars,
          last_updated = excluded.last_updated",
    )
    .bind(machine.id)
    .bind(&machine.name)
    .bind(&machine.os)
    .bind(&machine.ip)
    .bind(&machine.avatar)
    .bind(machine.points)
    .bind(&machine.difficulty_text)
    .bind(&machine.status)
    .bind(&machine.release_date)
    .bind(machine.user_owns_count)
    .bind(machine.root_owns_count)
    .bind(machine.free)
    .bind(machine.stars)
    .bind(machine.last_updated)
    .execute(pool)
    .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Techniques
// ---------------------------------------------------------------------------

#[instrument(skip(pool))]
pub async fn all_techniques(pool: &Pool<Sqlite>) -> Result<Vec<Technique>, AppError> {
    info!("Getting all techniques");
    let rows = sqlx::query_as::<_, DbTechnique>("SELECT * FROM techniques ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Technique::from).collect())
}

#[instrument(skip(pool))]
pub async fn techniques_for_machine(
    pool: &Pool<Sqlite>,
    machine_id: i64,
) -> Result<Vec<Technique>, AppError> {
    let rows = sqlx::query_as::<_, DbTechnique>(
        "SELECT t.* FROM techniques t
         JOIN machine_techniques mt ON mt.technique_id = t.id
         WHERE mt.machine_id = ?
         ORDER BY t.name",
    )
    .bind(machine_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Technique::from).collect())
}

/// Replaces the machine↔technique adjacency wholesale. Runs in a single
/// transaction so an interrupted rebuild can never leave the link table
/// partially deleted.
#[instrument(skip_all, fields(techniques = techniques.len(), links = links.len()))]
pub async fn replace_machine_techniques(
    pool: &Pool<Sqlite>,
    techniques: &[Technique],
    links: &[(i64, i64)],
) -> Result<(), AppError> {
    info!("Replacing machine-technique relationships");

    let mut tx = pool.begin().await?;

    for technique in techniques {
        sqlx::query(
            "INSERT INTO techniques (id, name, category) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, category = excluded.category",
        )
        .bind(technique.id)
        .bind(&technique.name)
        .bind(&technique.category)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("DELETE FROM machine_techniques")
        .execute(&mut *tx)
        .await?;

    for (machine_id, technique_id) in links {
        sqlx::query("INSERT INTO machine_techniques (machine_id, technique_id) VALUES (?, ?)")
            .bind(machine_id)
            .bind(technique_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Roadmap
// ---------------------------------------------------------------------------

#[instrument(skip(pool))]
pub async fn all_certifications(pool: &Pool<Sqlite>) -> Result<Vec<Certification>, AppError> {
    let rows =
        sqlx::query_as::<_, Certification>("SELECT * FROM certifications ORDER BY id")
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn weeks_for_certification(
    pool: &Pool<Sqlite>,
    certification_id: i64,
) -> Result<Vec<RoadmapWeek>, AppError> {
    let rows = sqlx::query_as::<_, RoadmapWeek>(
        "SELECT * FROM roadmap_weeks WHERE certification_id = ? ORDER BY week_number",
    )
    .bind(certification_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn machines_for_week(
    pool: &Pool<Sqlite>,
    week_id: i64,
) -> Result<Vec<Machine>, AppError> {
    let rows = sqlx::query_as::<_, Machine>(
        "SELECT m.* FROM machines m
         JOIN roadmap_week_machines wm ON wm.machine_id = m.id
         WHERE wm.week_id = ?
         ORDER BY m.id",
    )
    .bind(week_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn techniques_for_week(
    pool: &Pool<Sqlite>,
    week_id: i64,
) -> Result<Vec<Technique>, AppError> {
    let rows = sqlx::query_as::<_, DbTechnique>(
        "SELECT t.* FROM techniques t
         JOIN roadmap_week_techniques wt ON wt.technique_id = t.id
         WHERE wt.week_id = ?
         ORDER BY t.name",
    )
    .bind(week_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Technique::from).collect())
}

#[derive(Debug, Default)]
pub struct SeedReport {
    pub certifications: usize,
    pub weeks: usize,
    pub machine_links: usize,
    pub technique_links: usize,
}

/// Rebuilds the roadmap from the enriched week entries: link tables and
/// weeks are dropped and re-inserted, certifications are upserted by name
/// and never deleted. Everything runs in one transaction.
#[instrument(skip_all, fields(weeks = weeks.len()))]
pub async fn reseed_roadmap(
    pool: &Pool<Sqlite>,
    weeks: &[SeedWeek],
) -> Result<SeedReport, AppError> {
    info!("Reseeding roadmap");

    let mut tx = pool.begin().await?;
    let mut report = SeedReport::default();

    sqlx::query("DELETE FROM roadmap_week_machines")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM roadmap_week_techniques")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM roadmap_weeks")
        .execute(&mut *tx)
        .await?;

    let mut cert_ids: HashMap<String, i64> = HashMap::new();

    for week in weeks {
        let certification_id = match cert_ids.get(&week.certification) {
            Some(id) => *id,
            None => {
                sqlx::query(
                    "INSERT INTO certifications (name, summary, tips) VALUES (?, ?, ?)
                     ON CONFLICT(name) DO UPDATE SET
                      summary = COALESCE(excluded.summary, certifications.summary),
                      tips = COALESCE(excluded.tips, certifications.tips)",
                )
                .bind(&week.certification)
                .bind(&week.cert_summary)
                .bind(&week.cert_tips)
                .execute(&mut *tx)
                .await?;

                let id: i64 =
                    sqlx::query_scalar("SELECT id FROM certifications WHERE name = ?")
                        .bind(&week.certification)
                        .fetch_one(&mut *tx)
                        .await?;

                cert_ids.insert(week.certification.clone(), id);
                report.certifications += 1;
                id
            }
        };

        let res = sqlx::query(
            "INSERT INTO roadmap_weeks (certification_id, week_number, title, description)
             VALUES (?, ?, ?, ?)",
        )
        .bind(certification_id)
        .bind(week.week_number)
        .bind(&week.title)
        .bind(&week.description)
        .execute(&mut *tx)
        .await?;
        let week_id = res.last_insert_rowid();
        report.weeks += 1;

        for machine_id in week.linked_machine_ids() {
            sqlx::query(
                "INSERT INTO roadmap_week_machines (week_id, machine_id) VALUES (?, ?)
                 ON CONFLICT DO NOTHING",
            )
            .bind(week_id)
            .bind(machine_id)
            .execute(&mut *tx)
            .await?;
            report.machine_links += 1;
        }

        for technique_id in week.linked_technique_ids() {
            sqlx::query(
                "INSERT INTO roadmap_week_techniques (week_id, technique_id) VALUES (?, ?)
                 ON CONFLICT DO NOTHING",
            )
            .bind(week_id)
            .bind(technique_id)
            .execute(&mut *tx)
            .await?;
            report.technique_links += 1;
        }
    }

    tx.commit().await?;

    Ok(report)
}

// ---------------------------------------------------------------------------
// Progress and wishlist
// ---------------------------------------------------------------------------

#[instrument(skip(pool))]
pub async fn add_progress(
    pool: &Pool<Sqlite>,
    user_id: i64,
    machine_id: i64,
) -> Result<(), AppError> {
    info!("Marking machine as completed");
    sqlx::query(
        "INSERT INTO user_progress (user_id, machine_id, completed_at) VALUES (?, ?, ?)
         ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(machine_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn remove_progress(
    pool: &Pool<Sqlite>,
    user_id: i64,
    machine_id: i64,
) -> Result<(), AppError> {
    info!("Unmarking machine as completed");
    sqlx::query("DELETE FROM user_progress WHERE user_id = ? AND machine_id = ?")
        .bind(user_id)
        .bind(machine_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn user_progress(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<ProgressEntry>, AppError> {
    let rows = sqlx::query_as::<_, ProgressEntry>(
        "SELECT machine_id, completed_at FROM user_progress WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn completed_machine_ids(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<i64>, AppError> {
    let rows =
        sqlx::query_scalar::<_, i64>("SELECT machine_id FROM user_progress WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn solved_count(pool: &Pool<Sqlite>, user_id: i64) -> Result<i64, AppError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM user_progress WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

#[instrument(skip(pool))]
pub async fn user_completed_machines(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<TrackedMachine>, AppError> {
    let rows = sqlx::query_as::<_, TrackedMachine>(
        "SELECT m.*, up.completed_at AS tracked_at FROM machines m
         JOIN user_progress up ON up.machine_id = m.id
         WHERE up.user_id = ?
         ORDER BY up.completed_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn add_wishlist(
    pool: &Pool<Sqlite>,
    user_id: i64,
    machine_id: i64,
) -> Result<(), AppError> {
    info!("Adding machine to wishlist");
    sqlx::query(
        "INSERT INTO user_wishlist (user_id, machine_id, added_at) VALUES (?, ?, ?)
         ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(machine_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn remove_wishlist(
    pool: &Pool<Sqlite>,
    user_id: i64,
    machine_id: i64,
) -> Result<(), AppError> {
    info!("Removing machine from wishlist");
    sqlx::query("DELETE FROM user_wishlist WHERE user_id = ? AND machine_id = ?")
        .bind(user_id)
        .bind(machine_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn wishlist_count(pool: &Pool<Sqlite>, user_id: i64) -> Result<i64, AppError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM user_wishlist WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

#[instrument(skip(pool))]
pub async fn user_wishlist_machines(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<TrackedMachine>, AppError> {
    let rows = sqlx::query_as::<_, TrackedMachine>(
        "SELECT m.*, uw.added_at AS tracked_at FROM machines m
         JOIN user_wishlist uw ON uw.machine_id = m.id
         WHERE uw.user_id = ?
         ORDER BY uw.added_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Skill tree
// ---------------------------------------------------------------------------

#[instrument(skip(pool))]
pub async fn skill_tree(pool: &Pool<Sqlite>, user_id: i64) -> Result<Vec<SkillNode>, AppError> {
    info!("Aggregating skill tree");
    let rows = sqlx::query_as::<_, SkillNode>(
        "SELECT t.id AS technique_id, t.name, t.category,
                COUNT(mt.machine_id) AS machine_count,
                COUNT(up.machine_id) AS completed_count
         FROM techniques t
         LEFT JOIN machine_techniques mt ON mt.technique_id = t.id
         LEFT JOIN user_progress up
                ON up.machine_id = mt.machine_id AND up.user_id = ?
         GROUP BY t.id, t.name, t.category
         ORDER BY t.name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
