use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{User, UserSession};
use crate::db::{
    self, MachineFilter, add_progress, add_wishlist, authenticate_user, create_user,
    create_user_session, get_machine, invalidate_session, list_machines, machine_count,
    remove_progress, remove_wishlist, solved_count, techniques_for_machine,
    user_completed_machines, user_wishlist_machines, wishlist_count,
};
use crate::models::{Certification, Machine, ProgressEntry, RoadmapWeek, SkillNode, Technique};
use crate::progress::{LevelStats, certification_percentage, level_stats, week_locks};
use crate::validation::{AppErrorExt, JsonValidateExt, ValidationResponse};

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("username pattern"));

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
        }
    }
}

fn set_session_cookie(cookies: &rocket::http::CookieJar<'_>, token: String) {
    use rocket::http::{Cookie, SameSite};

    let cookie = Cookie::build(("session_token", token))
        .same_site(SameSite::Lax)
        .http_only(true)
        .max_age(rocket::time::Duration::hours(24));
    cookies.add_private(cookie);
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &rocket::http::CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LoginResponse>, Custom<Json<ValidationResponse>>> {
    use chrono::Utc;

    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + chrono::Duration::hours(24);

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            set_session_cookie(cookies, token);

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        _ => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(
    cookies: &rocket::http::CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    if let Some(cookie) = cookies.get_private("session_token") {
        invalidate_session(db, cookie.value()).await?;
        cookies.remove_private(cookie);
    }
    Ok(Status::NoContent)
}

#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(
        length(min = 3, max = 30, message = "Username must be 3-30 characters"),
        regex(
            path = *USERNAME_RE,
            message = "Username may only contain letters, numbers, hyphens and underscores"
        )
    )]
    username: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    #[validate(length(max = 60, message = "Display name too long"))]
    display_name: Option<String>,
}

#[post("/register", data = "<register>")]
pub async fn api_register(
    register: Json<RegisterRequest>,
    cookies: &rocket::http::CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LoginResponse>, Custom<Json<ValidationResponse>>> {
    use chrono::Utc;

    let validated = register.validate_custom()?;

    let user_id = create_user(
        db,
        &validated.username,
        &validated.password,
        validated.display_name.as_deref(),
    )
    .await
    .validate_custom()?;

    let user = db::get_user(db, user_id).await.validate_custom()?;

    let token = UserSession::generate_token();
    let expires_at = Utc::now() + chrono::Duration::hours(24);
    create_user_session(db, user.id, &token, expires_at.naive_utc())
        .await
        .validate_custom()?;
    set_session_cookie(cookies, token);

    Ok(Json(LoginResponse {
        success: true,
        user: Some(UserData::from(user)),
        error: None,
    }))
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[get("/me", rank = 2)]
pub async fn api_me_unauthorized() -> Status {
    Status::Unauthorized
}

#[get("/health")]
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

// ---------------------------------------------------------------------------
// Machines
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct MachineListResponse {
    pub machines: Vec<Machine>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[allow(clippy::too_many_arguments)]
#[get("/machines?<search>&<difficulty>&<os>&<status>&<page>&<page_size>")]
pub async fn api_get_machines(
    search: Option<String>,
    difficulty: Option<String>,
    os: Option<String>,
    status: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MachineListResponse>, Status> {
    let filter = MachineFilter {
        search,
        difficulty,
        os,
        status,
        page: page.unwrap_or(1),
        page_size: page_size.unwrap_or(20),
    };

    let (machines, total) = list_machines(db, &filter).await?;

    Ok(Json(MachineListResponse {
        machines,
        total,
        page: filter.page.max(1),
        page_size: filter.page_size.clamp(1, 100),
    }))
}

#[derive(Serialize)]
pub struct MachineDetailResponse {
    #[serde(flatten)]
    pub machine: Machine,
    pub techniques: Vec<Technique>,
}

#[get("/machines/<id>")]
pub async fn api_get_machine(
    id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MachineDetailResponse>, Status> {
    let machine = get_machine(db, id).await?;
    let techniques = techniques_for_machine(db, id).await?;

    Ok(Json(MachineDetailResponse {
        machine,
        techniques,
    }))
}

// ---------------------------------------------------------------------------
// Roadmap
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct RoadmapWeekDetail {
    #[serde(flatten)]
    pub week: RoadmapWeek,
    pub machines: Vec<Machine>,
    pub techniques: Vec<Technique>,
}

#[derive(Serialize)]
pub struct CertificationRoadmap {
    #[serde(flatten)]
    pub certification: Certification,
    pub weeks: Vec<RoadmapWeekDetail>,
}

#[get("/roadmap")]
pub async fn api_get_roadmap(
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<CertificationRoadmap>>, Status> {
    let mut roadmap = Vec::new();

    for certification in db::all_certifications(db).await? {
        let mut weeks = Vec::new();
        for week in db::weeks_for_certification(db, certification.id).await? {
            let machines = db::machines_for_week(db, week.id).await?;
            let techniques = db::techniques_for_week(db, week.id).await?;
            weeks.push(RoadmapWeekDetail {
                week,
                machines,
                techniques,
            });
        }
        roadmap.push(CertificationRoadmap {
            certification,
            weeks,
        });
    }

    Ok(Json(roadmap))
}

#[derive(Serialize)]
pub struct WeekProgress {
    pub week_id: i64,
    pub week_number: i64,
    pub title: String,
    pub locked: bool,
    pub completed: bool,
    pub machines_completed: usize,
    pub machines_total: usize,
}

#[derive(Serialize)]
pub struct CertificationProgress {
    pub certification_id: i64,
    pub name: String,
    pub percent: i64,
    pub weeks: Vec<WeekProgress>,
}

#[get("/roadmap/progress")]
pub async fn api_roadmap_progress(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<CertificationProgress>>, Status> {
    let completed: HashSet<i64> = db::completed_machine_ids(db, user.id)
        .await?
        .into_iter()
        .collect();

    let mut result = Vec::new();

    for certification in db::all_certifications(db).await? {
        let weeks = db::weeks_for_certification(db, certification.id).await?;

        let mut week_machine_ids: Vec<Vec<i64>> = Vec::with_capacity(weeks.len());
        for week in &weeks {
            let ids = db::machines_for_week(db, week.id)
                .await?
                .into_iter()
                .map(|m| m.id)
                .collect();
            week_machine_ids.push(ids);
        }

        let locks = week_locks(&week_machine_ids, &completed);

        let total: usize = week_machine_ids.iter().map(Vec::len).sum();
        let done: usize = week_machine_ids
            .iter()
            .flatten()
            .filter(|id| completed.contains(id))
            .count();

        let week_progress = weeks
            .into_iter()
            .zip(week_machine_ids.iter().zip(locks))
            .map(|(week, (machine_ids, locked))| {
                let machines_completed = machine_ids
                    .iter()
                    .filter(|id| completed.contains(id))
                    .count();
                WeekProgress {
                    week_id: week.id,
                    week_number: week.week_number,
                    title: week.title,
                    locked,
                    completed: machines_completed == machine_ids.len(),
                    machines_completed,
                    machines_total: machine_ids.len(),
                }
            })
            .collect();

        result.push(CertificationProgress {
            certification_id: certification.id,
            name: certification.name,
            percent: certification_percentage(done, total),
            weeks: week_progress,
        });
    }

    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Profile, progress and wishlist
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ProfileResponse {
    pub user: UserData,
    pub total_machines: i64,
    pub wishlist_count: i64,
    #[serde(flatten)]
    pub level: LevelStats,
    pub recent_completions: Vec<crate::models::TrackedMachine>,
    pub wishlist: Vec<crate::models::TrackedMachine>,
}

#[get("/profile")]
pub async fn api_profile(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ProfileResponse>, Status> {
    let solved = solved_count(db, user.id).await?;
    let total_machines = machine_count(db).await?;
    let wishlist_count = wishlist_count(db, user.id).await?;
    let recent_completions = user_completed_machines(db, user.id).await?;
    let wishlist = user_wishlist_machines(db, user.id).await?;

    Ok(Json(ProfileResponse {
        user: UserData::from(user),
        total_machines,
        wishlist_count,
        level: level_stats(solved, total_machines),
        recent_completions,
        wishlist,
    }))
}

#[get("/progress")]
pub async fn api_get_progress(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<ProgressEntry>>, Status> {
    Ok(Json(db::user_progress(db, user.id).await?))
}

#[post("/progress/<machine_id>")]
pub async fn api_add_progress(
    machine_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    // 404 for unknown machines instead of a foreign key error
    get_machine(db, machine_id).await?;
    add_progress(db, user.id, machine_id).await?;
    Ok(Status::Created)
}

#[delete("/progress/<machine_id>")]
pub async fn api_remove_progress(
    machine_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    remove_progress(db, user.id, machine_id).await?;
    Ok(Status::NoContent)
}

#[get("/wishlist")]
pub async fn api_get_wishlist(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<crate::models::TrackedMachine>>, Status> {
    Ok(Json(user_wishlist_machines(db, user.id).await?))
}

#[post("/wishlist/<machine_id>")]
pub async fn api_add_wishlist(
    machine_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    get_machine(db, machine_id).await?;
    add_wishlist(db, user.id, machine_id).await?;
    Ok(Status::Created)
}

#[delete("/wishlist/<machine_id>")]
pub async fn api_remove_wishlist(
    machine_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    remove_wishlist(db, user.id, machine_id).await?;
    Ok(Status::NoContent)
}

#[get("/skill-tree")]
pub async fn api_skill_tree(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<SkillNode>>, Status> {
    Ok(Json(db::skill_tree(db, user.id).await?))
}
