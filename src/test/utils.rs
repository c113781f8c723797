use std::collections::HashMap;
use std::sync::Once;

use rocket::http::{ContentType, Cookie};
use rocket::local::asynchronous::Client;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use tracing::log::LevelFilter;

use crate::db::{
    add_progress, add_wishlist, create_user, replace_machine_techniques, upsert_machine,
};
use crate::error::AppError;
use crate::models::{Machine, Technique};

static INIT: Once = Once::new();
pub static STANDARD_PASSWORD: &str = "password123";

/// A machine with enough defaults filled in for list/detail assertions.
/// The release date is derived from the id so listing order is stable.
pub fn test_machine(id: i64, name: &str) -> Machine {
    Machine {
        id,
        name: name.to_string(),
        os: Some("Linux".to_string()),
        ip: None,
        avatar: None,
        points: Some(20),
        difficulty_text: Some("Easy".to_string()),
        status: "active".to_string(),
        release_date: Some(format!("2020-01-{:02}", (id % 27) + 1)),
        user_owns_count: None,
        root_owns_count: None,
        free: Some(false),
        stars: None,
        last_updated: None,
    }
}

#[derive(Default)]
pub struct TestDbBuilder {
    users: Vec<(String, Option<String>)>,
    machines: Vec<Machine>,
    techniques: Vec<Technique>,
    links: Vec<(i64, i64)>,
    completed: Vec<(String, i64)>,
    wishlisted: Vec<(String, i64)>,
}

impl TestDbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, username: &str, display_name: Option<&str>) -> Self {
        self.users
            .push((username.to_string(), display_name.map(String::from)));
        self
    }

    pub fn machine(mut self, id: i64, name: &str) -> Self {
        self.machines.push(test_machine(id, name));
        self
    }

    pub fn machine_full(mut self, machine: Machine) -> Self {
        self.machines.push(machine);
        self
    }

    pub fn technique(mut self, id: i64, name: &str) -> Self {
        self.techniques.push(Technique {
            id,
            name: name.to_string(),
            category: "Technique".to_string(),
        });
        self
    }

    pub fn link(mut self, machine_id: i64, technique_id: i64) -> Self {
        self.links.push((machine_id, technique_id));
        self
    }

    pub fn completed(mut self, username: &str, machine_id: i64) -> Self {
        self.completed.push((username.to_string(), machine_id));
        self
    }

    pub fn wishlisted(mut self, username: &str, machine_id: i64) -> Self {
        self.wishlisted.push((username.to_string(), machine_id));
        self
    }

    pub async fn build(self) -> Result<TestDb, AppError> {
        INIT.call_once(|| {
            let _ = env_logger::builder()
                .filter_level(LevelFilter::Debug)
                .is_test(true)
                .try_init();
        });

        // One connection so every query sees the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let mut user_id_map: HashMap<String, i64> = HashMap::new();

        for (username, display_name) in &self.users {
            let user_id =
                create_user(&pool, username, STANDARD_PASSWORD, display_name.as_deref()).await?;
            user_id_map.insert(username.clone(), user_id);
        }

        for machine in &self.machines {
            upsert_machine(&pool, machine).await?;
        }

        if !self.techniques.is_empty() || !self.links.is_empty() {
            replace_machine_techniques(&pool, &self.techniques, &self.links).await?;
        }

        for (username, machine_id) in &self.completed {
            let user_id = user_id_map
                .get(username)
                .copied()
                .ok_or_else(|| AppError::NotFound(format!("Test user {} not built", username)))?;
            add_progress(&pool, user_id, *machine_id).await?;
        }

        for (username, machine_id) in &self.wishlisted {
            let user_id = user_id_map
                .get(username)
                .copied()
                .ok_or_else(|| AppError::NotFound(format!("Test user {} not built", username)))?;
            add_wishlist(&pool, user_id, *machine_id).await?;
        }

        Ok(TestDb { pool, user_id_map })
    }
}

pub struct TestDb {
    pub pool: Pool<Sqlite>,
    pub user_id_map: HashMap<String, i64>,
}

impl TestDb {
    pub fn user_id(&self, username: &str) -> Option<i64> {
        self.user_id_map.get(username).copied()
    }
}

pub async fn create_standard_test_db() -> TestDb {
    TestDbBuilder::new()
        .user("alice", Some("Alice"))
        .user("bob", None)
        .machine(1, "Lame")
        .machine(2, "Blue")
        .machine(3, "Ghost")
        .technique(10, "SQL Injection")
        .link(1, 10)
        .link(2, 10)
        .completed("alice", 1)
        .build()
        .await
        .expect("Failed to build test database")
}

pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
    let rocket = crate::init_rocket(test_db.pool.clone()).await;
    let client = Client::tracked(rocket)
        .await
        .expect("Failed to build test client");
    (client, test_db)
}

pub async fn login_test_user(
    client: &Client,
    username: &str,
    password: &str,
) -> Vec<Cookie<'static>> {
    let response = client
        .post("/api/login")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": username,
                "password": password,
            })
            .to_string(),
        )
        .dispatch()
        .await;

    response
        .cookies()
        .iter()
        .map(|cookie| cookie.clone().into_owned())
        .collect()
}
